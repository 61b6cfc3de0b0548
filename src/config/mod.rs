use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 延迟探测方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingMethod {
    /// 调用系统 ping（ICMP）
    Icmp,
    /// 测量 TCP 建连耗时
    Tcp,
}

/// JSON 输出风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonStyle {
    Pretty,
    Compact,
}

/// 测速服务器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedServer {
    pub name: String,
    /// 延迟探测地址（响应体应尽量小）
    pub latency_url: String,
    /// 下载测速地址
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDir {
    pub path: PathBuf,
    pub style: JsonStyle,
}

impl OutputDir {
    fn new(path: &str, style: JsonStyle) -> Self {
        Self {
            path: PathBuf::from(path),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 生产配置（dump 模式）
    pub configs: OutputDir,
    /// 测速用单出站配置
    pub test_configs: OutputDir,
    /// 排名后的最优配置
    pub bench_configs: OutputDir,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            configs: OutputDir::new("configs", JsonStyle::Pretty),
            test_configs: OutputDir::new("test_configs", JsonStyle::Compact),
            bench_configs: OutputDir::new("bench_configs", JsonStyle::Compact),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 进度显示
    pub print_progress: bool,

    // 代理进程
    pub proxy_binary: String,
    pub local_proxy: String,
    pub warmup: u64,

    // 延迟筛选
    pub ping_method: PingMethod,
    pub ping_timeout: u64,
    pub candidate_limit: usize,

    // 测速参数
    pub speed_attempts: usize,
    pub retry_delay: u64,
    pub speed_timeout: u64,
    pub server_probe_timeout: u64,
    pub server_probe_count: usize,
    pub speed_servers: Vec<SpeedServer>,

    // 排名
    pub prefer_tls: bool,

    // 解码策略：true 时任一条目失败即终止
    pub strict_decode: bool,

    // 订阅拉取
    pub fetch_timeout: u64,

    // 输出配置
    pub output: OutputConfig,
    pub config_template: Option<PathBuf>,
    pub test_config_template: Option<PathBuf>,

    // 日志配置
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_progress: true,
            proxy_binary: "v2ray".to_string(),
            local_proxy: "127.0.0.1:10086".to_string(),
            warmup: 1300,
            ping_method: PingMethod::Icmp,
            ping_timeout: 1000,
            candidate_limit: 15,
            speed_attempts: 3,
            retry_delay: 2500,
            speed_timeout: 3000,
            server_probe_timeout: 500,
            server_probe_count: 3,
            speed_servers: vec![
                SpeedServer {
                    name: "cloudflare".to_string(),
                    latency_url: "https://speed.cloudflare.com/__down?bytes=0".to_string(),
                    download_url: "https://speed.cloudflare.com/__down?bytes=25000000".to_string(),
                },
                SpeedServer {
                    name: "cachefly".to_string(),
                    latency_url: "http://cachefly.cachefly.net/1mb.test".to_string(),
                    download_url: "http://cachefly.cachefly.net/100mb.test".to_string(),
                },
            ],
            prefer_tls: false,
            strict_decode: false,
            fetch_timeout: 10_000,
            output: OutputConfig::default(),
            config_template: None,
            test_config_template: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.candidate_limit == 0 {
            anyhow::bail!("candidate_limit 必须大于 0");
        }
        if self.speed_attempts == 0 {
            anyhow::bail!("speed_attempts 必须大于 0");
        }
        self.local_proxy_addr()?;
        Ok(())
    }

    /// 测速模式额外要求：至少一个测速服务器
    pub fn validate_speed_test(&self) -> anyhow::Result<()> {
        if self.speed_servers.is_empty() {
            anyhow::bail!("speed_servers 不能为空");
        }
        Ok(())
    }

    pub fn local_proxy_addr(&self) -> anyhow::Result<SocketAddr> {
        self.local_proxy
            .parse()
            .map_err(|e| anyhow::anyhow!("无效的本地代理地址 {}: {}", self.local_proxy, e))
    }

    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    pub fn warmup_duration(&self) -> Duration {
        Duration::from_millis(self.warmup)
    }

    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn speed_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.speed_timeout)
    }

    pub fn server_probe_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.server_probe_timeout)
    }

    pub fn fetch_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout)
    }
}
