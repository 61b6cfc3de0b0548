//! 经本地代理的下载测速

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Proxy};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::{Config, SpeedServer};
use crate::error::BenchError;

/// 单次测速使用的代理路由，只在一次测速内有效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub http: String,
    pub https: String,
}

impl ProxyRoute {
    /// http 与 https 都走本地代理进程
    pub fn local(addr: SocketAddr) -> Self {
        let url = format!("http://{}", addr);
        Self {
            http: url.clone(),
            https: url,
        }
    }

    pub fn client(&self, timeout: Duration) -> Result<Client, BenchError> {
        let client = Client::builder()
            .proxy(Proxy::http(self.http.as_str())?)
            .proxy(Proxy::https(self.https.as_str())?)
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;
        Ok(client)
    }
}

#[async_trait]
pub trait BandwidthTester: Send + Sync {
    /// 返回下载速度（MB/s）
    async fn measure(&self, route: &ProxyRoute) -> Result<f64, BenchError>;
}

/// 字节数与耗时换算为 MB/s，保留三位小数
pub fn to_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let mbps = bytes as f64 / secs / 1024.0 / 1024.0;
    (mbps * 1000.0).round() / 1000.0
}

/// 多次探测的平均延迟；失败的探测按超时计，全部失败返回 None
pub fn average_latency(samples: &[Option<Duration>], timeout: Duration) -> Option<Duration> {
    if samples.iter().all(Option::is_none) {
        return None;
    }
    let total: Duration = samples.iter().map(|s| s.unwrap_or(timeout)).sum();
    Some(total / samples.len() as u32)
}

/// 选出平均延迟最低的服务器
pub fn pick_best<'a>(scored: &[(&'a SpeedServer, Duration)]) -> Option<&'a SpeedServer> {
    scored
        .iter()
        .min_by_key(|(_, latency)| *latency)
        .map(|(server, _)| *server)
}

/// 先选延迟最低的测速服务器，再限时下载
#[derive(Debug, Clone)]
pub struct HttpSpeedTester {
    servers: Vec<SpeedServer>,
    probe_timeout: Duration,
    probe_count: usize,
    download_timeout: Duration,
}

impl HttpSpeedTester {
    pub fn new(
        servers: Vec<SpeedServer>,
        probe_timeout: Duration,
        probe_count: usize,
        download_timeout: Duration,
    ) -> Self {
        Self {
            servers,
            probe_timeout,
            probe_count: probe_count.max(1),
            download_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.speed_servers.clone(),
            config.server_probe_timeout_duration(),
            config.server_probe_count,
            config.speed_timeout_duration(),
        )
    }

    async fn probe_once(&self, client: &Client, url: &str) -> Option<Duration> {
        let start = Instant::now();
        let response = tokio::time::timeout(self.probe_timeout, client.get(url).send())
            .await
            .ok()?
            .ok()?;
        response.status().is_success().then(|| start.elapsed())
    }

    async fn select_server(&self, client: &Client) -> Result<&SpeedServer, BenchError> {
        info!("获取测速服务器中...");
        let mut scored = Vec::with_capacity(self.servers.len());

        for server in &self.servers {
            let mut samples = Vec::with_capacity(self.probe_count);
            for _ in 0..self.probe_count {
                samples.push(self.probe_once(client, &server.latency_url).await);
            }

            match average_latency(&samples, self.probe_timeout) {
                Some(latency) => {
                    debug!("测速服务器 {} 平均延迟 {:?}", server.name, latency);
                    scored.push((server, latency));
                }
                None => debug!("测速服务器 {} 不可达", server.name),
            }
        }

        pick_best(&scored).ok_or(BenchError::ProbeTimeout(self.probe_timeout))
    }

    async fn download(&self, client: &Client, server: &SpeedServer) -> Result<f64, BenchError> {
        info!("开始下载: {}", server.name);
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.download_timeout;

        let mut response = tokio::time::timeout_at(deadline, client.get(&server.download_url).send())
            .await
            .map_err(|_| BenchError::ProbeTimeout(self.download_timeout))??
            .error_for_status()?;

        let mut bytes: u64 = 0;
        loop {
            match tokio::time::timeout_at(deadline, response.chunk()).await {
                Ok(Ok(Some(chunk))) => bytes += chunk.len() as u64,
                Ok(Ok(None)) => break,
                Ok(Err(e)) if bytes == 0 => return Err(e.into()),
                Ok(Err(e)) => {
                    debug!("下载中断，按已下载量计算: {}", e);
                    break;
                }
                // 限时下载：到时间就按已下载量计算
                Err(_) => break,
            }
        }

        if bytes == 0 {
            return Err(BenchError::ProbeTimeout(self.download_timeout));
        }
        Ok(to_mbps(bytes, start.elapsed()))
    }
}

#[async_trait]
impl BandwidthTester for HttpSpeedTester {
    async fn measure(&self, route: &ProxyRoute) -> Result<f64, BenchError> {
        // 整体超时由 download_timeout 控制，这里只约束单个请求
        let client = route.client(self.download_timeout + self.probe_timeout)?;
        let server = self.select_server(&client).await?;
        self.download(&client, server).await
    }
}
