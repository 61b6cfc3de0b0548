//! 节点延迟探测（不经过代理）

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::config::PingMethod;
use crate::error::BenchError;
use crate::proxy::ServerDescriptor;

lazy_static! {
    static ref PING_TIME: Regex = Regex::new(r"time\s*[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").unwrap();
}

#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// 返回延迟（毫秒）
    async fn ping(&self, descriptor: &ServerDescriptor) -> Result<f64, BenchError>;
}

/// 从 ping 命令输出中提取往返时间
pub fn parse_ping_output(output: &str) -> Option<f64> {
    PING_TIME
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// 调用系统 ping 发送一个 ICMP 探测
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self, address: &str) -> Command {
        let mut cmd = Command::new("ping");
        let millis = self.timeout.as_millis().max(1).to_string();
        let secs = (self.timeout.as_secs_f64().ceil().max(1.0) as u64).to_string();

        if cfg!(target_os = "windows") {
            cmd.args(["-n", "1", "-w", millis.as_str()]);
        } else if cfg!(target_os = "macos") {
            cmd.args(["-c", "1", "-W", millis.as_str()]);
        } else {
            cmd.args(["-c", "1", "-W", secs.as_str()]);
        }
        cmd.arg(address).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LatencyProbe for IcmpProbe {
    async fn ping(&self, descriptor: &ServerDescriptor) -> Result<f64, BenchError> {
        // ping 自身超时之外再留一秒给进程启动
        let deadline = self.timeout + Duration::from_secs(1);
        let output = tokio::time::timeout(deadline, self.command(&descriptor.address).output())
            .await
            .map_err(|_| BenchError::ProbeTimeout(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_ping_output(&stdout) {
            Some(millis) if output.status.success() => Ok(millis),
            _ => {
                debug!("ping {} 无响应: {}", descriptor.address, output.status);
                Err(BenchError::ProbeTimeout(self.timeout))
            }
        }
    }
}

/// 以 TCP 建连耗时作为延迟，适用于屏蔽 ICMP 的环境
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LatencyProbe for TcpProbe {
    async fn ping(&self, descriptor: &ServerDescriptor) -> Result<f64, BenchError> {
        let start = Instant::now();
        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((descriptor.address.as_str(), descriptor.port)),
        )
        .await
        .map_err(|_| BenchError::ProbeTimeout(self.timeout))??;
        let elapsed = start.elapsed();
        drop(stream);

        // 最小记为 0.001ms，保证可达节点的延迟为正
        Ok((elapsed.as_secs_f64() * 1000.0).max(0.001))
    }
}

/// 按配置选择探测方式
pub enum SystemProbe {
    Icmp(IcmpProbe),
    Tcp(TcpProbe),
}

impl SystemProbe {
    pub fn new(method: PingMethod, timeout: Duration) -> Self {
        match method {
            PingMethod::Icmp => SystemProbe::Icmp(IcmpProbe::new(timeout)),
            PingMethod::Tcp => SystemProbe::Tcp(TcpProbe::new(timeout)),
        }
    }
}

#[async_trait]
impl LatencyProbe for SystemProbe {
    async fn ping(&self, descriptor: &ServerDescriptor) -> Result<f64, BenchError> {
        match self {
            SystemProbe::Icmp(probe) => probe.ping(descriptor).await,
            SystemProbe::Tcp(probe) => probe.ping(descriptor).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ShadowsocksSettings;
    use tokio::net::TcpListener;

    fn node(address: &str, port: u16) -> ServerDescriptor {
        ServerDescriptor::shadowsocks(
            "n",
            address,
            port,
            ShadowsocksSettings {
                method: "aes-256-gcm".to_string(),
                password: "pw".to_string(),
            },
        )
    }

    #[test]
    fn parses_linux_ping_output() {
        let output = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.\n\
                      64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=12.3 ms\n";
        assert_eq!(parse_ping_output(output), Some(12.3));
    }

    #[test]
    fn parses_windows_ping_output() {
        assert_eq!(
            parse_ping_output("Reply from 1.1.1.1: bytes=32 time<1ms TTL=57"),
            Some(1.0)
        );
        assert_eq!(
            parse_ping_output("Reply from 1.1.1.1: bytes=32 time=25ms TTL=57"),
            Some(25.0)
        );
    }

    #[test]
    fn no_reply_yields_none() {
        let output = "PING 10.255.255.1 56(84) bytes of data.\n\n--- 1 packets transmitted, 0 received, 100% packet loss";
        assert_eq!(parse_ping_output(output), None);
    }

    #[tokio::test]
    async fn tcp_probe_measures_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new(Duration::from_secs(1));
        let millis = probe.ping(&node("127.0.0.1", port)).await.unwrap();
        assert!(millis > 0.0);
    }

    #[tokio::test]
    async fn tcp_probe_fails_on_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TcpProbe::new(Duration::from_millis(500));
        assert!(probe.ping(&node("127.0.0.1", port)).await.is_err());
    }
}
