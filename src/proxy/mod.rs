use serde::{Deserialize, Serialize};
use std::fmt;

/// 未测量 / 不可达的哨兵值
pub const UNREACHABLE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolKind {
    VMess,
    Shadowsocks,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::VMess => write!(f, "vmess"),
            ProtocolKind::Shadowsocks => write!(f, "shadowsocks"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmessSettings {
    pub user_id: String,
    pub alter_id: u32,
    /// tcp / ws / ...
    pub network: String,
    /// "tls" 或 "none"
    pub security: String,
    pub ws_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksSettings {
    pub method: String,
    pub password: String,
}

/// 协议相关字段，按协议类型二选一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolSettings {
    VMess(VmessSettings),
    Shadowsocks(ShadowsocksSettings),
}

/// 测速过程中附着在节点上的可变状态
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkState {
    /// 延迟（毫秒），-1 表示不可达或未测
    pub ping_millis: f64,
    /// 下载速度（MB/s），-1 表示失败，0 表示尚未测量
    pub download_speed_mbps: f64,
}

impl Default for BenchmarkState {
    fn default() -> Self {
        Self {
            ping_millis: UNREACHABLE,
            download_speed_mbps: 0.0,
        }
    }
}

impl BenchmarkState {
    pub fn is_reachable(&self) -> bool {
        self.ping_millis > 0.0
    }
}

/// 订阅中解码出的一个代理节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub display_name: String,
    pub address: String,
    pub port: u16,
    pub protocol: ProtocolSettings,
    pub bench: BenchmarkState,
}

impl ServerDescriptor {
    pub fn new(display_name: &str, address: &str, port: u16, protocol: ProtocolSettings) -> Self {
        Self {
            display_name: display_name.trim().to_string(),
            address: address.trim().to_string(),
            port,
            protocol,
            bench: BenchmarkState::default(),
        }
    }

    pub fn vmess(display_name: &str, address: &str, port: u16, settings: VmessSettings) -> Self {
        Self::new(display_name, address, port, ProtocolSettings::VMess(settings))
    }

    pub fn shadowsocks(
        display_name: &str,
        address: &str,
        port: u16,
        settings: ShadowsocksSettings,
    ) -> Self {
        Self::new(
            display_name,
            address,
            port,
            ProtocolSettings::Shadowsocks(settings),
        )
    }

    pub fn kind(&self) -> ProtocolKind {
        match self.protocol {
            ProtocolSettings::VMess(_) => ProtocolKind::VMess,
            ProtocolSettings::Shadowsocks(_) => ProtocolKind::Shadowsocks,
        }
    }

    pub fn uses_tls(&self) -> bool {
        match &self.protocol {
            ProtocolSettings::VMess(v) => v.security == "tls",
            ProtocolSettings::Shadowsocks(_) => false,
        }
    }

    /// server:port
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// 用作文件名的名称：替换路径分隔符与控制字符，空名称回退到 address_port
    pub fn file_stem(&self) -> String {
        let cleaned: String = self
            .display_name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        let cleaned = cleaned.trim().trim_matches('.').to_string();

        if cleaned.is_empty() {
            format!("{}_{}", self.address.replace(':', "_"), self.port)
        } else {
            cleaned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ss(name: &str) -> ServerDescriptor {
        ServerDescriptor::shadowsocks(
            name,
            "5.6.7.8",
            8388,
            ShadowsocksSettings {
                method: "aes-256-gcm".to_string(),
                password: "pw".to_string(),
            },
        )
    }

    #[test]
    fn new_descriptor_starts_with_sentinels() {
        let node = ss("  Tokyo  ");
        assert_eq!(node.display_name, "Tokyo");
        assert_eq!(node.bench.ping_millis, UNREACHABLE);
        assert_eq!(node.bench.download_speed_mbps, 0.0);
        assert!(!node.bench.is_reachable());
        assert_eq!(node.kind(), ProtocolKind::Shadowsocks);
        assert!(!node.uses_tls());
    }

    #[test]
    fn vmess_tls_flag_follows_security() {
        let mut settings = VmessSettings {
            user_id: "u1".to_string(),
            alter_id: 0,
            network: "ws".to_string(),
            security: "tls".to_string(),
            ws_path: "/x".to_string(),
        };
        assert!(ServerDescriptor::vmess("A", "1.2.3.4", 443, settings.clone()).uses_tls());

        settings.security = "none".to_string();
        assert!(!ServerDescriptor::vmess("A", "1.2.3.4", 443, settings).uses_tls());
    }

    #[test]
    fn file_stem_sanitizes_names() {
        assert_eq!(ss("HK/01: fast").file_stem(), "HK_01_ fast");
        assert_eq!(ss("").file_stem(), "5.6.7.8_8388");
        assert_eq!(ss("..").file_stem(), "5.6.7.8_8388");
    }

    #[test]
    fn endpoint_brackets_ipv6() {
        let mut node = ss("v6");
        node.address = "2001:db8::1".to_string();
        assert_eq!(node.endpoint(), "[2001:db8::1]:8388");
    }
}
