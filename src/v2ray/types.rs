//! v2ray 出站与配置文档结构体定义

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::JsonStyle;

/// vmess 用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmessUser {
    pub id: String,
    pub level: u32,
    pub alter_id: u32,
}

/// vmess 服务器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmessServer {
    pub address: String,
    pub port: u16,
    pub users: Vec<VmessUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmessOutboundSettings {
    pub vnext: Vec<VmessServer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsSettings {
    pub path: String,
}

/// 传输层设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    /// tcp / ws / ...
    pub network: String,
    /// tls / none
    pub security: String,
    pub ws_settings: WsSettings,
}

/// shadowsocks 服务器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksServer {
    pub address: String,
    pub port: u16,
    pub method: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksOutboundSettings {
    pub servers: Vec<ShadowsocksServer>,
}

/// 出站配置片段，同时嵌入完整配置与测速配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum OutboundConfig {
    Vmess {
        settings: VmessOutboundSettings,
        #[serde(rename = "streamSettings")]
        stream_settings: StreamSettings,
    },
    Shadowsocks {
        settings: ShadowsocksOutboundSettings,
    },
}

impl OutboundConfig {
    pub fn protocol(&self) -> &'static str {
        match self {
            OutboundConfig::Vmess { .. } => "vmess",
            OutboundConfig::Shadowsocks { .. } => "shadowsocks",
        }
    }
}

/// 模板 + 前置出站得到的完整配置文档
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfigDocument {
    root: Map<String, Value>,
}

impl ProxyConfigDocument {
    pub(crate) fn from_root(root: Map<String, Value>) -> Self {
        Self { root }
    }

    /// 文档中的出站列表（描述符出站在前，模板自带的在后）
    pub fn outbounds(&self) -> &[Value] {
        match self.root.get("outbounds") {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn to_json(&self, style: JsonStyle) -> serde_json::Result<String> {
        match style {
            JsonStyle::Pretty => serde_json::to_string_pretty(&self.root),
            JsonStyle::Compact => serde_json::to_string(&self.root),
        }
    }
}
