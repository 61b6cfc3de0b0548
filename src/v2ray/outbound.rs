//! 描述符 -> 出站片段 -> 配置文档

use serde_json::Value;

use super::template::Template;
use super::types::{
    OutboundConfig, ProxyConfigDocument, ShadowsocksOutboundSettings, ShadowsocksServer,
    StreamSettings, VmessOutboundSettings, VmessServer, VmessUser, WsSettings,
};
use crate::proxy::{ProtocolSettings, ServerDescriptor};

/// vmess 用户等级固定为 1
const VMESS_USER_LEVEL: u32 = 1;

/// 由描述符生成出站片段，结果只取决于描述符本身
pub fn synthesize(descriptor: &ServerDescriptor) -> OutboundConfig {
    match &descriptor.protocol {
        ProtocolSettings::VMess(vmess) => OutboundConfig::Vmess {
            settings: VmessOutboundSettings {
                vnext: vec![VmessServer {
                    address: descriptor.address.clone(),
                    port: descriptor.port,
                    users: vec![VmessUser {
                        id: vmess.user_id.clone(),
                        level: VMESS_USER_LEVEL,
                        alter_id: vmess.alter_id,
                    }],
                }],
            },
            stream_settings: StreamSettings {
                network: vmess.network.clone(),
                security: vmess.security.clone(),
                ws_settings: WsSettings {
                    path: vmess.ws_path.clone(),
                },
            },
        },
        ProtocolSettings::Shadowsocks(ss) => OutboundConfig::Shadowsocks {
            settings: ShadowsocksOutboundSettings {
                servers: vec![ShadowsocksServer {
                    address: descriptor.address.clone(),
                    port: descriptor.port,
                    method: ss.method.clone(),
                    password: ss.password.clone(),
                }],
            },
        },
    }
}

/// 复制模板，按给定顺序把出站插到模板 `outbounds` 的最前面
pub fn build_document(
    template: &Template,
    outbounds: &[OutboundConfig],
) -> serde_json::Result<ProxyConfigDocument> {
    let mut root = template.root().clone();

    let mut merged = outbounds
        .iter()
        .map(serde_json::to_value)
        .collect::<serde_json::Result<Vec<Value>>>()?;
    if let Some(Value::Array(existing)) = root.remove("outbounds") {
        merged.extend(existing);
    }
    root.insert("outbounds".to_string(), Value::Array(merged));

    Ok(ProxyConfigDocument::from_root(root))
}

/// 单个描述符的文档（每个文件只含该节点的出站）
pub fn document_for(
    template: &Template,
    descriptor: &ServerDescriptor,
) -> serde_json::Result<ProxyConfigDocument> {
    build_document(template, &[synthesize(descriptor)])
}
