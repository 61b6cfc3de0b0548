//! v2ray 配置生成与进程管理

mod outbound;
mod process;
mod template;
mod types;

pub use outbound::{build_document, document_for, synthesize};
pub use process::{ProxyHandle, ProxyLauncher, V2rayLauncher, V2rayProcess, parse_status_uid};
pub use template::{Template, Templates};
pub use types::{OutboundConfig, ProxyConfigDocument};
