//! 订阅解析、v2ray 配置生成与节点测速排名

pub mod check;
pub mod config;
pub mod error;
pub mod output;
pub mod proxy;
pub mod subscription;
pub mod ui;
pub mod v2ray;
