//! 订阅拉取与解码

mod decode;

pub use decode::{
    decode_base64_text, decode_entries, decode_entry, decode_subscription, pad_base64,
    split_shadowsocks_uri,
};

use crate::error::BenchError;
use log::{debug, info};
use reqwest::Client;
use std::time::Duration;
use url::Url;

pub fn parse_subscription_url(url: &str) -> Result<Url, BenchError> {
    let parsed = Url::parse(url).map_err(|e| BenchError::Fetch(format!("解析订阅URL失败: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(BenchError::Fetch(format!("不支持的订阅协议: {}", other))),
    }
}

/// 拉取订阅原文；客户端不读取环境变量中的代理设置
pub async fn fetch_subscription(url: &str, timeout: Duration) -> Result<String, BenchError> {
    let url = parse_subscription_url(url)?;

    let client = Client::builder()
        .no_proxy()
        .timeout(timeout)
        .user_agent(concat!("subs-bench/", env!("CARGO_PKG_VERSION")))
        .build()?;

    info!("拉取订阅: {}", url);
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| BenchError::Fetch(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(BenchError::Fetch(format!("{} 返回状态码 {}", url, status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| BenchError::Fetch(e.to_string()))?;
    debug!("订阅内容长度: {} bytes", body.len());

    Ok(body)
}
