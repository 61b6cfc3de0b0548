//! 错误类型定义

use std::path::PathBuf;
use thiserror::Error;

/// 单条订阅条目的解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid vmess json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value `{value}` for field `{field}`")]
    InvalidField { field: &'static str, value: String },

    #[error("malformed shadowsocks uri: {0}")]
    ShadowsocksUri(&'static str),

    #[error("unsupported scheme `{0}`")]
    UnknownScheme(String),

    #[error("empty payload")]
    EmptyPayload,

    #[error("line {line}: {source}")]
    Entry {
        line: usize,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    pub fn at_line(self, line: usize) -> Self {
        match self {
            entry @ DecodeError::Entry { .. } => entry,
            other => DecodeError::Entry {
                line,
                source: Box::new(other),
            },
        }
    }
}

/// 模板加载错误（启动阶段致命）
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template `{name}` is not valid json: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("template `{0}` has no `outbounds` array")]
    MissingOutbounds(String),
}

/// 拉取与测速阶段的错误
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to fetch subscription: {0}")]
    Fetch(String),

    #[error("probe timed out after {0:?}")]
    ProbeTimeout(std::time::Duration),

    #[error("proxy process failed to start: {0}")]
    ProcessLaunch(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
