//! 配置模板：启动时加载一次，之后只读

use serde_json::{Map, Value};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::TemplateError;

const DEFAULT_CONFIG: &str = include_str!("../../assets/templates/config.json");
const DEFAULT_TEST_CONFIG: &str = include_str!("../../assets/templates/test_config.json");

/// 一个已校验的模板：JSON 对象且包含 `outbounds` 数组
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    root: Map<String, Value>,
}

impl Template {
    pub fn from_value(name: &str, value: Value) -> Result<Self, TemplateError> {
        let root = match value {
            Value::Object(root) => root,
            _ => return Err(TemplateError::MissingOutbounds(name.to_string())),
        };
        if !matches!(root.get("outbounds"), Some(Value::Array(_))) {
            return Err(TemplateError::MissingOutbounds(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            root,
        })
    }

    pub fn parse(name: &str, content: &str) -> Result<Self, TemplateError> {
        let value = serde_json::from_str(content).map_err(|source| TemplateError::Json {
            name: name.to_string(),
            source,
        })?;
        Self::from_value(name, value)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &content)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    /// 把 http 入站改到给定的监听地址
    pub fn with_http_inbound(mut self, addr: SocketAddr) -> Self {
        if let Some(Value::Array(inbounds)) = self.root.get_mut("inbounds") {
            for inbound in inbounds
                .iter_mut()
                .filter(|i| i.get("protocol").and_then(Value::as_str) == Some("http"))
            {
                inbound["listen"] = Value::String(addr.ip().to_string());
                inbound["port"] = Value::from(addr.port());
            }
        }
        self
    }
}

/// 完整配置模板与测速配置模板
#[derive(Debug, Clone)]
pub struct Templates {
    pub full: Template,
    pub probe: Template,
}

impl Templates {
    /// 加载模板，未指定路径时使用内置模板
    pub fn load(
        full: Option<&Path>,
        probe: Option<&Path>,
        local_proxy: SocketAddr,
    ) -> Result<Self, TemplateError> {
        let full = match full {
            Some(path) => Template::from_file(path)?,
            None => Template::parse("config.json", DEFAULT_CONFIG)?,
        };
        let probe = match probe {
            Some(path) => Template::from_file(path)?,
            None => Template::parse("test_config.json", DEFAULT_TEST_CONFIG)?,
        };

        Ok(Self {
            full,
            probe: probe.with_http_inbound(local_proxy),
        })
    }

    pub fn builtin(local_proxy: SocketAddr) -> Result<Self, TemplateError> {
        Self::load(None, None, local_proxy)
    }
}
