//! 订阅内容解码
//!
//! 订阅正文是一段 base64，解开后每行一个 `vmess://` 或 `ss://` 链接。
//! 单条链接解码失败只跳过该条（`strict` 模式下终止整批），正文本身
//! 无法解码时整体失败。

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::proxy::{ServerDescriptor, ShadowsocksSettings, VmessSettings};

/// 补齐 base64 填充：先去掉已有的 `=`，再补到 4 的倍数
pub fn pad_base64(s: &str) -> String {
    let mut padded = s.trim_end_matches('=').to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}

/// 解码 base64 文本，兼容标准与 URL-safe 字母表，忽略空白字符
pub fn decode_base64_text(content: &str) -> Result<String, DecodeError> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    let padded = pad_base64(&cleaned);

    let bytes = match STANDARD.decode(&padded) {
        Ok(bytes) => bytes,
        Err(standard_err) => URL_SAFE.decode(&padded).map_err(|_| standard_err)?,
    };
    Ok(String::from_utf8(bytes)?)
}

fn looks_like_uri_list(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .is_some_and(|l| l.starts_with("vmess://") || l.starts_with("ss://"))
}

/// 按行解码，保留每条的结果（行号从 1 开始）
pub fn decode_entries(
    subscription: &str,
) -> Result<Vec<Result<ServerDescriptor, DecodeError>>, DecodeError> {
    let body = if looks_like_uri_list(subscription) {
        debug!("订阅内容为明文链接列表，跳过外层 base64 解码");
        subscription.to_string()
    } else {
        decode_base64_text(subscription)?
    };

    Ok(body
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| decode_entry(line).map_err(|e| e.at_line(idx + 1)))
        .collect())
}

/// 解码整个订阅；`strict` 为 false 时跳过无效条目并记录警告
pub fn decode_subscription(
    subscription: &str,
    strict: bool,
) -> Result<Vec<ServerDescriptor>, DecodeError> {
    let mut descriptors = Vec::new();

    for entry in decode_entries(subscription)? {
        match entry {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) if strict => return Err(e),
            Err(e) => warn!("跳过无效节点: {}", e),
        }
    }

    Ok(descriptors)
}

/// 解码单条链接
pub fn decode_entry(line: &str) -> Result<ServerDescriptor, DecodeError> {
    let line = line.trim();
    let (scheme, rest) = line
        .split_once("://")
        .ok_or_else(|| DecodeError::UnknownScheme("<none>".to_string()))?;

    let (payload, hint) = match rest.split_once('#') {
        Some((payload, fragment)) => {
            let name = urlencoding::decode(fragment)?;
            let name = name.trim();
            (payload, (!name.is_empty()).then(|| name.to_string()))
        }
        None => (rest, None),
    };

    if payload.trim().is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    match scheme.to_ascii_lowercase().as_str() {
        "vmess" => parse_vmess(&decode_base64_text(payload)?, hint.as_deref()),
        "ss" => parse_shadowsocks(payload.trim(), hint.as_deref()),
        other => Err(DecodeError::UnknownScheme(other.to_string())),
    }
}

/// vmess 链接中的 JSON，`port`/`aid` 可能是数字也可能是字符串
#[derive(Debug, Deserialize)]
struct VmessJson {
    #[serde(default)]
    ps: Option<Value>,
    #[serde(default)]
    add: Option<Value>,
    #[serde(default)]
    port: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    aid: Option<Value>,
    #[serde(default)]
    net: Option<Value>,
    #[serde(default)]
    tls: Option<Value>,
    #[serde(default)]
    path: Option<Value>,
}

fn text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn required(value: &Option<Value>, field: &'static str) -> Result<String, DecodeError> {
    text(value)
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MissingField(field))
}

fn parse_port(raw: &str, field: &'static str) -> Result<u16, DecodeError> {
    raw.trim().parse().map_err(|_| DecodeError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn parse_vmess(json: &str, hint: Option<&str>) -> Result<ServerDescriptor, DecodeError> {
    let raw: VmessJson = serde_json::from_str(json)?;

    let address = required(&raw.add, "add")?;
    let port = parse_port(&required(&raw.port, "port")?, "port")?;
    let user_id = required(&raw.id, "id")?;

    let alter_id = match text(&raw.aid).filter(|s| !s.is_empty()) {
        Some(aid) => aid.parse::<u32>().map_err(|_| DecodeError::InvalidField {
            field: "aid",
            value: aid.clone(),
        })?,
        None => 0,
    };

    let security = match text(&raw.tls).as_deref() {
        Some("tls") => "tls".to_string(),
        _ => "none".to_string(),
    };

    // `#` 后的名称优先于 ps
    let name = match hint {
        Some(hint) => hint.to_string(),
        None => text(&raw.ps).unwrap_or_default(),
    };

    Ok(ServerDescriptor::vmess(
        &name,
        &address,
        port,
        VmessSettings {
            user_id,
            alter_id,
            network: text(&raw.net)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "tcp".to_string()),
            security,
            ws_path: text(&raw.path).unwrap_or_default(),
        },
    ))
}

fn parse_shadowsocks(payload: &str, hint: Option<&str>) -> Result<ServerDescriptor, DecodeError> {
    // SIP002: base64(method:password)@host:port[/?plugin=...]
    let plain = match payload.split_once('@') {
        Some((userinfo, host_port)) => {
            let userinfo = match decode_base64_text(userinfo) {
                Ok(decoded) if decoded.contains(':') => decoded,
                _ => urlencoding::decode(userinfo)?.into_owned(),
            };
            let host_port = host_port
                .split(['/', '?'])
                .next()
                .unwrap_or(host_port);
            format!("{}@{}", userinfo, host_port)
        }
        None => decode_base64_text(payload)?,
    };

    let (method, password, host, port) = split_shadowsocks_uri(plain.trim())?;

    Ok(ServerDescriptor::shadowsocks(
        hint.unwrap_or_default(),
        host,
        port,
        ShadowsocksSettings {
            method: method.to_string(),
            password: password.to_string(),
        },
    ))
}

/// `method:password@host:port`：方法取第一个 `:` 前，密码取第一个 `@` 前，端口取最后一个 `:` 后
pub fn split_shadowsocks_uri(uri: &str) -> Result<(&str, &str, &str, u16), DecodeError> {
    let (method, rest) = uri
        .split_once(':')
        .ok_or(DecodeError::ShadowsocksUri("missing method separator `:`"))?;
    let (password, host_port) = rest
        .split_once('@')
        .ok_or(DecodeError::ShadowsocksUri("missing `@` before host"))?;
    let (host, port) = host_port
        .rsplit_once(':')
        .ok_or(DecodeError::ShadowsocksUri("missing port"))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if method.is_empty() {
        return Err(DecodeError::ShadowsocksUri("empty method"));
    }
    if host.is_empty() {
        return Err(DecodeError::ShadowsocksUri("empty host"));
    }
    let port = port
        .trim()
        .parse()
        .map_err(|_| DecodeError::ShadowsocksUri("invalid port"))?;

    Ok((method, password, host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProtocolKind, ProtocolSettings};
    use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};

    fn vmess_line(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    fn ss_line(plain: &str, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("ss://{}#{}", STANDARD.encode(plain), name),
            None => format!("ss://{}", STANDARD.encode(plain)),
        }
    }

    fn subscription(lines: &[String]) -> String {
        STANDARD.encode(lines.join("\n"))
    }

    const VMESS_A: &str = r#"{"ps":"A","add":"1.2.3.4","port":443,"id":"u1","aid":0,"net":"ws","tls":"tls","path":"/x"}"#;

    #[test]
    fn vmess_entry_decodes() {
        let node = decode_entry(&vmess_line(VMESS_A)).unwrap();

        assert_eq!(node.display_name, "A");
        assert_eq!(node.address, "1.2.3.4");
        assert_eq!(node.port, 443);
        assert_eq!(node.kind(), ProtocolKind::VMess);
        assert!(node.uses_tls());
        match node.protocol {
            ProtocolSettings::VMess(v) => {
                assert_eq!(v.user_id, "u1");
                assert_eq!(v.network, "ws");
                assert_eq!(v.ws_path, "/x");
            }
            other => panic!("unexpected protocol {:?}", other),
        }
    }

    #[test]
    fn vmess_accepts_string_numbers_and_defaults() {
        let json = r#"{"ps":" B ","add":"h.example","port":"8443","id":"u2","aid":"64","tls":""}"#;
        let node = decode_entry(&vmess_line(json)).unwrap();

        assert_eq!(node.display_name, "B");
        assert_eq!(node.port, 8443);
        assert!(!node.uses_tls());
        match node.protocol {
            ProtocolSettings::VMess(v) => {
                assert_eq!(v.alter_id, 64);
                assert_eq!(v.network, "tcp");
                assert_eq!(v.security, "none");
                assert_eq!(v.ws_path, "");
            }
            other => panic!("unexpected protocol {:?}", other),
        }
    }

    #[test]
    fn vmess_hint_overrides_ps() {
        let line = format!("{}#%E9%A6%99%E6%B8%AF", vmess_line(VMESS_A));
        let node = decode_entry(&line).unwrap();
        assert_eq!(node.display_name, "香港");
    }

    #[test]
    fn vmess_missing_field_is_typed() {
        let json = r#"{"ps":"A","port":443,"id":"u1"}"#;
        let err = decode_entry(&vmess_line(json)).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("add")));
    }

    #[test]
    fn vmess_bad_port_is_rejected() {
        let json = r#"{"add":"1.2.3.4","port":"99999","id":"u1"}"#;
        let err = decode_entry(&vmess_line(json)).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "port", .. }));
    }

    #[test]
    fn vmess_payload_without_padding() {
        let line = format!("vmess://{}", URL_SAFE_NO_PAD.encode(VMESS_A));
        let node = decode_entry(&line).unwrap();
        assert_eq!(node.address, "1.2.3.4");
    }

    #[test]
    fn shadowsocks_entry_with_hint() {
        let line = ss_line("aes-256-gcm:pw@5.6.7.8:8388", Some("MyNode"));
        let node = decode_entry(&line).unwrap();

        assert_eq!(node.display_name, "MyNode");
        assert_eq!(node.kind(), ProtocolKind::Shadowsocks);
        assert_eq!(node.address, "5.6.7.8");
        assert_eq!(node.port, 8388);
        match node.protocol {
            ProtocolSettings::Shadowsocks(s) => {
                assert_eq!(s.method, "aes-256-gcm");
                assert_eq!(s.password, "pw");
            }
            other => panic!("unexpected protocol {:?}", other),
        }
    }

    #[test]
    fn shadowsocks_sip002_form() {
        let line = format!(
            "ss://{}@ss.example.com:443/?plugin=obfs#Edge",
            URL_SAFE_NO_PAD.encode("chacha20-ietf-poly1305:secret")
        );
        let node = decode_entry(&line).unwrap();

        assert_eq!(node.display_name, "Edge");
        assert_eq!(node.address, "ss.example.com");
        assert_eq!(node.port, 443);
    }

    #[test]
    fn shadowsocks_split_uses_first_colon_first_at_last_colon() {
        let (method, password, host, port) =
            split_shadowsocks_uri("aes-128-gcm:p:w@[2001:db8::1]:8388").unwrap();
        assert_eq!(method, "aes-128-gcm");
        assert_eq!(password, "p:w");
        assert_eq!(host, "2001:db8::1");
        assert_eq!(port, 8388);
    }

    #[test]
    fn shadowsocks_malformed_is_error() {
        let err = decode_entry(&ss_line("aes-256-gcm-pw-5.6.7.8", None)).unwrap_err();
        assert!(matches!(err, DecodeError::ShadowsocksUri(_)));

        let err = decode_entry(&ss_line("aes-256-gcm:pw@5.6.7.8", None)).unwrap_err();
        assert!(matches!(err, DecodeError::ShadowsocksUri(_)));

        let err = decode_entry(&ss_line("aes-256-gcm:pw@5.6.7.8:port", None)).unwrap_err();
        assert!(matches!(err, DecodeError::ShadowsocksUri("invalid port")));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = decode_entry("trojan://pw@host:443").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownScheme(ref s) if s == "trojan"));

        let err = decode_entry("just some text").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownScheme(_)));
    }

    #[test]
    fn padding_correction_is_idempotent() {
        assert_eq!(pad_base64("abcd"), "abcd");
        assert_eq!(pad_base64("abc"), "abc=");
        assert_eq!(pad_base64("ab"), "ab==");
        assert_eq!(pad_base64("abc="), "abc=");
        assert_eq!(pad_base64(&pad_base64("ab")), "ab==");

        for len in 1..=6 {
            let input = "x".repeat(len);
            let padded = STANDARD.encode(&input);
            let unpadded = STANDARD_NO_PAD.encode(&input);
            assert_eq!(
                decode_base64_text(&padded).unwrap(),
                decode_base64_text(&unpadded).unwrap()
            );
        }
    }

    #[test]
    fn subscription_keeps_line_order_and_skips_blank_lines() {
        let lines = vec![
            vmess_line(VMESS_A),
            String::new(),
            ss_line("aes-256-gcm:pw@5.6.7.8:8388", Some("S1")),
            "   ".to_string(),
            vmess_line(r#"{"ps":"C","add":"9.9.9.9","port":80,"id":"u3"}"#),
        ];
        let nodes = decode_subscription(&subscription(&lines), false).unwrap();

        let names: Vec<_> = nodes.iter().map(|n| n.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "S1", "C"]);
    }

    #[test]
    fn subscription_skips_bad_entries_unless_strict() {
        let lines = vec![
            vmess_line(VMESS_A),
            "vmess://!!!not-base64!!!".to_string(),
            ss_line("aes-256-gcm:pw@5.6.7.8:8388", Some("S1")),
        ];
        let text = subscription(&lines);

        let nodes = decode_subscription(&text, false).unwrap();
        assert_eq!(nodes.len(), 2);

        let err = decode_subscription(&text, true).unwrap_err();
        assert!(matches!(err, DecodeError::Entry { line: 2, .. }));
    }

    #[test]
    fn decode_entries_reports_line_numbers() {
        let lines = vec![
            vmess_line(VMESS_A),
            "http://example.com".to_string(),
        ];
        let entries = decode_entries(&subscription(&lines)).unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_ok());
        match &entries[1] {
            Err(DecodeError::Entry { line, source }) => {
                assert_eq!(*line, 2);
                assert!(matches!(**source, DecodeError::UnknownScheme(_)));
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn plain_uri_list_is_accepted() {
        let text = format!("{}\n{}", vmess_line(VMESS_A), ss_line("rc4-md5:x@h:1", None));
        let nodes = decode_subscription(&text, true).unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn garbage_subscription_body_is_fatal() {
        assert!(decode_subscription("%%% definitely not base64 %%%", false).is_err());
        assert!(matches!(
            decode_subscription("", false),
            Err(DecodeError::EmptyPayload)
        ));
    }
}
