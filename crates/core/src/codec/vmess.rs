use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use super::{CodecError, decode_base64_string};
use crate::models::{ProxyNode, VmessConfig};

const KNOWN_KEYS: [&str; 13] = [
    "v", "ps", "add", "port", "id", "aid", "scy", "net", "type", "host", "path", "tls", "sni",
];

/// `vmess://<base64 JSON>` per the V2RayN share format. `port` and `aid`
/// appear in the wild as both strings and numbers; both are accepted.
pub(super) fn parse(uri: &str) -> Result<ProxyNode, CodecError> {
    let body = uri
        .strip_prefix("vmess://")
        .ok_or_else(|| CodecError::MalformedUri("missing vmess:// prefix".into()))?;
    let decoded = decode_base64_string(body)?;
    let json: Value = serde_json::from_str(&decoded)
        .map_err(|e| CodecError::DecodeFailed(format!("invalid JSON: {e}")))?;
    let obj = json
        .as_object()
        .ok_or_else(|| CodecError::DecodeFailed("JSON body is not an object".into()))?;

    let server = string_field(obj, "add")
        .ok_or_else(|| CodecError::MalformedUri("missing 'add' field".into()))?;
    let port = u64_field(obj, "port")
        .ok_or_else(|| CodecError::MalformedUri("missing 'port' field".into()))?;
    if port == 0 || port > u64::from(u16::MAX) {
        return Err(CodecError::MalformedUri(format!("invalid port: {port}")));
    }
    let uuid = string_field(obj, "id")
        .ok_or_else(|| CodecError::MalformedUri("missing 'id' field".into()))?;

    let mut extra = BTreeMap::new();
    for (key, value) in obj {
        if KNOWN_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(text) = scalar_to_string(value) {
            extra.insert(key.clone(), text);
        }
    }

    Ok(ProxyNode::Vmess(VmessConfig {
        server,
        port: port as u16,
        uuid,
        alter_id: u64_field(obj, "aid").unwrap_or(0) as u32,
        security: string_field(obj, "scy").unwrap_or_else(|| "auto".to_owned()),
        network: string_field(obj, "net").unwrap_or_else(|| "tcp".to_owned()),
        header_type: string_field(obj, "type"),
        host: string_field(obj, "host"),
        path: string_field(obj, "path"),
        tls: string_field(obj, "tls"),
        sni: string_field(obj, "sni"),
        version: string_field(obj, "v"),
        remark: string_field(obj, "ps"),
        extra,
    }))
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn u64_field(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(super) fn format(c: &VmessConfig) -> String {
    let mut obj = Map::new();
    obj.insert("add".into(), Value::String(c.server.clone()));
    obj.insert("port".into(), Value::String(c.port.to_string()));
    obj.insert("id".into(), Value::String(c.uuid.clone()));
    obj.insert("aid".into(), Value::Number(c.alter_id.into()));
    obj.insert("scy".into(), Value::String(c.security.clone()));
    obj.insert("net".into(), Value::String(c.network.clone()));
    for (key, value) in [
        ("type", &c.header_type),
        ("host", &c.host),
        ("path", &c.path),
        ("tls", &c.tls),
        ("sni", &c.sni),
        ("v", &c.version),
        ("ps", &c.remark),
    ] {
        if let Some(value) = value {
            obj.insert(key.into(), Value::String(value.clone()));
        }
    }
    for (key, value) in &c.extra {
        obj.insert(key.clone(), Value::String(value.clone()));
    }

    let json = Value::Object(obj).to_string();
    format!("vmess://{}", STANDARD.encode(json))
}
