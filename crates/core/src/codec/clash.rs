//! Structured proxy-list documents: a YAML mapping with a `proxies:`
//! sequence, as produced by Clash-family clients. The `type` field of each
//! entry selects the protocol; recognized fields map onto the node config
//! and everything else rides along in `extra`.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use super::CodecError;
use crate::models::{
    ProxyNode, ShadowsocksConfig, ShadowsocksRConfig, TrojanConfig, VlessConfig, VmessConfig,
};

/// Returns the entries of a structured document, or `None` when the body is
/// not one (wrong shape, or plain text that happens to parse as YAML).
pub fn document_entries(raw: &str) -> Option<Vec<Mapping>> {
    let doc: Value = serde_yaml::from_str(raw).ok()?;
    let proxies = doc.as_mapping()?.get("proxies")?;
    match proxies {
        Value::Null => Some(Vec::new()),
        Value::Sequence(seq) => Some(
            seq.iter()
                .filter_map(|v| v.as_mapping().cloned())
                .collect(),
        ),
        _ => None,
    }
}

pub fn parse_entry(entry: &Mapping) -> Result<ProxyNode, CodecError> {
    let kind = str_of(entry, "type")
        .ok_or_else(|| CodecError::MalformedUri("proxy entry without type".into()))?;
    let server = str_of(entry, "server")
        .ok_or_else(|| CodecError::MalformedUri("proxy entry without server".into()))?;
    let port = u16_of(entry, "port")
        .ok_or_else(|| CodecError::MalformedUri("proxy entry without valid port".into()))?;
    let remark = str_of(entry, "name");

    let consumed: &[&str] = match kind.as_str() {
        "ss" => &["type", "server", "port", "name", "cipher", "password"],
        "ssr" => &[
            "type", "server", "port", "name", "cipher", "password", "protocol", "obfs",
            "protocol-param", "obfs-param", "group",
        ],
        "vmess" => &[
            "type", "server", "port", "name", "uuid", "alterId", "cipher", "network", "tls",
            "servername", "ws-opts", "grpc-opts",
        ],
        "vless" => &[
            "type", "server", "port", "name", "uuid", "flow", "network", "tls", "servername",
            "client-fingerprint", "ws-opts", "grpc-opts",
        ],
        "trojan" => &[
            "type", "server", "port", "name", "password", "sni", "alpn", "skip-cert-verify",
            "network", "ws-opts", "grpc-opts",
        ],
        other => return Err(CodecError::UnsupportedScheme(other.to_owned())),
    };
    let extra = leftover_fields(entry, consumed);

    let node = match kind.as_str() {
        "ss" => ProxyNode::Shadowsocks(ShadowsocksConfig {
            server,
            port,
            method: str_of(entry, "cipher")
                .ok_or_else(|| CodecError::MalformedUri("ss entry without cipher".into()))?,
            password: str_of(entry, "password")
                .ok_or_else(|| CodecError::MalformedUri("ss entry without password".into()))?,
            remark,
            extra,
        }),
        "ssr" => ProxyNode::ShadowsocksR(ShadowsocksRConfig {
            server,
            port,
            protocol: str_of(entry, "protocol").unwrap_or_else(|| "origin".to_owned()),
            method: str_of(entry, "cipher")
                .ok_or_else(|| CodecError::MalformedUri("ssr entry without cipher".into()))?,
            obfs: str_of(entry, "obfs").unwrap_or_else(|| "plain".to_owned()),
            password: str_of(entry, "password")
                .ok_or_else(|| CodecError::MalformedUri("ssr entry without password".into()))?,
            obfs_param: str_of(entry, "obfs-param"),
            proto_param: str_of(entry, "protocol-param"),
            group: str_of(entry, "group"),
            remark,
            extra,
        }),
        "vmess" => ProxyNode::Vmess(VmessConfig {
            server,
            port,
            uuid: str_of(entry, "uuid")
                .ok_or_else(|| CodecError::MalformedUri("vmess entry without uuid".into()))?,
            alter_id: u16_of(entry, "alterId").unwrap_or(0) as u32,
            security: str_of(entry, "cipher").unwrap_or_else(|| "auto".to_owned()),
            network: str_of(entry, "network").unwrap_or_else(|| "tcp".to_owned()),
            header_type: None,
            host: ws_host(entry),
            path: transport_path(entry).or_else(|| grpc_service_name(entry)),
            tls: bool_of(entry, "tls").then(|| "tls".to_owned()),
            sni: str_of(entry, "servername"),
            version: None,
            remark,
            extra,
        }),
        "vless" => ProxyNode::Vless(VlessConfig {
            server,
            port,
            uuid: str_of(entry, "uuid")
                .ok_or_else(|| CodecError::MalformedUri("vless entry without uuid".into()))?,
            encryption: None,
            flow: str_of(entry, "flow"),
            security: bool_of(entry, "tls").then(|| "tls".to_owned()),
            sni: str_of(entry, "servername"),
            alpn: None,
            fingerprint: str_of(entry, "client-fingerprint"),
            network: str_of(entry, "network"),
            host: ws_host(entry),
            path: transport_path(entry),
            service_name: grpc_service_name(entry),
            remark,
            extra,
        }),
        "trojan" => ProxyNode::Trojan(TrojanConfig {
            server,
            port,
            password: str_of(entry, "password")
                .ok_or_else(|| CodecError::MalformedUri("trojan entry without password".into()))?,
            sni: str_of(entry, "sni"),
            alpn: alpn_of(entry),
            allow_insecure: bool_of(entry, "skip-cert-verify"),
            peer: None,
            network: str_of(entry, "network"),
            host: ws_host(entry),
            path: transport_path(entry).or_else(|| grpc_service_name(entry)),
            remark,
            extra,
        }),
        _ => unreachable!(),
    };
    Ok(node)
}

/// Clash-shaped mapping for one node, used when emitting the ranked
/// document artifact.
pub fn to_entry(node: &ProxyNode) -> Mapping {
    let mut m = Mapping::new();
    put(&mut m, "name", Value::String(node.display_name()));
    put(&mut m, "type", Value::String(node.scheme().to_owned()));
    put(&mut m, "server", Value::String(node.server().to_owned()));
    put(&mut m, "port", Value::Number(node.port().into()));

    match node {
        ProxyNode::Shadowsocks(c) => {
            put(&mut m, "cipher", Value::String(c.method.clone()));
            put(&mut m, "password", Value::String(c.password.clone()));
            put_extras(&mut m, &c.extra);
        }
        ProxyNode::ShadowsocksR(c) => {
            put(&mut m, "cipher", Value::String(c.method.clone()));
            put(&mut m, "password", Value::String(c.password.clone()));
            put(&mut m, "protocol", Value::String(c.protocol.clone()));
            put(&mut m, "obfs", Value::String(c.obfs.clone()));
            if let Some(v) = &c.proto_param {
                put(&mut m, "protocol-param", Value::String(v.clone()));
            }
            if let Some(v) = &c.obfs_param {
                put(&mut m, "obfs-param", Value::String(v.clone()));
            }
            if let Some(v) = &c.group {
                put(&mut m, "group", Value::String(v.clone()));
            }
            put_extras(&mut m, &c.extra);
        }
        ProxyNode::Vmess(c) => {
            put(&mut m, "uuid", Value::String(c.uuid.clone()));
            put(&mut m, "alterId", Value::Number(c.alter_id.into()));
            put(&mut m, "cipher", Value::String(c.security.clone()));
            put(&mut m, "network", Value::String(c.network.clone()));
            if c.tls.is_some() {
                put(&mut m, "tls", Value::Bool(true));
            }
            if let Some(v) = &c.sni {
                put(&mut m, "servername", Value::String(v.clone()));
            }
            if c.network == "grpc" {
                // the share format carries the grpc service name in `path`
                if let Some(v) = &c.path {
                    let mut opts = Mapping::new();
                    put(&mut opts, "grpc-service-name", Value::String(v.clone()));
                    put(&mut m, "grpc-opts", Value::Mapping(opts));
                }
            } else {
                put_transport_opts(&mut m, c.network.as_str(), &c.host, &c.path);
            }
            put_extras(&mut m, &c.extra);
        }
        ProxyNode::Vless(c) => {
            put(&mut m, "uuid", Value::String(c.uuid.clone()));
            if c.security.is_some() {
                put(&mut m, "tls", Value::Bool(true));
            }
            if let Some(v) = &c.flow {
                put(&mut m, "flow", Value::String(v.clone()));
            }
            if let Some(v) = &c.sni {
                put(&mut m, "servername", Value::String(v.clone()));
            }
            if let Some(v) = &c.fingerprint {
                put(&mut m, "client-fingerprint", Value::String(v.clone()));
            }
            let network = c.network.clone().unwrap_or_else(|| "tcp".to_owned());
            put(&mut m, "network", Value::String(network.clone()));
            if network == "grpc" {
                if let Some(v) = &c.service_name {
                    let mut opts = Mapping::new();
                    put(&mut opts, "grpc-service-name", Value::String(v.clone()));
                    put(&mut m, "grpc-opts", Value::Mapping(opts));
                }
            } else {
                put_transport_opts(&mut m, &network, &c.host, &c.path);
            }
            put_extras(&mut m, &c.extra);
        }
        ProxyNode::Trojan(c) => {
            put(&mut m, "password", Value::String(c.password.clone()));
            if let Some(v) = &c.sni {
                put(&mut m, "sni", Value::String(v.clone()));
            }
            if let Some(v) = &c.alpn {
                let list: Vec<Value> = v
                    .split(',')
                    .map(|s| Value::String(s.trim().to_owned()))
                    .collect();
                put(&mut m, "alpn", Value::Sequence(list));
            }
            if c.allow_insecure {
                put(&mut m, "skip-cert-verify", Value::Bool(true));
            }
            if let Some(network) = &c.network {
                put(&mut m, "network", Value::String(network.clone()));
                put_transport_opts(&mut m, network, &c.host, &c.path);
            }
            put_extras(&mut m, &c.extra);
        }
    }
    m
}

/// Whole-document form: `{proxies: [...]}`.
pub fn document_for(nodes: &[&ProxyNode]) -> Value {
    let proxies: Vec<Value> = nodes
        .iter()
        .map(|n| Value::Mapping(to_entry(n)))
        .collect();
    let mut doc = Mapping::new();
    put(&mut doc, "proxies", Value::Sequence(proxies));
    Value::Mapping(doc)
}

fn put(m: &mut Mapping, key: &str, value: Value) {
    m.insert(Value::String(key.to_owned()), value);
}

fn put_extras(m: &mut Mapping, extra: &BTreeMap<String, String>) {
    for (key, value) in extra {
        put(m, key, Value::String(value.clone()));
    }
}

fn put_transport_opts(m: &mut Mapping, network: &str, host: &Option<String>, path: &Option<String>) {
    if network != "ws" || (host.is_none() && path.is_none()) {
        return;
    }
    let mut opts = Mapping::new();
    if let Some(path) = path {
        put(&mut opts, "path", Value::String(path.clone()));
    }
    if let Some(host) = host {
        let mut headers = Mapping::new();
        put(&mut headers, "Host", Value::String(host.clone()));
        put(&mut opts, "headers", Value::Mapping(headers));
    }
    put(m, "ws-opts", Value::Mapping(opts));
}

fn str_of(m: &Mapping, key: &str) -> Option<String> {
    match m.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn u16_of(m: &Mapping, key: &str) -> Option<u16> {
    match m.get(key)? {
        Value::Number(n) => n.as_u64().filter(|&v| v > 0 && v <= 65535).map(|v| v as u16),
        Value::String(s) => s.parse().ok().filter(|&v| v > 0),
        _ => None,
    }
}

fn bool_of(m: &Mapping, key: &str) -> bool {
    m.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn alpn_of(m: &Mapping) -> Option<String> {
    match m.get("alpn")? {
        Value::Sequence(seq) => {
            let parts: Vec<&str> = seq.iter().filter_map(Value::as_str).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(","))
            }
        }
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn nested(m: &Mapping, key: &str) -> Option<Mapping> {
    m.get(key)?.as_mapping().cloned()
}

fn ws_host(m: &Mapping) -> Option<String> {
    let opts = nested(m, "ws-opts")?;
    let headers = nested(&opts, "headers")?;
    str_of(&headers, "Host")
}

fn transport_path(m: &Mapping) -> Option<String> {
    str_of(&nested(m, "ws-opts")?, "path")
}

fn grpc_service_name(m: &Mapping) -> Option<String> {
    str_of(&nested(m, "grpc-opts")?, "grpc-service-name")
}

fn leftover_fields(entry: &Mapping, consumed: &[&str]) -> BTreeMap<String, String> {
    let mut extra = BTreeMap::new();
    for (key, value) in entry {
        let Some(key) = key.as_str() else { continue };
        if consumed.contains(&key) {
            continue;
        }
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        extra.insert(key.to_owned(), text);
    }
    extra
}
