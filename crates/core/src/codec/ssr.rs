use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use super::{CodecError, decode_base64_string, parse_port};
use crate::models::{ProxyNode, ShadowsocksRConfig};

/// `ssr://base64(host:port:protocol:method:obfs:password_b64/?params)`
/// where each param value is itself base64.
pub(super) fn parse(uri: &str) -> Result<ProxyNode, CodecError> {
    let body = uri
        .strip_prefix("ssr://")
        .ok_or_else(|| CodecError::MalformedUri("missing ssr:// prefix".into()))?;
    let decoded = decode_base64_string(body)?;

    let (main, query) = match decoded.split_once("/?") {
        Some((m, q)) => (m, Some(q)),
        None => (decoded.as_str(), None),
    };

    // split from the right so an IPv6 host keeps its colons
    let mut fields: Vec<&str> = main.rsplitn(6, ':').collect();
    if fields.len() != 6 {
        return Err(CodecError::MalformedUri(
            "expected host:port:protocol:method:obfs:password".into(),
        ));
    }
    fields.reverse();
    let [host, port_str, protocol, method, obfs, password_b64] = fields[..] else {
        unreachable!()
    };
    if host.is_empty() {
        return Err(CodecError::MalformedUri("empty host".into()));
    }

    let mut config = ShadowsocksRConfig {
        server: host.to_owned(),
        port: parse_port(port_str)?,
        protocol: protocol.to_owned(),
        method: method.to_owned(),
        obfs: obfs.to_owned(),
        password: decode_base64_string(password_b64)?,
        obfs_param: None,
        proto_param: None,
        group: None,
        remark: None,
        extra: BTreeMap::new(),
    };

    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "obfsparam" => config.obfs_param = decode_optional(value)?,
                "protoparam" => config.proto_param = decode_optional(value)?,
                "remarks" => config.remark = decode_optional(value)?,
                "group" => config.group = decode_optional(value)?,
                other => {
                    config.extra.insert(other.to_owned(), value.to_owned());
                }
            }
        }
    }

    Ok(ProxyNode::ShadowsocksR(config))
}

fn decode_optional(value: &str) -> Result<Option<String>, CodecError> {
    let decoded = decode_base64_string(value)?;
    Ok(if decoded.is_empty() { None } else { Some(decoded) })
}

pub(super) fn format(c: &ShadowsocksRConfig) -> String {
    let mut params = Vec::new();
    for (key, value) in [
        ("obfsparam", &c.obfs_param),
        ("protoparam", &c.proto_param),
        ("remarks", &c.remark),
        ("group", &c.group),
    ] {
        if let Some(value) = value {
            params.push(format!("{key}={}", URL_SAFE_NO_PAD.encode(value)));
        }
    }
    for (key, value) in &c.extra {
        params.push(format!("{key}={value}"));
    }

    let mut body = format!(
        "{}:{}:{}:{}:{}:{}",
        c.server,
        c.port,
        c.protocol,
        c.method,
        c.obfs,
        URL_SAFE_NO_PAD.encode(&c.password)
    );
    if !params.is_empty() {
        body.push_str("/?");
        body.push_str(&params.join("&"));
    }

    format!("ssr://{}", URL_SAFE_NO_PAD.encode(body))
}
