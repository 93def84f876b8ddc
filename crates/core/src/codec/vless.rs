use std::collections::BTreeMap;

use super::{CodecError, decode_fragment, encode_fragment, format_host, strip_brackets};
use crate::models::{ProxyNode, VlessConfig};

/// `vless://uuid@host:port?query#name`
pub(super) fn parse(uri: &str) -> Result<ProxyNode, CodecError> {
    let url = url::Url::parse(uri).map_err(|e| CodecError::MalformedUri(e.to_string()))?;

    let uuid = url.username().to_owned();
    if uuid.is_empty() {
        return Err(CodecError::MalformedUri("missing UUID".into()));
    }
    let server = url
        .host_str()
        .ok_or_else(|| CodecError::MalformedUri("missing host".into()))?;
    let port = url
        .port()
        .ok_or_else(|| CodecError::MalformedUri("missing port".into()))?;

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        if !value.is_empty() {
            params.insert(key.into_owned(), value.into_owned());
        }
    }
    let mut known = |key: &str| params.remove(key);

    Ok(ProxyNode::Vless(VlessConfig {
        server: strip_brackets(server).to_owned(),
        port,
        uuid,
        encryption: known("encryption"),
        flow: known("flow"),
        security: known("security"),
        sni: known("sni"),
        alpn: known("alpn"),
        fingerprint: known("fp"),
        network: known("type"),
        host: known("host"),
        path: known("path"),
        service_name: known("serviceName"),
        remark: decode_fragment(url.fragment()),
        extra: params,
    }))
}

pub(super) fn format(c: &VlessConfig) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in [
        ("encryption", &c.encryption),
        ("flow", &c.flow),
        ("security", &c.security),
        ("sni", &c.sni),
        ("alpn", &c.alpn),
        ("fp", &c.fingerprint),
        ("type", &c.network),
        ("host", &c.host),
        ("path", &c.path),
        ("serviceName", &c.service_name),
    ] {
        if let Some(value) = value {
            query.append_pair(key, value);
        }
    }
    for (key, value) in &c.extra {
        query.append_pair(key, value);
    }
    let query = query.finish();

    let mut uri = format!("vless://{}@{}:{}", c.uuid, format_host(&c.server), c.port);
    if !query.is_empty() {
        uri.push('?');
        uri.push_str(&query);
    }
    if let Some(remark) = &c.remark {
        uri.push('#');
        uri.push_str(&encode_fragment(remark));
    }
    uri
}
