use std::collections::BTreeMap;

use super::{CodecError, decode_fragment, encode_fragment, format_host, strip_brackets};
use crate::models::{ProxyNode, TrojanConfig};

/// `trojan://password@host:port?query#name`
pub(super) fn parse(uri: &str) -> Result<ProxyNode, CodecError> {
    let url = url::Url::parse(uri).map_err(|e| CodecError::MalformedUri(e.to_string()))?;

    let password = url.username().to_owned();
    if password.is_empty() {
        return Err(CodecError::MalformedUri("missing password".into()));
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
    let allow_insecure = matches!(
        params.remove("allowInsecure").as_deref(),
        Some("1") | Some("true")
    );
    let mut known = |key: &str| params.remove(key);

    Ok(ProxyNode::Trojan(TrojanConfig {
        server: strip_brackets(server).to_owned(),
        port,
        password,
        sni: known("sni"),
        alpn: known("alpn"),
        allow_insecure,
        peer: known("peer"),
        network: known("type"),
        host: known("host"),
        path: known("path"),
        remark: decode_fragment(url.fragment()),
        extra: params,
    }))
}

pub(super) fn format(c: &TrojanConfig) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in [
        ("sni", &c.sni),
        ("alpn", &c.alpn),
        ("peer", &c.peer),
        ("type", &c.network),
        ("host", &c.host),
        ("path", &c.path),
    ] {
        if let Some(value) = value {
            query.append_pair(key, value);
        }
    }
    if c.allow_insecure {
        query.append_pair("allowInsecure", "1");
    }
    for (key, value) in &c.extra {
        query.append_pair(key, value);
    }
    let query = query.finish();

    let mut uri = format!("trojan://{}@{}:{}", c.password, format_host(&c.server), c.port);
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
