//! Parsers and emitters for the supported node URI schemes, plus the
//! subscription-body recognition logic that decides how a fetched payload
//! should be interpreted.

pub mod clash;
mod ss;
mod ssr;
mod trojan;
mod vless;
mod vmess;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use thiserror::Error;

use crate::models::ProxyNode;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed URI: {0}")]
    MalformedUri(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
}

const NODE_URI_PREFIXES: [&str; 5] = ["ss://", "ssr://", "vmess://", "vless://", "trojan://"];

pub fn is_node_uri(line: &str) -> bool {
    NODE_URI_PREFIXES.iter().any(|p| line.starts_with(p))
}

pub fn parse_uri(uri: &str) -> Result<ProxyNode, CodecError> {
    let scheme = uri.split("://").next().unwrap_or("").to_lowercase();
    match scheme.as_str() {
        "ss" => ss::parse(uri),
        "ssr" => ssr::parse(uri),
        "vmess" => vmess::parse(uri),
        "vless" => vless::parse(uri),
        "trojan" => trojan::parse(uri),
        other => Err(CodecError::UnsupportedScheme(other.to_owned())),
    }
}

/// Canonical URI form. `parse_uri(format_uri(node))` reproduces `node`
/// exactly for every node this codec can produce.
pub fn format_uri(node: &ProxyNode) -> String {
    match node {
        ProxyNode::Shadowsocks(c) => ss::format(c),
        ProxyNode::ShadowsocksR(c) => ssr::format(c),
        ProxyNode::Vmess(c) => vmess::format(c),
        ProxyNode::Vless(c) => vless::format(c),
        ProxyNode::Trojan(c) => trojan::format(c),
    }
}

/// A subscription body after format recognition.
#[derive(Debug)]
pub enum DecodedBody {
    /// Structured proxy-list document; entries still need per-entry parsing.
    Clash(Vec<serde_yaml::Mapping>),
    /// Line-oriented content, already split and trimmed.
    Lines(Vec<String>),
}

/// Classify a fetched body: structured document first, then whole-body
/// base64, then raw lines.
pub fn decode_body(raw: &str) -> DecodedBody {
    if let Some(entries) = clash::document_entries(raw) {
        return DecodedBody::Clash(entries);
    }

    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if let Ok(bytes) = decode_base64_loose(&compact) {
        if let Ok(text) = String::from_utf8(bytes) {
            return DecodedBody::Lines(split_lines(&text));
        }
    }

    DecodedBody::Lines(split_lines(raw))
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Base64 decode accepting either alphabet, with missing padding
/// re-synthesized before the attempt.
pub(crate) fn decode_base64_loose(input: &str) -> Result<Vec<u8>, CodecError> {
    let bare = input.trim().trim_end_matches('=');
    let padded = match bare.len() % 4 {
        0 => bare.to_owned(),
        2 => format!("{bare}=="),
        3 => format!("{bare}="),
        _ => return Err(CodecError::DecodeFailed("truncated base64".into())),
    };
    STANDARD
        .decode(&padded)
        .or_else(|_| URL_SAFE.decode(&padded))
        .map_err(|e| CodecError::DecodeFailed(e.to_string()))
}

pub(crate) fn decode_base64_string(input: &str) -> Result<String, CodecError> {
    let bytes = decode_base64_loose(input)?;
    String::from_utf8(bytes).map_err(|e| CodecError::DecodeFailed(e.to_string()))
}

/// `#fragment` decoding for display names.
pub(crate) fn decode_fragment(fragment: Option<&str>) -> Option<String> {
    fragment.filter(|f| !f.is_empty()).map(|f| {
        url::form_urlencoded::parse(f.as_bytes())
            .next()
            .map(|(k, _)| k.into_owned())
            .unwrap_or_else(|| f.to_owned())
    })
}

pub(crate) fn encode_fragment(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

/// Host part for URI or socket-address output: IPv6 literals regain
/// their brackets.
pub fn format_host(server: &str) -> String {
    if server.contains(':') && !server.starts_with('[') {
        format!("[{server}]")
    } else {
        server.to_owned()
    }
}

pub(crate) fn strip_brackets(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

pub(crate) fn parse_port(raw: &str) -> Result<u16, CodecError> {
    let port: u16 = raw
        .parse()
        .map_err(|_| CodecError::MalformedUri(format!("invalid port: {raw}")))?;
    if port == 0 {
        return Err(CodecError::MalformedUri("port must be non-zero".into()));
    }
    Ok(port)
}
