use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use super::{
    CodecError, decode_base64_string, decode_fragment, encode_fragment, format_host, parse_port,
    strip_brackets,
};
use crate::models::{ProxyNode, ShadowsocksConfig};

/// `ss://<base64(method:password)>@host:port#name`, or the fully-encoded
/// `ss://<base64(method:password@host:port)>#name` variant.
pub(super) fn parse(uri: &str) -> Result<ProxyNode, CodecError> {
    let body = uri
        .strip_prefix("ss://")
        .ok_or_else(|| CodecError::MalformedUri("missing ss:// prefix".into()))?;

    let (body, fragment) = match body.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (body, None),
    };
    let remark = decode_fragment(fragment);

    let (method, password, host, port_str) = match body.split_once('@') {
        Some((userinfo_b64, host_port)) => {
            let userinfo = decode_base64_string(userinfo_b64)?;
            let (method, password) = userinfo
                .split_once(':')
                .ok_or_else(|| CodecError::MalformedUri("missing method:password".into()))?;
            let (host, port) = host_port
                .rsplit_once(':')
                .ok_or_else(|| CodecError::MalformedUri("missing host:port".into()))?;
            (method.to_owned(), password.to_owned(), host.to_owned(), port.to_owned())
        }
        None => {
            let decoded = decode_base64_string(body)?;
            let (userinfo, host_port) = decoded
                .rsplit_once('@')
                .ok_or_else(|| CodecError::MalformedUri("missing '@' separator".into()))?;
            let (method, password) = userinfo
                .split_once(':')
                .ok_or_else(|| CodecError::MalformedUri("missing method:password".into()))?;
            let (host, port) = host_port
                .rsplit_once(':')
                .ok_or_else(|| CodecError::MalformedUri("missing host:port".into()))?;
            (method.to_owned(), password.to_owned(), host.to_owned(), port.to_owned())
        }
    };

    if host.is_empty() {
        return Err(CodecError::MalformedUri("empty host".into()));
    }

    // the URI grammar has no parameter slot; extras only arrive via
    // structured documents
    Ok(ProxyNode::Shadowsocks(ShadowsocksConfig {
        server: strip_brackets(&host).to_owned(),
        port: parse_port(&port_str)?,
        method,
        password,
        remark,
        extra: BTreeMap::new(),
    }))
}

pub(super) fn format(c: &ShadowsocksConfig) -> String {
    let userinfo = URL_SAFE_NO_PAD.encode(format!("{}:{}", c.method, c.password));
    let mut uri = format!("ss://{}@{}:{}", userinfo, format_host(&c.server), c.port);
    if let Some(remark) = &c.remark {
        uri.push('#');
        uri.push_str(&encode_fragment(remark));
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_uri;

    #[test]
    fn test_parse_sip002() {
        let node = parse_uri("ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ=@1.2.3.4:443#test").unwrap();
        match node {
            ProxyNode::Shadowsocks(c) => {
                assert_eq!(c.server, "1.2.3.4");
                assert_eq!(c.port, 443);
                assert_eq!(c.method, "aes-256-gcm");
                assert_eq!(c.password, "password");
                assert_eq!(c.remark, Some("test".into()));
            }
            other => panic!("expected shadowsocks, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_accepts_missing_padding() {
        let padded = parse_uri("ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ=@1.2.3.4:443").unwrap();
        let unpadded = parse_uri("ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@1.2.3.4:443").unwrap();
        assert_eq!(padded, unpadded);
    }

    #[test]
    fn test_parse_fully_encoded_variant() {
        let payload = URL_SAFE_NO_PAD.encode("aes-128-gcm:p@ss@example.com:8388");
        let node = parse_uri(&format!("ss://{payload}#legacy")).unwrap();
        match node {
            ProxyNode::Shadowsocks(c) => {
                assert_eq!(c.server, "example.com");
                assert_eq!(c.port, 8388);
                assert_eq!(c.method, "aes-128-gcm");
                // passwords may themselves contain '@'
                assert_eq!(c.password, "p@ss");
                assert_eq!(c.remark, Some("legacy".into()));
            }
            other => panic!("expected shadowsocks, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ipv6_host() {
        let node = parse_uri("ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@[2001:db8::1]:8388").unwrap();
        assert_eq!(node.server(), "2001:db8::1");
        assert_eq!(node.port(), 8388);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_uri("ss://!!!not-base64!!!").is_err());
        assert!(parse_uri("ss://YWJj@host").is_err());
    }

    #[test]
    fn test_roundtrip() {
        let original = ProxyNode::Shadowsocks(ShadowsocksConfig {
            server: "example.com".into(),
            port: 8388,
            method: "chacha20-ietf-poly1305".into(),
            password: "sup3r:secret".into(),
            remark: Some("HK 01".into()),
            extra: BTreeMap::new(),
        });
        let uri = crate::codec::format_uri(&original);
        assert_eq!(parse_uri(&uri).unwrap(), original);
    }

    #[test]
    fn test_roundtrip_ipv6_keeps_brackets_in_uri() {
        let original = ProxyNode::Shadowsocks(ShadowsocksConfig {
            server: "2001:db8::1".into(),
            port: 443,
            method: "aes-256-gcm".into(),
            password: "x".into(),
            remark: None,
            extra: BTreeMap::new(),
        });
        let uri = crate::codec::format_uri(&original);
        assert!(uri.contains("[2001:db8::1]:443"));
        assert_eq!(parse_uri(&uri).unwrap(), original);
    }
}
