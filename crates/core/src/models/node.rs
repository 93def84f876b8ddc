use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol")]
pub enum ProxyNode {
    #[serde(rename = "ss")]
    Shadowsocks(ShadowsocksConfig),
    #[serde(rename = "ssr")]
    ShadowsocksR(ShadowsocksRConfig),
    #[serde(rename = "vmess")]
    Vmess(VmessConfig),
    #[serde(rename = "vless")]
    Vless(VlessConfig),
    #[serde(rename = "trojan")]
    Trojan(TrojanConfig),
}

impl ProxyNode {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Shadowsocks(_) => "ss",
            Self::ShadowsocksR(_) => "ssr",
            Self::Vmess(_) => "vmess",
            Self::Vless(_) => "vless",
            Self::Trojan(_) => "trojan",
        }
    }

    pub fn server(&self) -> &str {
        match self {
            Self::Shadowsocks(c) => &c.server,
            Self::ShadowsocksR(c) => &c.server,
            Self::Vmess(c) => &c.server,
            Self::Vless(c) => &c.server,
            Self::Trojan(c) => &c.server,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Shadowsocks(c) => c.port,
            Self::ShadowsocksR(c) => c.port,
            Self::Vmess(c) => c.port,
            Self::Vless(c) => c.port,
            Self::Trojan(c) => c.port,
        }
    }

    pub fn remark(&self) -> Option<&str> {
        match self {
            Self::Shadowsocks(c) => c.remark.as_deref(),
            Self::ShadowsocksR(c) => c.remark.as_deref(),
            Self::Vmess(c) => c.remark.as_deref(),
            Self::Vless(c) => c.remark.as_deref(),
            Self::Trojan(c) => c.remark.as_deref(),
        }
    }

    /// Display name, synthesized from the endpoint when the source
    /// carried no remark.
    pub fn display_name(&self) -> String {
        match self.remark() {
            Some(r) if !r.is_empty() => r.to_owned(),
            _ => format!("{}-{}:{}", self.scheme(), self.server(), self.port()),
        }
    }

    /// Deduplication key: scheme, lowercased server, port. IPv6 literals
    /// lose their brackets here regardless of how the URI spelled them.
    pub fn canonical_key(&self) -> NodeKey {
        let server = self
            .server()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_lowercase();
        NodeKey {
            scheme: self.scheme(),
            server,
            port: self.port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub scheme: &'static str,
    pub server: String,
    pub port: u16,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.server, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksConfig {
    pub server: String,
    pub port: u16,
    pub method: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksRConfig {
    pub server: String,
    pub port: u16,
    pub protocol: String,
    pub method: String,
    pub obfs: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs_param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto_param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmessConfig {
    pub server: String,
    pub port: u16,
    pub uuid: String,
    #[serde(default)]
    pub alter_id: u32,
    #[serde(default = "default_vmess_security")]
    pub security: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

fn default_vmess_security() -> String {
    "auto".to_owned()
}

fn default_network() -> String {
    "tcp".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlessConfig {
    pub server: String,
    pub port: u16,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrojanConfig {
    pub server: String,
    pub port: u16,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
    #[serde(default)]
    pub allow_insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Why a probe did not produce a usable endpoint. Recorded for diagnostics;
/// scoring only sees the binary valid/invalid outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    Timeout,
    Refused,
    Unreachable,
    DnsFailed,
    Cancelled,
    Other(String),
}

impl ProbeOutcome {
    pub fn reason(&self) -> &str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Refused => "refused",
            Self::Unreachable => "unreachable",
            Self::DnsFailed => "dns_failed",
            Self::Cancelled => "cancelled",
            Self::Other(msg) => msg,
        }
    }
}

/// A parsed node inside one run: the endpoint itself plus where it came
/// from and what the validator measured. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolNode {
    pub node: ProxyNode,
    pub source_url: String,
    pub latency_ms: Option<u64>,
    pub outcome: Option<ProbeOutcome>,
}

impl PoolNode {
    pub fn new(node: ProxyNode, source_url: impl Into<String>) -> Self {
        Self {
            node,
            source_url: source_url.into(),
            latency_ms: None,
            outcome: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.outcome, Some(ProbeOutcome::Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ss(server: &str, port: u16) -> ProxyNode {
        ProxyNode::Shadowsocks(ShadowsocksConfig {
            server: server.into(),
            port,
            method: "aes-256-gcm".into(),
            password: "secret".into(),
            remark: None,
            extra: Default::default(),
        })
    }

    #[test]
    fn test_canonical_key_lowercases_server() {
        let node = sample_ss("EXAMPLE.COM", 8388);
        let key = node.canonical_key();
        assert_eq!(key.server, "example.com");
        assert_eq!(key.port, 8388);
        assert_eq!(key.scheme, "ss");
    }

    #[test]
    fn test_canonical_key_strips_ipv6_brackets() {
        let node = sample_ss("[2001:DB8::1]", 443);
        assert_eq!(node.canonical_key().server, "2001:db8::1");
    }

    #[test]
    fn test_canonical_key_collapses_case_variants() {
        let a = sample_ss("example.com", 10086);
        let b = sample_ss("EXAMPLE.COM", 10086);
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_display_name_prefers_remark() {
        let node = ProxyNode::Shadowsocks(ShadowsocksConfig {
            server: "example.com".into(),
            port: 443,
            method: "aes-256-gcm".into(),
            password: "x".into(),
            remark: Some("HK-01".into()),
            extra: Default::default(),
        });
        assert_eq!(node.display_name(), "HK-01");
    }

    #[test]
    fn test_display_name_synthesized_when_missing() {
        let node = sample_ss("example.com", 443);
        assert_eq!(node.display_name(), "ss-example.com:443");
    }

    #[test]
    fn test_tagged_serialization() {
        let node = sample_ss("example.com", 443);
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains(r#""protocol":"ss""#));
        let back: ProxyNode = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }

    #[test]
    fn test_pool_node_validity() {
        let mut pn = PoolNode::new(sample_ss("example.com", 443), "https://sub.example/a");
        assert!(!pn.is_valid());
        pn.outcome = Some(ProbeOutcome::Ok);
        assert!(pn.is_valid());
        pn.outcome = Some(ProbeOutcome::Refused);
        assert!(!pn.is_valid());
        assert_eq!(pn.outcome.as_ref().unwrap().reason(), "refused");
    }
}
