use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How the validator decides a node is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Full TCP connect with latency measurement.
    #[default]
    Strict,
    /// Name resolution only; any resolvable host counts as valid with a
    /// synthetic latency of zero.
    Lenient,
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown validation mode: {other}")),
        }
    }
}

/// Runtime tuning knobs. Defaults are overridable through the process
/// environment; an unparseable value logs a warning and keeps the default.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub fetch_timeout: Duration,
    pub fetcher_concurrency: usize,
    pub tcp_timeout: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_latency_ms: u64,
    pub max_output_nodes: usize,
    pub compact_output_nodes: usize,
    pub validation_mode: ValidationMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(45),
            fetcher_concurrency: 8,
            tcp_timeout: Duration::from_secs(8),
            batch_size: 20,
            batch_delay: Duration::from_millis(500),
            max_latency_ms: 2000,
            max_output_nodes: 100,
            compact_output_nodes: 20,
            validation_mode: ValidationMode::Strict,
        }
    }
}

const MAX_BATCH_SIZE: usize = 200;
const MIN_BATCH_DELAY: Duration = Duration::from_millis(10);

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; `from_env` feeds it the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut settings = Self {
            fetch_timeout: Duration::from_secs(parse_key(
                &lookup,
                "subscription_fetch_timeout_s",
                defaults.fetch_timeout.as_secs(),
            )),
            tcp_timeout: Duration::from_secs(parse_key(
                &lookup,
                "tcp_probe_timeout_s",
                defaults.tcp_timeout.as_secs(),
            )),
            batch_size: parse_key(&lookup, "batch_size", defaults.batch_size),
            batch_delay: Duration::from_secs_f64(parse_key(
                &lookup,
                "batch_delay_s",
                defaults.batch_delay.as_secs_f64(),
            )),
            max_latency_ms: parse_key(&lookup, "max_latency_ms", defaults.max_latency_ms),
            max_output_nodes: parse_key(&lookup, "max_output_nodes", defaults.max_output_nodes),
            validation_mode: parse_key(&lookup, "validation_mode", defaults.validation_mode),
            ..defaults
        };

        settings.batch_size = settings.batch_size.clamp(1, MAX_BATCH_SIZE);
        if !settings.batch_delay.is_zero() && settings.batch_delay < MIN_BATCH_DELAY {
            settings.batch_delay = MIN_BATCH_DELAY;
        }
        settings
    }
}

fn parse_key<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("ignoring unparseable {key}={raw:?}");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.fetch_timeout, Duration::from_secs(45));
        assert_eq!(s.tcp_timeout, Duration::from_secs(8));
        assert_eq!(s.batch_size, 20);
        assert_eq!(s.batch_delay, Duration::from_millis(500));
        assert_eq!(s.max_latency_ms, 2000);
        assert_eq!(s.max_output_nodes, 100);
        assert_eq!(s.validation_mode, ValidationMode::Strict);
    }

    #[test]
    fn test_lookup_overrides() {
        let s = Settings::from_lookup(lookup_from(&[
            ("subscription_fetch_timeout_s", "10"),
            ("tcp_probe_timeout_s", "3"),
            ("batch_size", "50"),
            ("batch_delay_s", "0.05"),
            ("max_latency_ms", "1500"),
            ("max_output_nodes", "25"),
            ("validation_mode", "lenient"),
        ]));
        assert_eq!(s.fetch_timeout, Duration::from_secs(10));
        assert_eq!(s.tcp_timeout, Duration::from_secs(3));
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.batch_delay, Duration::from_millis(50));
        assert_eq!(s.max_latency_ms, 1500);
        assert_eq!(s.max_output_nodes, 25);
        assert_eq!(s.validation_mode, ValidationMode::Lenient);
    }

    #[test]
    fn test_unparseable_value_keeps_default() {
        let s = Settings::from_lookup(lookup_from(&[
            ("batch_size", "many"),
            ("validation_mode", "yolo"),
        ]));
        assert_eq!(s.batch_size, 20);
        assert_eq!(s.validation_mode, ValidationMode::Strict);
    }

    #[test]
    fn test_batch_bounds() {
        let s = Settings::from_lookup(lookup_from(&[("batch_size", "1000")]));
        assert_eq!(s.batch_size, 200);
        let s = Settings::from_lookup(lookup_from(&[("batch_size", "0")]));
        assert_eq!(s.batch_size, 1);
        let s = Settings::from_lookup(lookup_from(&[("batch_delay_s", "0.001")]));
        assert_eq!(s.batch_delay, Duration::from_millis(10));
        let s = Settings::from_lookup(lookup_from(&[("batch_delay_s", "0")]));
        assert!(s.batch_delay.is_zero());
    }
}
