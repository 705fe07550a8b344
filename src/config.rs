//! Bootstrap configuration. Defaults match the production retry budget; each knob can be
//! overridden from the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::identity::RetryPolicy;

pub const ENV_MAX_ATTEMPTS: &str = "FILMOTECA_RETRY_MAX_ATTEMPTS";
pub const ENV_BUDGET_MS: &str = "FILMOTECA_RETRY_BUDGET_MS";
pub const ENV_BASE_MS: &str = "FILMOTECA_RETRY_BASE_MS";
pub const ENV_MAX_DELAY_MS: &str = "FILMOTECA_RETRY_MAX_DELAY_MS";
pub const ENV_JITTER_MS: &str = "FILMOTECA_RETRY_JITTER_MS";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "BootstrapConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// Wall-clock budget measured from the first profile fetch.
    #[serde(default = "BootstrapConfig::default_budget_ms")]
    pub budget_ms: u64,
    #[serde(default = "BootstrapConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "BootstrapConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "BootstrapConfig::default_jitter_ms")]
    pub jitter_ms: u64,
}

impl BootstrapConfig {
    fn default_max_attempts() -> u32 { 5 }
    fn default_budget_ms() -> u64 { 30_000 }
    fn default_base_delay_ms() -> u64 { 1_000 }
    fn default_max_delay_ms() -> u64 { 30_000 }
    fn default_jitter_ms() -> u64 { 1_000 }

    /// Defaults overlaid with any `FILMOTECA_RETRY_*` variables present.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env` with an injectable lookup, so tests never touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = parse_var(&lookup, ENV_MAX_ATTEMPTS) { cfg.max_attempts = v; }
        if let Some(v) = parse_var(&lookup, ENV_BUDGET_MS) { cfg.budget_ms = v; }
        if let Some(v) = parse_var(&lookup, ENV_BASE_MS) { cfg.base_delay_ms = v; }
        if let Some(v) = parse_var(&lookup, ENV_MAX_DELAY_MS) { cfg.max_delay_ms = v; }
        if let Some(v) = parse_var(&lookup, ENV_JITTER_MS) { cfg.jitter_ms = v; }
        if cfg.max_attempts == 0 {
            warn!(target: "filmoteca::config", "{}=0 would never fetch; using 1", ENV_MAX_ATTEMPTS);
            cfg.max_attempts = 1;
        }
        cfg
    }

    pub fn into_policy(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            budget: Duration::from_millis(self.budget_ms),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            budget_ms: Self::default_budget_ms(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            jitter_ms: Self::default_jitter_ms(),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(target: "filmoteca::config", "ignoring unparsable {}='{}'", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_retry_budget() {
        let p = BootstrapConfig::default().into_policy();
        assert_eq!(p, RetryPolicy::default());
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.budget, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_ATTEMPTS, "3"),
            (ENV_BUDGET_MS, "not-a-number"),
            (ENV_JITTER_MS, " 0 "),
        ]
        .into_iter()
        .collect();
        let cfg = BootstrapConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.budget_ms, 30_000);
        assert_eq!(cfg.jitter_ms, 0);
        assert_eq!(cfg.base_delay_ms, 1_000);
    }

    #[test]
    fn zero_attempts_clamped() {
        let cfg = BootstrapConfig::from_lookup(|k| (k == ENV_MAX_ATTEMPTS).then(|| "0".to_string()));
        assert_eq!(cfg.max_attempts, 1);
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: BootstrapConfig = serde_json::from_str(r#"{"max_attempts": 2}"#).unwrap();
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.max_delay_ms, 30_000);
    }
}
