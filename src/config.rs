use anyhow::{anyhow, Context};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_TX_RETRIES: u32 = 5;
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_LOG_FILTER: &str = "enrolld=info";

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub tx_retries: u32,
    pub admin_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            tx_retries: DEFAULT_TX_RETRIES,
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(ws) = lookup("ENROLLD_WORKSPACE").filter(|s| !s.trim().is_empty()) {
            cfg.workspace = Some(PathBuf::from(ws));
        }
        if let Some(raw) = lookup("ENROLLD_BUSY_TIMEOUT_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("ENROLLD_BUSY_TIMEOUT_MS is not a number: {}", raw))?;
            cfg.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("ENROLLD_TX_RETRIES") {
            cfg.tx_retries = raw
                .trim()
                .parse()
                .with_context(|| format!("ENROLLD_TX_RETRIES is not a number: {}", raw))?;
        }
        if let Some(pw) = lookup("ENROLLD_ADMIN_PASSWORD") {
            if pw.is_empty() {
                return Err(anyhow!("ENROLLD_ADMIN_PASSWORD must not be empty"));
            }
            cfg.admin_password = pw;
        }

        Ok(cfg)
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let cfg = Config::from_lookup(lookup_from(&[])).expect("config");
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.busy_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.tx_retries, 5);
        assert_eq!(cfg.admin_password, "admin123");
    }

    #[test]
    fn env_overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("ENROLLD_WORKSPACE", "/tmp/ws"),
            ("ENROLLD_BUSY_TIMEOUT_MS", "250"),
            ("ENROLLD_TX_RETRIES", "2"),
            ("ENROLLD_ADMIN_PASSWORD", "s3cret!"),
        ]))
        .expect("config");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.busy_timeout, Duration::from_millis(250));
        assert_eq!(cfg.tx_retries, 2);
        assert_eq!(cfg.admin_password, "s3cret!");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("ENROLLD_BUSY_TIMEOUT_MS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("ENROLLD_ADMIN_PASSWORD", "")])).is_err());
    }
}
