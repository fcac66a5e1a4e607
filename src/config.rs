use crate::error::{Error, Result};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,
    pub reconnect_delay: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("WATCH_NAMESPACE") {
            if !val.is_empty() && val != "*" {
                config.namespace = Some(val);
            }
        }

        if let Ok(val) = std::env::var("WATCH_RECONNECT_SECS") {
            let secs: u64 = val.parse().map_err(|_| {
                Error::InvalidConfig("Invalid WATCH_RECONNECT_SECS".to_string())
            })?;
            config.reconnect_delay = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
