//! Session tuning knobs.

use serde::{Deserialize, Serialize};

/// Configuration for one synchronization session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum wire units delivered per transport call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Resolve an unregistered back-reference via a GetRef fetch instead of
    /// failing immediately with a missing-reference error.
    #[serde(default = "default_lazy_ref_fetch")]
    pub lazy_ref_fetch: bool,
}

fn default_batch_size() -> usize {
    256
}

fn default_lazy_ref_fetch() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lazy_ref_fetch: default_lazy_ref_fetch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: SessionConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config, SessionConfig::default());

        let config: SessionConfig =
            serde_json::from_str(r#"{"batch_size": 8}"#).expect("parse");
        assert_eq!(config.batch_size, 8);
        assert!(config.lazy_ref_fetch);
    }
}
