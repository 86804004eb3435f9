//! Credential configuration.
//!
//! Two free-form option strings from the cluster configuration feed this
//! subsystem: `auth_info` (carrying `cred_expire=<seconds>`) and
//! `launch_params` (carrying the identity-enrichment switches). The
//! struct deserializes straight out of the daemon's config file.

use serde::{Deserialize, Serialize};

/// Default credential freshness window, in seconds.
pub const DEFAULT_EXPIRATION_WINDOW: u64 = 120;

/// Smallest accepted `cred_expire` value, in seconds.
pub const MIN_CRED_EXPIRE: i64 = 5;

fn default_signer() -> String {
    "ed25519".to_string()
}

/// Configuration consumed at context construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredConfig {
    /// Comma-separated auth options; `cred_expire=<seconds>` is honored.
    #[serde(default)]
    pub auth_info: String,

    /// Comma-separated launch options; `enable_nss_corral` and
    /// `disable_send_gids` are honored.
    #[serde(default)]
    pub launch_params: String,

    /// Signing backend name.
    #[serde(default = "default_signer")]
    pub signer: String,
}

impl Default for CredConfig {
    fn default() -> Self {
        Self {
            auth_info: String::new(),
            launch_params: String::new(),
            signer: default_signer(),
        }
    }
}

impl CredConfig {
    /// Credential freshness window in seconds.
    ///
    /// Values below [`MIN_CRED_EXPIRE`] (including unparsable ones) fall
    /// back to [`DEFAULT_EXPIRATION_WINDOW`] with an error log.
    #[must_use]
    pub fn expire_window(&self) -> u64 {
        for option in self.auth_info.split(',') {
            if let Some(value) = option.trim().strip_prefix("cred_expire=") {
                let parsed = value.parse::<i64>().unwrap_or(0);
                if parsed < MIN_CRED_EXPIRE {
                    tracing::error!(cred_expire = parsed, "auth_info cred_expire invalid");
                    return DEFAULT_EXPIRATION_WINDOW;
                }
                #[allow(clippy::cast_sign_loss)] // >= MIN_CRED_EXPIRE > 0
                return parsed as u64;
            }
        }
        DEFAULT_EXPIRATION_WINDOW
    }

    /// Identity-enrichment switches as `(enable_nss, send_gids)`.
    ///
    /// `enable_nss_corral` wins: when present, gid sending stays on even
    /// if `disable_send_gids` is also present.
    #[must_use]
    pub fn launch_flags(&self) -> (bool, bool) {
        let params = self.launch_params.to_ascii_lowercase();
        if params.contains("enable_nss_corral") {
            (true, true)
        } else if params.contains("disable_send_gids") {
            (false, false)
        } else {
            (false, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window() {
        let config = CredConfig::default();
        assert_eq!(config.expire_window(), DEFAULT_EXPIRATION_WINDOW);
    }

    #[test]
    fn test_expire_window_parsed() {
        let config = CredConfig {
            auth_info: "socket=/run/auth,cred_expire=300".to_string(),
            ..CredConfig::default()
        };
        assert_eq!(config.expire_window(), 300);
    }

    #[test]
    fn test_expire_window_minimum_enforced() {
        let config = CredConfig {
            auth_info: "cred_expire=4".to_string(),
            ..CredConfig::default()
        };
        assert_eq!(config.expire_window(), DEFAULT_EXPIRATION_WINDOW);

        let config = CredConfig {
            auth_info: "cred_expire=5".to_string(),
            ..CredConfig::default()
        };
        assert_eq!(config.expire_window(), 5);
    }

    #[test]
    fn test_expire_window_garbage_falls_back() {
        let config = CredConfig {
            auth_info: "cred_expire=soon".to_string(),
            ..CredConfig::default()
        };
        assert_eq!(config.expire_window(), DEFAULT_EXPIRATION_WINDOW);
    }

    #[test]
    fn test_launch_flags_default() {
        assert_eq!(CredConfig::default().launch_flags(), (false, true));
    }

    #[test]
    fn test_launch_flags_nss() {
        let config = CredConfig {
            launch_params: "Enable_NSS_Corral".to_string(),
            ..CredConfig::default()
        };
        assert_eq!(config.launch_flags(), (true, true));
    }

    #[test]
    fn test_launch_flags_disable_gids() {
        let config = CredConfig {
            launch_params: "disable_send_gids".to_string(),
            ..CredConfig::default()
        };
        assert_eq!(config.launch_flags(), (false, false));
    }

    #[test]
    fn test_nss_takes_precedence_over_disable() {
        let config = CredConfig {
            launch_params: "disable_send_gids,enable_nss_corral".to_string(),
            ..CredConfig::default()
        };
        assert_eq!(config.launch_flags(), (true, true));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: CredConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.signer, "ed25519");
        assert!(config.auth_info.is_empty());

        let config: CredConfig =
            serde_json::from_str(r#"{"auth_info":"cred_expire=60","signer":"null"}"#).unwrap();
        assert_eq!(config.expire_window(), 60);
        assert_eq!(config.signer, "null");
    }
}
