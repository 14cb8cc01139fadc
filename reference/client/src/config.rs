//! Lock client configuration.

use std::time::Duration;

use turnstile_common::constants::{
    default_session_timeout, DEFAULT_ROOT_PATH, DEFAULT_SEPARATOR,
};

/// Configuration for a lock client.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Address of the coordination service.
    pub connect_string: String,
    /// Node under which tokens are created.
    pub root_path: String,
    /// Reserved separator between lock name and sequence suffix.
    pub separator: String,
    /// Session timeout requested from the service. Bounds how long a
    /// crashed holder keeps the lock.
    pub session_timeout: Duration,
    /// Bound of a single watch wait inside `lock()`. The rank is
    /// re-evaluated after each cycle, fired or not.
    pub wait_cycle: Duration,
    /// Delete the token when a bounded wait gives up.
    pub withdraw_on_timeout: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            connect_string: "127.0.0.1:2181".to_string(),
            root_path: DEFAULT_ROOT_PATH.to_string(),
            separator: DEFAULT_SEPARATOR.to_string(),
            session_timeout: default_session_timeout(),
            wait_cycle: default_session_timeout(),
            withdraw_on_timeout: true,
        }
    }
}

impl LockConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(connect) = std::env::var("TURNSTILE_CONNECT") {
            config.connect_string = connect;
        }

        if let Ok(root) = std::env::var("TURNSTILE_ROOT") {
            config.root_path = root;
        }

        if let Ok(separator) = std::env::var("TURNSTILE_SEPARATOR") {
            config.separator = separator;
        }

        if let Ok(timeout) = std::env::var("TURNSTILE_SESSION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.session_timeout = Duration::from_millis(ms);
                config.wait_cycle = config.session_timeout;
            }
        }

        if let Ok(cycle) = std::env::var("TURNSTILE_WAIT_CYCLE_MS") {
            if let Ok(ms) = cycle.parse() {
                config.wait_cycle = Duration::from_millis(ms);
            }
        }

        if let Ok(withdraw) = std::env::var("TURNSTILE_WITHDRAW_ON_TIMEOUT") {
            if let Ok(withdraw) = withdraw.parse() {
                config.withdraw_on_timeout = withdraw;
            }
        }

        config
    }

    /// Use a different root path.
    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    /// Use a different session timeout; the wait cycle follows it.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self.wait_cycle = timeout;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.root_path.starts_with('/') {
            return Err("Root path must be absolute".to_string());
        }

        if self.root_path == "/" || self.root_path.ends_with('/') || self.root_path.contains("//") {
            return Err(format!("Root path '{}' is not a valid node path", self.root_path));
        }

        if self.separator.is_empty() {
            return Err("Separator cannot be empty".to_string());
        }

        if self.separator.contains('/') {
            return Err("Separator cannot contain '/'".to_string());
        }

        if self.session_timeout.is_zero() {
            return Err("Session timeout cannot be zero".to_string());
        }

        if self.wait_cycle.is_zero() {
            return Err("Wait cycle cannot be zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.root_path, "/locks");
        assert_eq!(config.separator, "_lock_");
        assert_eq!(config.session_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_root_path() {
        for root in ["locks", "/", "/locks/", "/a//b"] {
            let config = LockConfig::default().with_root_path(root);
            assert!(config.validate().is_err(), "{} should be rejected", root);
        }

        let config = LockConfig::default().with_root_path("/app/locks");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_separator() {
        let mut config = LockConfig::default();
        config.separator = String::new();
        assert!(config.validate().is_err());

        config.separator = "/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_timeout_drives_wait_cycle() {
        let config = LockConfig::default().with_session_timeout(Duration::from_millis(200));
        assert_eq!(config.wait_cycle, Duration::from_millis(200));

        let mut config = config;
        config.session_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
