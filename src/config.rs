//! Server configuration flags (spec §6), read from the environment with
//! defaults, in the teacher's `RateLimitConfig::from_env` style.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub require_auth: bool,
    pub allow_anonymous: bool,
    pub auto_create_rooms: bool,
    pub save_on_operation: bool,
    /// Messages per second per connection, token-bucket refilled.
    pub rate_limit: f64,
    pub rate_limit_window_secs: f64,
    pub max_message_size: usize,
    pub message_timeout_secs: f64,
    pub function_timeout_secs: f64,
    pub max_connections_per_user: usize,
    pub auth_max_attempts: u32,
    pub auth_lockout_secs: f64,
    pub presence_stale_timeout_secs: f64,
    pub presence_cleanup_interval_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            require_auth: false,
            allow_anonymous: true,
            auto_create_rooms: true,
            save_on_operation: false,
            rate_limit: 10.0,
            rate_limit_window_secs: 1.0,
            max_message_size: 65536,
            message_timeout_secs: 60.0,
            function_timeout_secs: 30.0,
            max_connections_per_user: 10,
            auth_max_attempts: 5,
            auth_lockout_secs: 300.0,
            presence_stale_timeout_secs: 60.0,
            presence_cleanup_interval_secs: 30.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("COLLAB_REQUIRE_AUTH")
            && let Ok(b) = val.parse::<bool>()
        {
            config.require_auth = b;
        }
        if let Ok(val) = env::var("COLLAB_ALLOW_ANONYMOUS")
            && let Ok(b) = val.parse::<bool>()
        {
            config.allow_anonymous = b;
        }
        if let Ok(val) = env::var("COLLAB_AUTO_CREATE_ROOMS")
            && let Ok(b) = val.parse::<bool>()
        {
            config.auto_create_rooms = b;
        }
        if let Ok(val) = env::var("COLLAB_SAVE_ON_OPERATION")
            && let Ok(b) = val.parse::<bool>()
        {
            config.save_on_operation = b;
        }
        if let Ok(val) = env::var("COLLAB_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            config.rate_limit = n;
        }
        if let Ok(val) = env::var("COLLAB_RATE_LIMIT_WINDOW_SECS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.rate_limit_window_secs = n;
        }
        if let Ok(val) = env::var("COLLAB_MAX_MESSAGE_SIZE")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_message_size = n;
        }
        if let Ok(val) = env::var("COLLAB_MESSAGE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.message_timeout_secs = n;
        }
        if let Ok(val) = env::var("COLLAB_FUNCTION_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.function_timeout_secs = n;
        }
        if let Ok(val) = env::var("COLLAB_MAX_CONNECTIONS_PER_USER")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_connections_per_user = n;
        }
        if let Ok(val) = env::var("COLLAB_AUTH_MAX_ATTEMPTS")
            && let Ok(n) = val.parse::<u32>()
        {
            config.auth_max_attempts = n;
        }
        if let Ok(val) = env::var("COLLAB_AUTH_LOCKOUT_SECS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.auth_lockout_secs = n;
        }
        if let Ok(val) = env::var("COLLAB_PRESENCE_STALE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.presence_stale_timeout_secs = n;
        }
        if let Ok(val) = env::var("COLLAB_PRESENCE_CLEANUP_INTERVAL_SECS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.presence_cleanup_interval_secs = n;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert!(config.allow_anonymous);
        assert!(!config.require_auth);
        assert_eq!(config.auth_max_attempts, 5);
        assert_eq!(config.auth_lockout_secs, 300.0);
    }
}
