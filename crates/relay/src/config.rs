// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The CORS layer reads its own variable in cors.rs.

use std::net::SocketAddr;

use huddle_common::types::Identity;

const DEV_JWT_SECRET: &str = "huddle_local_development_jwt_secret_must_be_32_chars";

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret used to verify identity tokens.
    pub jwt_secret: String,
    /// Log filter directive (e.g. `info`, `huddle_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Literal credential that resolves to the guest identity without
    /// token verification. `None` disables it.
    pub demo_credential: Option<String>,
    /// Identity synthesized for demo logins and unauthenticated joins.
    pub guest_identity: Identity,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `HUDDLE_RELAY_HOST` | `0.0.0.0` |
    /// | `HUDDLE_RELAY_PORT` | `5000` |
    /// | `HUDDLE_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `HUDDLE_RELAY_LOG_FILTER` | `info` |
    /// | `HUDDLE_RELAY_LOG_FORMAT` | `text` (`json` for structured output) |
    /// | `HUDDLE_RELAY_DEMO_CREDENTIAL` | `demo_token_123` (empty disables) |
    /// | `HUDDLE_RELAY_GUEST_ID` | `demo_user_123` |
    /// | `HUDDLE_RELAY_GUEST_NAME` | `Demo User` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("HUDDLE_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("HUDDLE_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(5000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("HUDDLE_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let log_filter = env("HUDDLE_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("HUDDLE_RELAY_LOG_FORMAT").ok().as_deref().map(str::trim) {
            Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let demo_credential = match env("HUDDLE_RELAY_DEMO_CREDENTIAL") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(value),
            Err(_) => Some("demo_token_123".into()),
        };

        let guest_id = env("HUDDLE_RELAY_GUEST_ID").unwrap_or_else(|_| "demo_user_123".into());
        let guest_name = env("HUDDLE_RELAY_GUEST_NAME").unwrap_or_else(|_| "Demo User".into());

        Self {
            listen_addr,
            jwt_secret,
            log_filter,
            log_format,
            demo_credential,
            guest_identity: Identity::new(guest_id, guest_name),
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 5000);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.is_dev_jwt_secret());
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.demo_credential.as_deref(), Some("demo_token_123"));
        assert_eq!(cfg.guest_identity, Identity::new("demo_user_123", "Demo User"));
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_RELAY_HOST", "127.0.0.1");
        m.insert("HUDDLE_RELAY_PORT", "3000");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_RELAY_PORT", "not_a_number");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 5000);
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_RELAY_JWT_SECRET", "production_secret_at_least_32_chars!!");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.is_dev_jwt_secret());
        assert_eq!(cfg.jwt_secret, "production_secret_at_least_32_chars!!");
    }

    #[test]
    fn log_filter_and_json_format_override() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_RELAY_LOG_FILTER", "debug,tower_http=trace");
        m.insert("HUDDLE_RELAY_LOG_FORMAT", "JSON");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,tower_http=trace");
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn empty_demo_credential_disables_demo_login() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_RELAY_DEMO_CREDENTIAL", "  ");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert!(cfg.demo_credential.is_none());
    }

    #[test]
    fn guest_identity_override() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_RELAY_GUEST_ID", "guest");
        m.insert("HUDDLE_RELAY_GUEST_NAME", "Visitor");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.guest_identity, Identity::new("guest", "Visitor"));
    }
}
