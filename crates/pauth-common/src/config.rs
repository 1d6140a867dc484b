//! Layered configuration: built-in defaults, an optional file, then
//! `PAUTH__*` environment variables, in that priority order.

use serde::Deserialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Which registered [`crate::group::GroupParams`] new registrations use
    /// by default when the client does not name one explicitly.
    pub default_group_id: String,
    /// Minutes a minted pairing token remains valid before expiry.
    pub pairing_token_ttl_minutes: i64,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 65432,
            default_group_id: "modp-1536".to_string(),
            pairing_token_ttl_minutes: 10,
            log_filter: "info".to_string(),
        }
    }
}

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Load configuration once and cache it for the process lifetime.
///
/// `config_file` overrides the default search for `pauth.toml` in the
/// current directory; pass `None` to use the default search path.
pub fn load(config_file: Option<&str>) -> Result<&'static AppConfig, config::ConfigError> {
    if let Some(existing) = CONFIG.get() {
        return Ok(existing);
    }

    let _ = dotenvy::dotenv();

    let defaults = AppConfig::default();
    let mut builder = config::Config::builder()
        .set_default("host", defaults.host)?
        .set_default("port", defaults.port as i64)?
        .set_default("default_group_id", defaults.default_group_id)?
        .set_default("pairing_token_ttl_minutes", defaults.pairing_token_ttl_minutes)?
        .set_default("log_filter", defaults.log_filter)?;

    let file_name = config_file.unwrap_or("pauth.toml");
    builder = builder.add_source(config::File::with_name(file_name).required(false));
    builder = builder.add_source(
        config::Environment::with_prefix("PAUTH")
            .separator("__")
            .try_parsing(true),
    );

    let parsed: AppConfig = builder.build()?.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| parsed))
}

/// Install a [`tracing_subscriber`] global subscriber driven by
/// `config.log_filter`. Idempotent — safe to call once at binary startup.
pub fn init_tracing(log_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_deployment_values() {
        let defaults = AppConfig::default();
        assert_eq!(defaults.port, 65432);
        assert_eq!(defaults.default_group_id, "modp-1536");
        assert_eq!(defaults.pairing_token_ttl_minutes, 10);
    }
}
