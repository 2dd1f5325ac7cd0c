use std::{env, fmt, fs::read_to_string, str::FromStr};

use taskeval_core::UnlockSettings;
use taskeval_core::impls::{GroqConfig, RazorpayConfig};
use tracing::{info, warn};

/// Development secrets used by the offline mode when none are configured.
const OFFLINE_KEY_ID: &str = "rzp_test_offline";
const OFFLINE_KEY_SECRET: &str = "offline_key_secret";
const OFFLINE_WEBHOOK_SECRET: &str = "offline_webhook_secret";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required in remote mode")]
    MissingSecret(&'static str),

    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where the evaluator and the payment gateway live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorMode {
    /// Groq and Razorpay over HTTPS.
    Remote,
    /// Scripted in-process stand-ins.
    Offline,
}

impl FromStr for CollaboratorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(CollaboratorMode::Remote),
            "offline" => Ok(CollaboratorMode::Offline),
            other => Err(format!("expected remote or offline, got {other}")),
        }
    }
}

impl fmt::Display for CollaboratorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollaboratorMode::Remote => "remote",
            CollaboratorMode::Offline => "offline",
        })
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// `None` keeps everything in memory.
    pub database_path: Option<String>,
    pub mode: CollaboratorMode,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: String,
    pub razorpay_base_url: Option<String>,
    pub groq_api_key: Option<String>,
    pub groq_model: Option<String>,
    pub groq_base_url: Option<String>,
    pub settings: UnlockSettings,
}

impl Config {
    /// Environment variables, with secrets also read from `/run/secrets/<NAME>`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok().or_else(|| read_secret(key)))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = try_load(&var, "COLLABORATOR_MODE", CollaboratorMode::Offline)?;
        let secret = |key: &'static str, offline: &str| match (var(key), mode) {
            (Some(value), _) => Ok(value.trim().to_string()),
            (None, CollaboratorMode::Offline) => Ok(offline.to_string()),
            (None, CollaboratorMode::Remote) => Err(ConfigError::MissingSecret(key)),
        };

        let razorpay_key_id = secret("RAZORPAY_KEY_ID", OFFLINE_KEY_ID)?;
        let razorpay_key_secret = secret("RAZORPAY_KEY_SECRET", OFFLINE_KEY_SECRET)?;
        let razorpay_webhook_secret = secret("RAZORPAY_WEBHOOK_SECRET", OFFLINE_WEBHOOK_SECRET)?;
        let groq_api_key = match mode {
            CollaboratorMode::Remote => Some(secret("GROQ_API_KEY", "")?),
            CollaboratorMode::Offline => var("GROQ_API_KEY"),
        };

        let defaults = UnlockSettings::default();
        let settings = UnlockSettings {
            currency: var("CURRENCY").unwrap_or(defaults.currency),
            default_amount: try_load(&var, "UNLOCK_PRICE", defaults.default_amount)?,
            lock_unpaid_results: try_load(&var, "LOCK_UNPAID_RESULTS", defaults.lock_unpaid_results)?,
            initial_credits: try_load(&var, "INITIAL_CREDITS", defaults.initial_credits)?,
            evaluator_timeout_ms: try_load(&var, "EVALUATOR_TIMEOUT_MS", defaults.evaluator_timeout_ms)?,
            gateway_timeout_ms: try_load(&var, "GATEWAY_TIMEOUT_MS", defaults.gateway_timeout_ms)?,
            capture_retry_attempts: try_load(
                &var,
                "CAPTURE_RETRY_ATTEMPTS",
                defaults.capture_retry_attempts,
            )?,
            capture_retry_base_ms: try_load(&var, "CAPTURE_RETRY_BASE_MS", defaults.capture_retry_base_ms)?,
            rate_limit_max_requests: try_load(
                &var,
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            rate_limit_window_ms: try_load(&var, "RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms)?,
            status_poll_interval_ms: try_load(
                &var,
                "STATUS_POLL_INTERVAL_MS",
                defaults.status_poll_interval_ms,
            )?,
            status_poll_max_attempts: try_load(
                &var,
                "STATUS_POLL_MAX_ATTEMPTS",
                defaults.status_poll_max_attempts,
            )?,
            status_max_wait_ms: try_load(&var, "STATUS_MAX_WAIT_MS", defaults.status_max_wait_ms)?,
        };

        Ok(Self {
            port: try_load(&var, "PORT", 3000)?,
            database_path: var("DATABASE_PATH").filter(|p| p != ":memory:"),
            mode,
            razorpay_key_id,
            razorpay_key_secret,
            razorpay_webhook_secret,
            razorpay_base_url: var("RAZORPAY_BASE_URL"),
            groq_api_key,
            groq_model: var("GROQ_MODEL"),
            groq_base_url: var("GROQ_BASE_URL"),
            settings,
        })
    }

    pub fn razorpay(&self) -> RazorpayConfig {
        let mut config = RazorpayConfig::new(&self.razorpay_key_id, &self.razorpay_key_secret);
        if let Some(url) = &self.razorpay_base_url {
            config.base_url = url.clone();
        }
        config.timeout = self.settings.gateway_timeout();
        config
    }

    pub fn groq(&self) -> Option<GroqConfig> {
        let mut config = GroqConfig::new(self.groq_api_key.as_deref()?);
        if let Some(model) = &self.groq_model {
            config.model = model.clone();
        }
        if let Some(url) = &self.groq_base_url {
            config.base_url = url.clone();
        }
        config.timeout = self.settings.evaluator_timeout();
        Some(config)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_path", &self.database_path)
            .field("mode", &self.mode)
            .field("razorpay_key_id", &self.razorpay_key_id)
            .field("groq_model", &self.groq_model)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn try_load<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + fmt::Display,
    T::Err: fmt::Display,
{
    match var(key) {
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
        Some(value) => value.trim().parse().map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }
        }),
    }
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");
    read_to_string(&path).map(|s| s.trim().to_string()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn offline_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.mode, CollaboratorMode::Offline);
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_path, None);
        assert_eq!(config.razorpay_key_id, OFFLINE_KEY_ID);
        assert_eq!(config.settings, UnlockSettings::default());
        assert!(config.groq().is_none());
    }

    #[test]
    fn remote_requires_secrets() {
        let err = Config::from_lookup(lookup(&[("COLLABORATOR_MODE", "remote")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret("RAZORPAY_KEY_ID")));

        let config = Config::from_lookup(lookup(&[
            ("COLLABORATOR_MODE", "Remote"),
            ("RAZORPAY_KEY_ID", "rzp_live_1"),
            ("RAZORPAY_KEY_SECRET", "s1"),
            ("RAZORPAY_WEBHOOK_SECRET", "w1"),
            ("GROQ_API_KEY", "gsk_1"),
            ("GROQ_MODEL", "llama-3.1-8b-instant"),
        ]))
        .unwrap();
        assert_eq!(config.mode, CollaboratorMode::Remote);
        let groq = config.groq().unwrap();
        assert_eq!(groq.model, "llama-3.1-8b-instant");
        assert_eq!(config.razorpay().key_id, "rzp_live_1");
    }

    #[test]
    fn settings_come_from_environment() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("DATABASE_PATH", "/var/lib/taskeval.db"),
            ("UNLOCK_PRICE", "49.5"),
            ("LOCK_UNPAID_RESULTS", "true"),
            ("INITIAL_CREDITS", "3"),
            ("RATE_LIMIT_WINDOW_MS", "1000"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_path.as_deref(), Some("/var/lib/taskeval.db"));
        assert_eq!(config.settings.default_amount, 49.5);
        assert!(config.settings.lock_unpaid_results);
        assert_eq!(config.settings.initial_credits, 3);
        assert_eq!(config.settings.rate_limit_window_ms, 1000);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn debug_hides_secrets() {
        let config = Config::from_lookup(lookup(&[("RAZORPAY_KEY_SECRET", "very-secret")])).unwrap();
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
