use std::{
    env, fs,
    path::Path,
    time::Duration,
};

use crate::{errors::Error, executor::HARD_CAP, Result};

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub admin_users: Vec<i64>,

    // Worker pool
    pub executor: ExecutorConfig,

    // Fan-out
    pub delivery_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub broadcast_max_recipients: usize,

    // Telegram limits
    pub telegram_safe_limit: usize,

    // Roster seed
    pub notification_types: Vec<String>,

    // Monitoring webhook (disabled unless API_PORT is set)
    pub webhook: Option<WebhookConfig>,
}

/// HTTP endpoint that turns monitoring payloads into notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
    /// Route path, always starting with `/`.
    pub endpoint: String,
    /// Notification type whose subscribers receive webhook payloads.
    pub notification_type: String,
}

impl WebhookConfig {
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(raw_port) = get("API_PORT").and_then(non_empty) else {
            return Ok(None);
        };
        let port = raw_port
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("API_PORT is not a valid port: {raw_port}")))?;

        let host = get("API_HOST")
            .and_then(non_empty)
            .map(|h| h.trim().to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let endpoint = get("WEBHOOK_ENDPOINT")
            .and_then(non_empty)
            .map(|e| e.trim().to_string())
            .unwrap_or_else(|| "/webhooks/zabbix".to_string());
        let endpoint = if endpoint.starts_with('/') {
            endpoint
        } else {
            format!("/{endpoint}")
        };

        let notification_type = get("WEBHOOK_NOTIFICATION_TYPE")
            .and_then(non_empty)
            .map(|t| t.trim().to_lowercase())
            .unwrap_or_else(|| "zabbix".to_string());

        Ok(Some(Self {
            host,
            port,
            endpoint,
            notification_type,
        }))
    }
}

/// Inputs of the worker pool sizing policy.
///
/// Bad values never fail startup: they are replaced by defaults and reported
/// through `tracing`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutorConfig {
    /// Overrides the detected CPU count when set.
    pub cpu_limit: Option<f64>,
    pub scaling_factor: f64,
    pub hard_cap: usize,
    pub drain_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cpu_limit: None,
            scaling_factor: 1.0,
            hard_cap: HARD_CAP,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_str)
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let cpu_limit = get("EXECUTOR_CPU_LIMIT").and_then(non_empty).and_then(|raw| {
            match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && v > 0.0 => Some(v),
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "EXECUTOR_CPU_LIMIT is not a positive number; using detected CPU count"
                    );
                    None
                }
            }
        });

        let scaling_factor = match get("EXECUTOR_SCALING_FACTOR").and_then(non_empty) {
            None => defaults.scaling_factor,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && v > 0.0 => v,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        default = defaults.scaling_factor,
                        "EXECUTOR_SCALING_FACTOR is not a positive number; using default"
                    );
                    defaults.scaling_factor
                }
            },
        };

        let hard_cap = match get("EXECUTOR_MAX_HARD_CAP").and_then(non_empty) {
            None => defaults.hard_cap,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(v) if v >= 1 => v.min(HARD_CAP),
                _ => {
                    tracing::warn!(
                        value = %raw,
                        default = HARD_CAP,
                        "EXECUTOR_MAX_HARD_CAP is not a positive integer; using default"
                    );
                    HARD_CAP
                }
            },
        };

        let drain_timeout = match get("EXECUTOR_DRAIN_TIMEOUT_MS").and_then(non_empty) {
            None => defaults.drain_timeout,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        default_ms = defaults.drain_timeout.as_millis() as u64,
                        "EXECUTOR_DRAIN_TIMEOUT_MS is not a number; using default"
                    );
                    defaults.drain_timeout
                }
            },
        };

        Self {
            cpu_limit,
            scaling_factor,
            hard_cap,
            drain_timeout,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Required env vars
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let admin_users = parse_csv_i64(get("HERALD_ADMIN_USERS"));

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if admin_users.is_empty() {
            return Err(Error::Config(
                "HERALD_ADMIN_USERS environment variable is required".to_string(),
            ));
        }

        let executor = ExecutorConfig::from_lookup(&get);

        let delivery_timeout =
            Duration::from_millis(positive_knob(&get, "DELIVERY_TIMEOUT_MS", 15_000));
        let broadcast_timeout =
            Duration::from_millis(positive_knob(&get, "BROADCAST_TIMEOUT_MS", 120_000));
        let broadcast_max_recipients = positive_knob(&get, "BROADCAST_MAX_RECIPIENTS", 2_000);

        let telegram_safe_limit = positive_knob(&get, "TELEGRAM_SAFE_LIMIT", 4000);

        let mut notification_types = parse_csv_lower(
            get("HERALD_NOTIFICATION_TYPES").or_else(|| Some("alerts".to_string())),
        );

        let webhook = WebhookConfig::from_lookup(&get)?;
        if let Some(hook) = &webhook {
            if !notification_types.contains(&hook.notification_type) {
                notification_types.push(hook.notification_type.clone());
            }
        }

        Ok(Self {
            telegram_bot_token,
            admin_users,
            executor,
            delivery_timeout,
            broadcast_timeout,
            broadcast_max_recipients,
            telegram_safe_limit,
            notification_types,
            webhook,
        })
    }
}

/// A strictly positive numeric knob. Garbage and zero fall back to `default`
/// with a warning.
fn positive_knob<T>(get: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + std::fmt::Display + Copy,
{
    let Some(raw) = get(key).and_then(non_empty) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => v,
        _ => {
            tracing::warn!(
                value = %raw,
                %default,
                "{key} is not a positive integer; using default"
            );
            default
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn executor_config_defaults_when_unset() {
        let cfg = ExecutorConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, ExecutorConfig::default());
    }

    #[test]
    fn executor_config_reads_knobs() {
        let cfg = ExecutorConfig::from_lookup(lookup(&[
            ("EXECUTOR_CPU_LIMIT", "2.5"),
            ("EXECUTOR_SCALING_FACTOR", "1.5"),
            ("EXECUTOR_MAX_HARD_CAP", "8"),
            ("EXECUTOR_DRAIN_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(cfg.cpu_limit, Some(2.5));
        assert_eq!(cfg.scaling_factor, 1.5);
        assert_eq!(cfg.hard_cap, 8);
        assert_eq!(cfg.drain_timeout, Duration::from_millis(250));
    }

    #[test]
    fn executor_config_replaces_garbage_with_defaults() {
        let cfg = ExecutorConfig::from_lookup(lookup(&[
            ("EXECUTOR_CPU_LIMIT", "many"),
            ("EXECUTOR_SCALING_FACTOR", "-2"),
            ("EXECUTOR_MAX_HARD_CAP", "0"),
        ]));
        assert_eq!(cfg.cpu_limit, None);
        assert_eq!(cfg.scaling_factor, 1.0);
        assert_eq!(cfg.hard_cap, HARD_CAP);
    }

    #[test]
    fn hard_cap_override_cannot_raise_the_ceiling() {
        let cfg = ExecutorConfig::from_lookup(lookup(&[("EXECUTOR_MAX_HARD_CAP", "10000")]));
        assert_eq!(cfg.hard_cap, HARD_CAP);
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![("TELEGRAM_BOT_TOKEN", "123:abc"), ("HERALD_ADMIN_USERS", "1,2")]
    }

    #[test]
    fn config_requires_token_and_admins() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("HERALD_ADMIN_USERS", "1")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "t")])),
            Err(Error::Config(_))
        ));

        let cfg = Config::from_lookup(lookup(&required())).unwrap();
        assert_eq!(cfg.admin_users, vec![1, 2]);
        assert_eq!(cfg.delivery_timeout, Duration::from_secs(15));
        assert_eq!(cfg.broadcast_timeout, Duration::from_secs(120));
        assert_eq!(cfg.broadcast_max_recipients, 2_000);
        assert_eq!(cfg.notification_types, vec!["alerts".to_string()]);
        assert!(cfg.webhook.is_none());
    }

    #[test]
    fn fanout_knobs_reject_zero_and_garbage() {
        let mut pairs = required();
        pairs.extend([
            ("DELIVERY_TIMEOUT_MS", "0"),
            ("BROADCAST_TIMEOUT_MS", "soon"),
            ("BROADCAST_MAX_RECIPIENTS", "-5"),
            ("TELEGRAM_SAFE_LIMIT", "0"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.delivery_timeout, Duration::from_secs(15));
        assert_eq!(cfg.broadcast_timeout, Duration::from_secs(120));
        assert_eq!(cfg.broadcast_max_recipients, 2_000);
        assert_eq!(cfg.telegram_safe_limit, 4000);

        let mut pairs = required();
        pairs.extend([("DELIVERY_TIMEOUT_MS", " 2500 "), ("BROADCAST_MAX_RECIPIENTS", "50")]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.delivery_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.broadcast_max_recipients, 50);
    }

    #[test]
    fn webhook_is_enabled_by_the_port() {
        assert_eq!(WebhookConfig::from_lookup(lookup(&[])).unwrap(), None);

        let hook = WebhookConfig::from_lookup(lookup(&[
            ("API_PORT", "8080"),
            ("WEBHOOK_ENDPOINT", "hooks/zbx"),
            ("WEBHOOK_NOTIFICATION_TYPE", "Zabbix"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(hook.host, "0.0.0.0");
        assert_eq!(hook.port, 8080);
        assert_eq!(hook.endpoint, "/hooks/zbx");
        assert_eq!(hook.notification_type, "zabbix");

        assert!(matches!(
            WebhookConfig::from_lookup(lookup(&[("API_PORT", "http")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn webhook_type_is_seeded() {
        let mut pairs = required();
        pairs.extend([("API_PORT", "9000"), ("HERALD_NOTIFICATION_TYPES", "alerts,deploys")]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.notification_types, vec!["alerts", "deploys", "zabbix"]);
    }

    #[test]
    fn csv_helpers_skip_blanks() {
        assert_eq!(parse_csv_i64(Some(" 1, ,x,42 ".to_string())), vec![1, 42]);
        assert_eq!(
            parse_csv_lower(Some("Alerts, Deploys,,".to_string())),
            vec!["alerts".to_string(), "deploys".to_string()]
        );
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'x"), "'x");
    }
}
