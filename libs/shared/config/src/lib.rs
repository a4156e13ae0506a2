use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub alert_max_attempts: u32,
    pub alert_backoff_base_secs: u64,
    pub alert_backoff_cap_secs: u64,
    pub alert_dedup_window_secs: u64,
    pub alert_dispatch_deadline_secs: u64,
    pub channel_timeout_secs: u64,
    pub booking_max_alternatives: usize,
    pub booking_lookahead_business_days: u32,
    pub workflow_webhook_url: Option<String>,
    pub doctors_file: Option<String>,
    pub hospital_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            alert_max_attempts: 3,
            alert_backoff_base_secs: 30,
            alert_backoff_cap_secs: 600,
            alert_dedup_window_secs: 5,
            alert_dispatch_deadline_secs: 30 * 60,
            channel_timeout_secs: 10,
            booking_max_alternatives: 3,
            booking_lookahead_business_days: 2,
            workflow_webhook_url: None,
            doctors_file: None,
            hospital_name: "City General Hospital".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            alert_max_attempts: parse_or("ALERT_MAX_ATTEMPTS", defaults.alert_max_attempts),
            alert_backoff_base_secs: parse_or("ALERT_BACKOFF_BASE_SECS", defaults.alert_backoff_base_secs),
            alert_backoff_cap_secs: parse_or("ALERT_BACKOFF_CAP_SECS", defaults.alert_backoff_cap_secs),
            alert_dedup_window_secs: parse_or("ALERT_DEDUP_WINDOW_SECS", defaults.alert_dedup_window_secs),
            alert_dispatch_deadline_secs: parse_or(
                "ALERT_DISPATCH_DEADLINE_SECS",
                defaults.alert_dispatch_deadline_secs,
            ),
            channel_timeout_secs: parse_or("CHANNEL_TIMEOUT_SECS", defaults.channel_timeout_secs),
            booking_max_alternatives: parse_or("BOOKING_MAX_ALTERNATIVES", defaults.booking_max_alternatives),
            booking_lookahead_business_days: parse_or(
                "BOOKING_LOOKAHEAD_BUSINESS_DAYS",
                defaults.booking_lookahead_business_days,
            ),
            workflow_webhook_url: env::var("WORKFLOW_WEBHOOK_URL").ok().filter(|url| !url.is_empty()),
            doctors_file: env::var("CLINIC_DOCTORS_FILE").ok().filter(|path| !path.is_empty()),
            hospital_name: env::var("HOSPITAL_NAME")
                .unwrap_or_else(|_| {
                    warn!("HOSPITAL_NAME not set, using default");
                    defaults.hospital_name.clone()
                }),
        };

        if config.alert_max_attempts == 0 {
            warn!("ALERT_MAX_ATTEMPTS must be at least 1, using default");
            return Self { alert_max_attempts: defaults.alert_max_attempts, ..config };
        }

        config
    }

    pub fn is_webhook_configured(&self) -> bool {
        self.workflow_webhook_url.is_some()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => {
            warn!("{} not set, using default {}", key, default);
            default
        }
    }
}
