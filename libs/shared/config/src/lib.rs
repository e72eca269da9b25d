use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod variant;

pub use variant::{ExtraFieldSpec, FlowVariant};

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PRIMARY_COLOR: &str = "#0D9488";
pub const DEFAULT_ACCENT_COLOR: &str = "#10B981";

/// Host callback fired once a booking has been created. Receives the raw
/// `appointment` object returned by the calendar API.
pub type CompletionHook = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeTokens {
    pub primary_color: String,
    pub accent_color: String,
}

impl Default for ThemeTokens {
    fn default() -> Self {
        Self {
            primary_color: DEFAULT_PRIMARY_COLOR.to_string(),
            accent_color: DEFAULT_ACCENT_COLOR.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub request_timeout: Duration,
    pub timezone: Tz,
    pub default_doctor_id: Option<String>,
    pub theme: ThemeTokens,
    pub variant: FlowVariant,
    pub on_booking_complete: Option<CompletionHook>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_url", &self.api_url)
            .field("request_timeout", &self.request_timeout)
            .field("timezone", &self.timezone)
            .field("default_doctor_id", &self.default_doctor_id)
            .field("theme", &self.theme)
            .field("variant", &self.variant.name)
            .field("on_booking_complete", &self.on_booking_complete.is_some())
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl AppConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            timezone: Tz::UTC,
            default_doctor_id: None,
            theme: ThemeTokens::default(),
            variant: FlowVariant::default(),
            on_booking_complete: None,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing or malformed
    /// values fall back to defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("BOOKING_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                warn!("BOOKING_API_URL not set, using default");
                DEFAULT_API_URL.to_string()
            });

        let request_timeout = match lookup("BOOKING_API_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!("BOOKING_API_TIMEOUT_SECS is invalid ({}), using default", raw);
                    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
                }
            },
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let timezone = match lookup("BOOKING_TIMEZONE") {
            Some(raw) => raw.trim().parse::<Tz>().unwrap_or_else(|_| {
                warn!("BOOKING_TIMEZONE is not a known timezone ({}), using UTC", raw);
                Tz::UTC
            }),
            None => Tz::UTC,
        };

        let mut theme = ThemeTokens::default();
        if let Some(color) = lookup("BOOKING_PRIMARY_COLOR") {
            theme.primary_color = color;
        }
        if let Some(color) = lookup("BOOKING_ACCENT_COLOR") {
            theme.accent_color = color;
        }

        let config = Self {
            api_url,
            request_timeout,
            timezone,
            default_doctor_id: lookup("BOOKING_DEFAULT_DOCTOR_ID").filter(|v| !v.trim().is_empty()),
            theme,
            variant: FlowVariant::default(),
            on_booking_complete: None,
        };

        if !config.is_configured() {
            warn!("Booking API URL does not look like an http(s) address: {}", config.api_url);
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        self.api_url.starts_with("http://") || self.api_url.starts_with("https://")
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_default_doctor(mut self, doctor_id: impl Into<String>) -> Self {
        self.default_doctor_id = Some(doctor_id.into());
        self
    }

    pub fn with_variant(mut self, variant: FlowVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_completion_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.on_booking_complete = Some(Arc::new(hook));
        self
    }
}
