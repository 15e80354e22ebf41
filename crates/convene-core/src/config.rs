use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine settings. Every section and field is optional in the TOML source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: LimitsConfig,
    pub recurrence: RecurrenceConfig,
    pub permissions: PermissionsConfig,
    pub reminders: RemindersConfig,
    pub attendance: AttendanceConfig,
    pub pagination: PaginationConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_title_len: usize,
    pub max_description_len: usize,
    pub max_location_len: usize,
    pub max_note_len: usize,
    pub max_guest_count: u32,
    pub max_invites_per_request: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_title_len: 100,
            max_description_len: 1000,
            max_location_len: 200,
            max_note_len: 500,
            max_guest_count: 10,
            max_invites_per_request: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecurrenceConfig {
    /// Materialization horizon measured from the parent's end.
    pub horizon_days: i64,
    /// Upper bound on occurrences generated per expansion run.
    pub max_instances: u16,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            horizon_days: 365,
            max_instances: 730,
        }
    }
}

impl RecurrenceConfig {
    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::days(self.horizon_days)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// 0 disables caching of platform role lookups.
    pub role_cache_ttl_secs: u64,
    pub role_cache_capacity: u64,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            role_cache_ttl_secs: 300,
            role_cache_capacity: 10_000,
        }
    }
}

impl PermissionsConfig {
    pub fn role_cache_ttl(&self) -> Option<Duration> {
        (self.role_cache_ttl_secs > 0).then(|| Duration::from_secs(self.role_cache_ttl_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemindersConfig {
    pub max_pending_per_user: usize,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            max_pending_per_user: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    /// How long before the start check-in opens.
    pub check_in_opens_minutes: i64,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            check_in_opens_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub max_limit: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { max_limit: 200 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Buffer of the cascade report broadcast channel.
    pub report_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            report_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_title_len == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_title_len must be positive".into(),
            ));
        }
        if self.recurrence.horizon_days <= 0 {
            return Err(ConfigError::Invalid(
                "recurrence.horizon_days must be positive".into(),
            ));
        }
        if self.recurrence.max_instances == 0 {
            return Err(ConfigError::Invalid(
                "recurrence.max_instances must be positive".into(),
            ));
        }
        if self.pagination.max_limit == 0 {
            return Err(ConfigError::Invalid(
                "pagination.max_limit must be positive".into(),
            ));
        }
        if self.dispatch.report_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.report_capacity must be positive".into(),
            ));
        }
        if self.attendance.check_in_opens_minutes < 0 {
            return Err(ConfigError::Invalid(
                "attendance.check_in_opens_minutes cannot be negative".into(),
            ));
        }
        Ok(())
    }
}
