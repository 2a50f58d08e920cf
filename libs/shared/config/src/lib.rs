use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub scheduling: SchedulingSettings,
}

/// How appointments are grouped into a numbered treatment package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageGrouping {
    /// Keyed by (patient, treatment group). Canonical.
    TreatmentGroup,
    /// Keyed by (patient, specialty). Kept for clinics still numbering the old way.
    Specialty,
}

impl FromStr for PackageGrouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "treatment_group" | "treatment-group" => Ok(Self::TreatmentGroup),
            "specialty" => Ok(Self::Specialty),
            other => Err(format!("unknown package grouping '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulingSettings {
    /// First bookable start time of the day.
    pub day_start: NaiveTime,
    /// Closing time; the last start is one appointment length before it.
    pub day_end: NaiveTime,
    pub slot_step_minutes: u32,
    pub class_capacity: usize,
    pub recurrence_max_weeks: u32,
    pub package_grouping: PackageGrouping,
    /// Inserts kept in flight at once during a batch create.
    pub batch_concurrency: usize,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_step_minutes: 15,
            class_capacity: 4,
            recurrence_max_weeks: 26,
            package_grouping: PackageGrouping::TreatmentGroup,
            batch_concurrency: 4,
        }
    }
}

impl SchedulingSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            day_start: env_time("SCHEDULE_DAY_START", defaults.day_start),
            day_end: env_time("SCHEDULE_DAY_END", defaults.day_end),
            slot_step_minutes: env_parsed("SCHEDULE_SLOT_STEP_MINUTES", defaults.slot_step_minutes),
            class_capacity: env_parsed("CLASS_CAPACITY", defaults.class_capacity),
            recurrence_max_weeks: env_parsed("RECURRENCE_MAX_WEEKS", defaults.recurrence_max_weeks),
            package_grouping: env_parsed("PACKAGE_GROUPING", defaults.package_grouping),
            batch_concurrency: env_parsed("SCHEDULE_BATCH_CONCURRENCY", defaults.batch_concurrency),
        }
    }
}

fn env_time(key: &str, default: NaiveTime) -> NaiveTime {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", key, raw, default.format("%H:%M"));
            default
        }),
        Err(_) => default,
    }
}

fn env_parsed<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            scheduling: SchedulingSettings::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.scheduling.day_start >= config.scheduling.day_end {
            warn!(
                "SCHEDULE_DAY_START ({}) is not before SCHEDULE_DAY_END ({}); no slots will be offered",
                config.scheduling.day_start, config.scheduling.day_end
            );
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}
