use chrono::Duration;
use serde::Deserialize;

use crate::clock::DayBoundary;
use crate::models::breaker::DEFAULT_FAILURE_THRESHOLD;
use crate::models::task::{DEFAULT_TASK_MAPPING_TTL_DAYS, MAX_TASK_MAPPING_TTL_DAYS};
use crate::router::RoutingPolicy;

const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_ADMIN_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub admin_key: String,
    /// Same-day failures before a shared credential is benched.
    /// Set via ROUTER_SHARED_FAILURE_THRESHOLD. Default: 3.
    pub failure_threshold: u32,
    /// Task binding lifetime in days. Set via ROUTER_TASK_MAPPING_TTL_DAYS. Default: 7.
    pub task_mapping_ttl_days: i64,
    /// Minutes east of UTC that define midnight for the breaker.
    /// Set via ROUTER_DAY_UTC_OFFSET_MINUTES. Default: 0 (UTC).
    pub day_utc_offset_minutes: i32,
    /// Seconds between background sweeps of expired task bindings. 0 = disabled.
    /// Set via ROUTER_JANITOR_INTERVAL_SECS. Default: 3600.
    pub janitor_interval_secs: u64,
}

impl Config {
    pub fn routing_policy(&self) -> anyhow::Result<RoutingPolicy> {
        let day = DayBoundary::from_offset_minutes(self.day_utc_offset_minutes).ok_or_else(|| {
            anyhow::anyhow!(
                "ROUTER_DAY_UTC_OFFSET_MINUTES={} is outside ±1440",
                self.day_utc_offset_minutes
            )
        })?;
        if self.failure_threshold == 0 {
            anyhow::bail!("ROUTER_SHARED_FAILURE_THRESHOLD must be at least 1");
        }
        if !(1..=MAX_TASK_MAPPING_TTL_DAYS).contains(&self.task_mapping_ttl_days) {
            anyhow::bail!(
                "ROUTER_TASK_MAPPING_TTL_DAYS={} must be between 1 and {}",
                self.task_mapping_ttl_days,
                MAX_TASK_MAPPING_TTL_DAYS
            );
        }
        Ok(RoutingPolicy {
            failure_threshold: self.failure_threshold,
            task_mapping_ttl: Duration::days(self.task_mapping_ttl_days),
            day,
        })
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_source(|key| std::env::var(key).ok())
}

/// Build a config from any key lookup. `load()` passes the process env.
pub fn from_source<F>(get: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let admin_key = get("ROUTER_ADMIN_KEY").unwrap_or_else(|| PLACEHOLDER_ADMIN_KEY.into());

    if admin_key == PLACEHOLDER_ADMIN_KEY {
        let env_mode = get("ROUTER_ENV")
            .or_else(|| get("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "ROUTER_ADMIN_KEY is still the insecure placeholder. \
                 Set a real admin key before running in production."
            );
        }
        tracing::warn!("ROUTER_ADMIN_KEY is not set, using insecure placeholder");
    }

    Ok(Config {
        port: get("ROUTER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080),
        database_url: get("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/tapcanvas".into()),
        admin_key,
        failure_threshold: get("ROUTER_SHARED_FAILURE_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
        task_mapping_ttl_days: get("ROUTER_TASK_MAPPING_TTL_DAYS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TASK_MAPPING_TTL_DAYS),
        day_utc_offset_minutes: get("ROUTER_DAY_UTC_OFFSET_MINUTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        janitor_interval_secs: get("ROUTER_JANITOR_INTERVAL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = from_source(source(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.task_mapping_ttl_days, 7);
        assert_eq!(cfg.janitor_interval_secs, 3600);

        let policy = cfg.routing_policy().unwrap();
        assert_eq!(policy, RoutingPolicy::default());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let cfg = from_source(source(&[
            ("ROUTER_PORT", "9000"),
            ("ROUTER_SHARED_FAILURE_THRESHOLD", "5"),
            ("ROUTER_DAY_UTC_OFFSET_MINUTES", "480"),
            ("ROUTER_JANITOR_INTERVAL_SECS", "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.janitor_interval_secs, 3600);
        assert_eq!(cfg.routing_policy().unwrap().day.offset_minutes(), 480);
    }

    #[test]
    fn test_placeholder_key_rejected_in_production() {
        assert!(from_source(source(&[("ROUTER_ENV", "production")])).is_err());
        assert!(from_source(source(&[
            ("ROUTER_ENV", "production"),
            ("ROUTER_ADMIN_KEY", "a-real-admin-key"),
        ]))
        .is_ok());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let cfg = from_source(source(&[("ROUTER_DAY_UTC_OFFSET_MINUTES", "2000")])).unwrap();
        assert!(cfg.routing_policy().is_err());
        let cfg = from_source(source(&[("ROUTER_SHARED_FAILURE_THRESHOLD", "0")])).unwrap();
        assert!(cfg.routing_policy().is_err());
    }

    #[test]
    fn test_mapping_ttl_bounds() {
        for bad in ["0", "-3", "3651", "1000000000"] {
            let cfg = from_source(source(&[("ROUTER_TASK_MAPPING_TTL_DAYS", bad)])).unwrap();
            assert!(cfg.routing_policy().is_err(), "ttl {} should be rejected", bad);
        }
        let cfg = from_source(source(&[("ROUTER_TASK_MAPPING_TTL_DAYS", "3650")])).unwrap();
        assert_eq!(cfg.routing_policy().unwrap().task_mapping_ttl, Duration::days(3650));
    }
}
