//! Runtime configuration.
//!
//! Loaded from a TOML file (default `config.toml`) via `serde` + `toml`,
//! with a generated default written out the first time the runtime starts
//! against a path that doesn't exist yet.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub scheduling: SchedulingConfig,
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

/// The tunable knobs governing boundary scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// `MIN_PREFEED_LEAD_MS`. Must be >= 1000; a value above 30000 is logged
    /// as a warning (see `Config::validate`) but not rejected.
    pub min_prefeed_lead_ms: i64,
    /// `STARTUP_LATENCY_S`.
    pub startup_latency_s: i64,
    /// `SCHEDULING_BUFFER_S`.
    pub scheduling_buffer_s: i64,
    /// `TEARDOWN_GRACE_MS`.
    pub teardown_grace_ms: i64,
    /// `MAX_STARTUP_CONVERGENCE_S`.
    pub max_startup_convergence_s: i64,
    /// `TICK_HZ`.
    pub tick_hz: u32,
    /// Issuance buffer subtracted from `boundary - MIN_PREFEED_LEAD` when
    /// scheduling the one-shot switch timer.
    pub issuance_buffer_ms: i64,
    /// Tolerance for "late" issuance-timer firing.
    pub issuance_tolerance_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// `ROUTER_QUEUE_DEPTH`.
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./retrovue.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            scheduling: SchedulingConfig {
                min_prefeed_lead_ms: 5000,
                startup_latency_s: 7,
                scheduling_buffer_s: 2,
                teardown_grace_ms: 10_000,
                max_startup_convergence_s: 120,
                tick_hz: 1,
                issuance_buffer_ms: 500,
                issuance_tolerance_ms: 50,
            },
            router: RouterConfig { queue_depth: 64 },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        let config = if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            toml::from_str(&contents)?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            default_config
        };

        config.validate();
        Ok(config)
    }

    fn validate(&self) {
        if self.scheduling.min_prefeed_lead_ms < 1000 {
            tracing::warn!(
                min_prefeed_lead_ms = self.scheduling.min_prefeed_lead_ms,
                "MIN_PREFEED_LEAD_MS below 1000ms; clamping is not performed, expect frequent infeasible-boundary fatals"
            );
        }
        if self.scheduling.min_prefeed_lead_ms > 30_000 {
            tracing::warn!(
                min_prefeed_lead_ms = self.scheduling.min_prefeed_lead_ms,
                "MIN_PREFEED_LEAD_MS above 30000ms"
            );
        }
    }
}
