use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How the inter-check delay between successively scheduled checks is
/// determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayMethod {
    /// Don't spread checks out at all.
    None,
    /// Schedule checks one second apart.
    Dumb,
    /// Spread checks evenly over the average check interval.
    Smart,
    /// Use the user-supplied fixed delay.
    User,
}

/// How the service interleave factor is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterleaveMethod {
    Smart,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotationMethod {
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub scheduling: SchedulingConfig,
    pub checks: CheckConfig,
    pub freshness: FreshnessConfig,
    pub retention: RetentionConfig,
    pub commands: CommandConfig,
    pub log_rotation_method: LogRotationMethod,
    /// Seconds the dispatch loop idles for when nothing is due.
    pub sleep_time: f64,
    /// Forward clock jumps at or past this many seconds trigger
    /// compensation.
    pub time_change_threshold: u64,
    /// Interval of the recurring status-save event, in seconds.
    pub status_update_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub service_inter_check_delay_method: DelayMethod,
    pub host_inter_check_delay_method: DelayMethod,
    /// Fixed delay in seconds, used when the method is `user`.
    pub service_inter_check_delay: f64,
    pub host_inter_check_delay: f64,
    pub service_interleave_factor_method: InterleaveMethod,
    /// Fixed factor, used when the method is `user`.
    pub service_interleave_factor: u32,
    /// Maximum minutes the initial service checks may be spread over.
    pub max_service_check_spread: u32,
    pub max_host_check_spread: u32,
    /// Seconds per check-interval unit.
    pub interval_length: u32,
    pub auto_reschedule_checks: bool,
    /// Seconds between adaptive-reschedule passes.
    pub auto_rescheduling_interval: u64,
    /// Forward window, in seconds, each pass smooths over.
    pub auto_rescheduling_window: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            service_inter_check_delay_method: DelayMethod::Smart,
            host_inter_check_delay_method: DelayMethod::Smart,
            service_inter_check_delay: 0.0,
            host_inter_check_delay: 0.0,
            service_interleave_factor_method: InterleaveMethod::Smart,
            service_interleave_factor: 0,
            max_service_check_spread: 30,
            max_host_check_spread: 30,
            interval_length: 60,
            auto_reschedule_checks: false,
            auto_rescheduling_interval: 30,
            auto_rescheduling_window: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Seconds between check-result reaper runs.
    pub check_reaper_interval: u64,
    pub check_orphaned_hosts: bool,
    pub check_orphaned_services: bool,
    pub orphan_check_interval: u64,
    /// 0 = unlimited.
    pub max_parallel_service_checks: u32,
    pub execute_service_checks: bool,
    pub execute_host_checks: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            check_reaper_interval: 10,
            check_orphaned_hosts: true,
            check_orphaned_services: true,
            orphan_check_interval: 60,
            max_parallel_service_checks: 0,
            execute_service_checks: true,
            execute_host_checks: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    pub check_service_freshness: bool,
    pub service_freshness_check_interval: u64,
    pub check_host_freshness: bool,
    pub host_freshness_check_interval: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            check_service_freshness: false,
            service_freshness_check_interval: 60,
            check_host_freshness: false,
            host_freshness_check_interval: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub retain_state_information: bool,
    /// Minutes between retention saves; 0 disables the event.
    pub retention_update_interval: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retain_state_information: true,
            retention_update_interval: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub check_external_commands: bool,
    /// Seconds between external-command checks; -1 means "as often as
    /// possible" (a 5 s recurring event plus idle-path polling).
    pub command_check_interval: i64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            check_external_commands: true,
            command_check_interval: -1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            scheduling: SchedulingConfig::default(),
            checks: CheckConfig::default(),
            freshness: FreshnessConfig::default(),
            retention: RetentionConfig::default(),
            commands: CommandConfig::default(),
            log_rotation_method: LogRotationMethod::None,
            sleep_time: 0.5,
            time_change_threshold: 900,
            status_update_interval: 60,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Interval actually used for the external-command check event.
    pub fn effective_command_check_interval(&self) -> u64 {
        if self.commands.command_check_interval < 0 {
            5
        } else {
            self.commands.command_check_interval as u64
        }
    }
}
