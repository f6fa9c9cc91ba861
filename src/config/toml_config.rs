use crate::adapters::simulated::SimulatedCard;
use crate::core::privileged::STALE_LOGICAL_CHANNEL_SCAN;
use crate::core::ManagerSettings;
use crate::utils::error::{EuiccError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub cards: Vec<SimulatedCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// 使用 privileged 版本 (多一層 telephony)
    #[serde(default)]
    pub privileged: bool,
    pub default_port: Option<i32>,
    #[serde(default = "default_true")]
    pub close_stale_on_start: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            privileged: false,
            default_port: None,
            close_stale_on_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;

        toml::from_str(&processed).map_err(|e| EuiccError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${SIM_EID})，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EuiccError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EuiccError::ConfigError {
            message: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Writes the configuration, card state included, back to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            default_port: self.manager.default_port,
            reconnect_timeout: self.reconnect_timeout(),
            reconnect_poll_interval: Duration::from_millis(self.reconnect.poll_interval_ms),
        }
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.timeout_ms)
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_positive_number(
            "reconnect.poll_interval_ms",
            self.reconnect.poll_interval_ms,
            1,
        )?;
        validation::validate_positive_number(
            "reconnect.timeout_ms",
            self.reconnect.timeout_ms,
            self.reconnect.poll_interval_ms,
        )?;

        validation::validate_unique(
            "cards.physical_slot_index",
            self.cards.iter().map(|c| c.physical_slot_index),
        )?;

        for card in &self.cards {
            let prefix = format!("cards[{}]", card.physical_slot_index);

            validation::validate_non_empty_string(&format!("{}.eid", prefix), &card.eid)?;
            // 通道編號 1..=max 必須落在清理掃描的範圍內
            validation::validate_range(
                &format!("{}.max_logical_channels", prefix),
                card.max_logical_channels,
                1,
                STALE_LOGICAL_CHANNEL_SCAN.end as usize - 1,
            )?;
            validation::validate_unique(
                &format!("{}.ports.port_index", prefix),
                card.ports.iter().map(|p| p.port_index),
            )?;
            for profile in &card.profiles {
                validation::validate_iccid(&format!("{}.profiles.iccid", prefix), &profile.iccid)?;
            }

            let enabled = card.profiles.iter().filter(|p| p.is_enabled()).count();
            if enabled > 1 {
                return Err(EuiccError::ConfigValidationError {
                    field: format!("{}.profiles", prefix),
                    message: format!("{} profiles are enabled, at most one is allowed", enabled),
                });
            }
        }

        Ok(())
    }
}
