use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::HeatmapError;

pub const DEFAULT_CONFIG_FILE: &str = "heatmap-weather.json";
pub const DEFAULT_INPUT_PATH: &str = "./heatmap_cells.json";
pub const DEFAULT_OUTPUT_PATH: &str = "./heatmap_weather_daily.json";
pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_GUST_MODEL: &str = "icon_seamless";
pub const MAX_HORIZON_DAYS: u32 = 16;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub input_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub output_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub horizon_days: Option<u32>,
    #[serde(default)]
    pub batch_size_min: Option<usize>,
    #[serde(default)]
    pub batch_size_max: Option<usize>,
    #[serde(default)]
    pub batch_size_initial: Option<usize>,
    #[serde(default)]
    pub batch_size_step: Option<usize>,
    #[serde(default)]
    pub pacing_delay_ms: Option<u64>,
    #[serde(default)]
    pub rate_limit_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub cell_limit: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub gust_model: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input_path: Option<Utf8PathBuf>,
    pub output_path: Option<Utf8PathBuf>,
    pub horizon_days: Option<u32>,
    pub cell_limit: Option<usize>,
    pub max_retries: Option<u32>,
}

impl Config {
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if overrides.input_path.is_some() {
            self.input_path = overrides.input_path;
        }
        if overrides.output_path.is_some() {
            self.output_path = overrides.output_path;
        }
        if overrides.horizon_days.is_some() {
            self.horizon_days = overrides.horizon_days;
        }
        if overrides.cell_limit.is_some() {
            self.cell_limit = overrides.cell_limit;
        }
        if overrides.max_retries.is_some() {
            self.max_retries = overrides.max_retries;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizing {
    pub min: usize,
    pub max: usize,
    pub initial: usize,
    pub step: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub timezone: String,
    pub gust_model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub input_path: Utf8PathBuf,
    pub output_path: Utf8PathBuf,
    pub horizon_days: u32,
    pub batch: BatchSizing,
    pub pacing_delay: Duration,
    pub rate_limit_delay: Duration,
    pub max_retries: Option<u32>,
    pub cell_limit: Option<usize>,
    pub provider: ProviderSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file. Without an explicit path a missing default file means
    /// "use built-in defaults"; an explicit path must exist.
    pub fn load(path: Option<&str>) -> Result<Config, HeatmapError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HeatmapError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HeatmapError::ConfigParse(err.to_string()))
    }

    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, HeatmapError> {
        let config = Self::load(path)?.with_overrides(overrides);
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HeatmapError> {
        let horizon_days = config.horizon_days.unwrap_or(3);
        if horizon_days == 0 || horizon_days > MAX_HORIZON_DAYS {
            return Err(HeatmapError::InvalidConfig(format!(
                "horizonDays must be within 1..={MAX_HORIZON_DAYS}, got {horizon_days}"
            )));
        }

        let min = config.batch_size_min.unwrap_or(5);
        let max = config.batch_size_max.unwrap_or(50);
        let initial = config.batch_size_initial.unwrap_or(max);
        let step = config.batch_size_step.unwrap_or(5);
        if min == 0 {
            return Err(HeatmapError::InvalidConfig(
                "batchSizeMin must be at least 1".to_string(),
            ));
        }
        if min > max {
            return Err(HeatmapError::InvalidConfig(format!(
                "batchSizeMin ({min}) exceeds batchSizeMax ({max})"
            )));
        }
        if !(min..=max).contains(&initial) {
            return Err(HeatmapError::InvalidConfig(format!(
                "batchSizeInitial ({initial}) must be within {min}..={max}"
            )));
        }
        if step == 0 {
            return Err(HeatmapError::InvalidConfig(
                "batchSizeStep must be at least 1".to_string(),
            ));
        }

        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(HeatmapError::InvalidConfig(format!(
                "baseUrl must be an http(s) URL: {base_url}"
            )));
        }

        Ok(ResolvedConfig {
            input_path: config
                .input_path
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_INPUT_PATH)),
            output_path: config
                .output_path
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT_PATH)),
            horizon_days,
            batch: BatchSizing {
                min,
                max,
                initial,
                step,
            },
            pacing_delay: Duration::from_millis(config.pacing_delay_ms.unwrap_or(10_000)),
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms.unwrap_or(60_000)),
            max_retries: config.max_retries,
            cell_limit: config.cell_limit.filter(|limit| *limit > 0),
            provider: ProviderSettings {
                base_url,
                timezone: config.timezone.unwrap_or_else(|| "auto".to_string()),
                gust_model: config
                    .gust_model
                    .unwrap_or_else(|| DEFAULT_GUST_MODEL.to_string()),
                request_timeout: Duration::from_secs(config.request_timeout_secs.unwrap_or(30)),
            },
        })
    }
}
