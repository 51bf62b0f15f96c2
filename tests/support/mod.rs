#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDate;

use heatmap_weather::backoff::Sleeper;
use heatmap_weather::config::{Config, ConfigLoader, ResolvedConfig};
use heatmap_weather::domain::{Cell, ForecastWindow};
use heatmap_weather::error::HeatmapError;
use heatmap_weather::forecast::{
    DailyField, DailyRequest, DailySeries, ForecastClient, ForecastResponse,
};
use heatmap_weather::pipeline::{ProgressEvent, ProgressSink};

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Answers every lookup with the same values per day unless told otherwise.
#[derive(Default)]
pub struct ScriptedClient {
    pub calls: Mutex<Vec<DailyRequest>>,
    /// Number of upcoming primary lookups that fail with a provider error.
    pub primary_failures: Mutex<usize>,
    /// Latitudes (as sent, four decimals) whose gust response has no daily section.
    pub gusts_missing_for: HashSet<String>,
}

impl ScriptedClient {
    pub fn failing_primary(times: usize) -> Self {
        Self {
            primary_failures: Mutex::new(times),
            ..Self::default()
        }
    }

    pub fn missing_gusts_for(latitude: &str) -> Self {
        Self {
            gusts_missing_for: HashSet::from([latitude.to_string()]),
            ..Self::default()
        }
    }

    pub fn primary_calls(&self) -> Vec<DailyRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.model.is_none())
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ForecastClient for ScriptedClient {
    fn fetch_daily(&self, request: &DailyRequest) -> Result<Vec<ForecastResponse>, HeatmapError> {
        self.calls.lock().unwrap().push(request.clone());

        if request.model.is_none() {
            let mut failures = self.primary_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(HeatmapError::Provider(
                    "Hourly API request limit exceeded".to_string(),
                ));
            }
        }

        let days = (request.end_date - request.start_date).num_days() as usize + 1;
        Ok(request
            .latitudes
            .split(',')
            .map(|latitude| {
                if request.model.is_some() && self.gusts_missing_for.contains(latitude) {
                    ForecastResponse::missing()
                } else {
                    ForecastResponse::with_daily(sample_series(&request.fields, days))
                }
            })
            .collect())
    }
}

/// Expected metric for `sample_series`: `[5, 12, 0, 5, 19, 40]`.
pub fn sample_series(fields: &[DailyField], days: usize) -> DailySeries {
    fields
        .iter()
        .map(|field| {
            let value = match field {
                DailyField::TemperatureMin => 4.6,
                DailyField::TemperatureMax => 12.2,
                DailyField::PrecipitationSum => 0.4,
                DailyField::SunshineDuration => 36_000.0,
                DailyField::CloudCoverMean => 50.0,
                DailyField::WeatherCode => 3.0,
                DailyField::WindSpeedMax => 18.5,
                DailyField::WindGustsMax => 40.4,
            };
            (*field, vec![Some(value); days])
        })
        .collect()
}

pub fn cells(specs: &[(&str, f64, f64)]) -> Vec<Cell> {
    specs
        .iter()
        .map(|(id, lat, lon)| Cell::new(id, *lat, *lon).unwrap())
        .collect()
}

pub fn window(days: u32) -> ForecastWindow {
    ForecastWindow::new(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(), days).unwrap()
}

pub fn test_config(output_path: Utf8PathBuf, min: usize, max: usize) -> ResolvedConfig {
    ConfigLoader::resolve_config(Config {
        output_path: Some(output_path),
        horizon_days: Some(3),
        batch_size_min: Some(min),
        batch_size_max: Some(max),
        batch_size_step: Some(1),
        pacing_delay_ms: Some(10),
        rate_limit_delay_ms: Some(1_000),
        ..Config::default()
    })
    .unwrap()
}

pub fn temp_output(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("weather.json")).unwrap()
}
