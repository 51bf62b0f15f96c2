use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HeatmapError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CellId {
    type Err = HeatmapError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() || value.chars().any(|ch| ch.is_control()) {
            return Err(HeatmapError::InvalidCellId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub lat: f64,
    pub lon: f64,
}

impl Cell {
    pub fn new(id: &str, lat: f64, lon: f64) -> Result<Self, HeatmapError> {
        let cell = Self {
            id: id.parse()?,
            lat,
            lon,
        };
        cell.validate()?;
        Ok(cell)
    }

    pub fn validate(&self) -> Result<(), HeatmapError> {
        let invalid = |reason: &str| HeatmapError::InvalidCell {
            id: self.id.to_string(),
            reason: reason.to_string(),
        };
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(invalid("latitude must be within [-90, 90]"));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(invalid("longitude must be within [-180, 180]"));
        }
        Ok(())
    }
}

/// One forecast day. Serialized as
/// `[minTemp, maxTemp, precipitation, sunshine, windMax, gustMax]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[i64; 6]", into = "[i64; 6]")]
pub struct DayMetric {
    pub temperature_min: i64,
    pub temperature_max: i64,
    pub precipitation: i64,
    pub sunshine: i64,
    pub wind_speed_max: i64,
    pub wind_gust_max: i64,
}

impl From<[i64; 6]> for DayMetric {
    fn from(value: [i64; 6]) -> Self {
        Self {
            temperature_min: value[0],
            temperature_max: value[1],
            precipitation: value[2],
            sunshine: value[3],
            wind_speed_max: value[4],
            wind_gust_max: value[5],
        }
    }
}

impl From<DayMetric> for [i64; 6] {
    fn from(value: DayMetric) -> Self {
        [
            value.temperature_min,
            value.temperature_max,
            value.precipitation,
            value.sunshine,
            value.wind_speed_max,
            value.wind_gust_max,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: CellId,
    pub lat: f64,
    pub lon: f64,
    pub days: Vec<DayMetric>,
}

/// Inclusive date range requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastWindow {
    start: NaiveDate,
    days: u32,
}

impl ForecastWindow {
    pub fn new(start: NaiveDate, days: u32) -> Result<Self, HeatmapError> {
        if days == 0 {
            return Err(HeatmapError::InvalidConfig(
                "forecast window needs at least one day".to_string(),
            ));
        }
        Ok(Self { start, days })
    }

    pub fn starting_today(days: u32) -> Result<Self, HeatmapError> {
        Self::new(Utc::now().date_naive(), days)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.start
            .checked_add_days(Days::new(u64::from(self.days - 1)))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn days(&self) -> u32 {
        self.days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_end_is_inclusive() {
        let start = NaiveDate::from_ymd_opt(2025, 12, 30).unwrap();
        let window = ForecastWindow::new(start, 3).unwrap();
        assert_eq!(window.end(), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn day_metric_serializes_as_tuple() {
        let day = DayMetric::from([-3, 4, 1, 5, 20, 41]);
        let json = serde_json::to_string(&day).unwrap();
        assert_eq!(json, "[-3,4,1,5,20,41]");
    }
}
