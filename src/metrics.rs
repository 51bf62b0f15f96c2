//! Turns raw provider series into the stored per-day metric tuples.
//!
//! Every stored value is rounded to whole units, effective sunshine included.

use tracing::warn;

use crate::domain::{Cell, CellId, CellRecord, DayMetric};
use crate::forecast::{BatchForecast, DailyField, DailySeries};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Sunshine dampening for the provider's WMO weather code.
pub fn weather_sun_factor(code: Option<f64>) -> f64 {
    let Some(code) = code else {
        return 1.0;
    };
    if code == 45.0 || code == 48.0 {
        0.4
    } else if (61.0..=82.0).contains(&code) {
        0.3
    } else if code >= 95.0 {
        0.2
    } else {
        1.0
    }
}

pub fn cloud_factor(cloud_cover_mean: Option<f64>) -> f64 {
    match cloud_cover_mean {
        Some(cover) => (1.0 - cover / 100.0).max(0.0),
        None => 1.0,
    }
}

/// Sunshine hours after cloud and weather dampening, unrounded.
pub fn effective_sunshine_hours(
    sunshine_seconds: Option<f64>,
    cloud_cover_mean: Option<f64>,
    weather_code: Option<f64>,
) -> f64 {
    let raw_hours = sunshine_seconds.unwrap_or(0.0) / SECONDS_PER_HOUR;
    raw_hours * cloud_factor(cloud_cover_mean) * weather_sun_factor(weather_code)
}

/// Rounds to the nearest whole unit with halves going up, so `-2.5` becomes `-2`.
/// Absent values become zero.
pub fn round_whole(value: Option<f64>) -> i64 {
    match value {
        Some(value) if value.is_finite() => (value + 0.5).floor() as i64,
        _ => 0,
    }
}

pub fn derive_day(primary: &DailySeries, gusts: &DailySeries, day: usize) -> DayMetric {
    let sunshine = effective_sunshine_hours(
        primary.value(DailyField::SunshineDuration, day),
        primary.value(DailyField::CloudCoverMean, day),
        primary.value(DailyField::WeatherCode, day),
    );
    DayMetric {
        temperature_min: round_whole(primary.value(DailyField::TemperatureMin, day)),
        temperature_max: round_whole(primary.value(DailyField::TemperatureMax, day)),
        precipitation: round_whole(primary.value(DailyField::PrecipitationSum, day)),
        sunshine: round_whole(Some(sunshine)),
        wind_speed_max: round_whole(primary.value(DailyField::WindSpeedMax, day)),
        wind_gust_max: round_whole(gusts.value(DailyField::WindGustsMax, day)),
    }
}

pub fn derive_record(
    cell: &Cell,
    primary: &DailySeries,
    gusts: &DailySeries,
    horizon: usize,
) -> CellRecord {
    CellRecord {
        id: cell.id.clone(),
        lat: cell.lat,
        lon: cell.lon,
        days: (0..horizon)
            .map(|day| derive_day(primary, gusts, day))
            .collect(),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDerivation {
    pub records: Vec<CellRecord>,
    /// Cells whose primary or gust response had no daily section.
    pub missing: Vec<CellId>,
}

pub fn derive_batch(batch: &[Cell], forecast: &BatchForecast, horizon: usize) -> BatchDerivation {
    let mut derivation = BatchDerivation::default();
    for (index, cell) in batch.iter().enumerate() {
        let primary = forecast
            .primary
            .get(index)
            .and_then(|response| response.daily.as_ref());
        let gusts = forecast
            .gusts
            .get(index)
            .and_then(|response| response.daily.as_ref());
        match (primary, gusts) {
            (Some(primary), Some(gusts)) => {
                derivation
                    .records
                    .push(derive_record(cell, primary, gusts, horizon));
            }
            _ => {
                warn!(
                    cell = %cell.id,
                    primary = primary.is_some(),
                    gusts = gusts.is_some(),
                    "missing daily data, skipping cell"
                );
                derivation.missing.push(cell.id.clone());
            }
        }
    }
    derivation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weather_factor_boundaries() {
        assert_eq!(weather_sun_factor(Some(48.0)), 0.4);
        assert_eq!(weather_sun_factor(Some(60.0)), 1.0);
        assert_eq!(weather_sun_factor(Some(61.0)), 0.3);
        assert_eq!(weather_sun_factor(Some(82.0)), 0.3);
        assert_eq!(weather_sun_factor(Some(83.0)), 1.0);
        assert_eq!(weather_sun_factor(Some(99.0)), 0.2);
    }

    #[test]
    fn cloud_factor_never_negative() {
        assert_eq!(cloud_factor(Some(120.0)), 0.0);
        assert_eq!(cloud_factor(Some(25.0)), 0.75);
        assert_eq!(cloud_factor(None), 1.0);
    }

    #[test]
    fn round_whole_treats_missing_as_zero() {
        assert_eq!(round_whole(None), 0);
        assert_eq!(round_whole(Some(f64::NAN)), 0);
        assert_eq!(round_whole(Some(2.5)), 3);
        assert_eq!(round_whole(Some(-2.5)), -2);
        assert_eq!(round_whole(Some(-2.51)), -3);
        assert_eq!(round_whole(Some(-0.4)), 0);
    }
}
