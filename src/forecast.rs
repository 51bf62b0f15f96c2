use std::collections::HashMap;
use std::thread;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProviderSettings;
use crate::domain::{Cell, ForecastWindow};
use crate::error::HeatmapError;

/// Model label recorded for the primary lookup, which does not pin a model.
pub const PRIMARY_MODEL: &str = "best_match";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DailyField {
    TemperatureMin,
    TemperatureMax,
    PrecipitationSum,
    SunshineDuration,
    CloudCoverMean,
    WeatherCode,
    WindSpeedMax,
    WindGustsMax,
}

impl DailyField {
    pub const PRIMARY: [DailyField; 7] = [
        DailyField::TemperatureMin,
        DailyField::TemperatureMax,
        DailyField::PrecipitationSum,
        DailyField::SunshineDuration,
        DailyField::CloudCoverMean,
        DailyField::WeatherCode,
        DailyField::WindSpeedMax,
    ];

    pub const GUSTS: [DailyField; 1] = [DailyField::WindGustsMax];

    pub fn as_str(self) -> &'static str {
        match self {
            DailyField::TemperatureMin => "temperature_2m_min",
            DailyField::TemperatureMax => "temperature_2m_max",
            DailyField::PrecipitationSum => "precipitation_sum",
            DailyField::SunshineDuration => "sunshine_duration",
            DailyField::CloudCoverMean => "cloud_cover_mean",
            DailyField::WeatherCode => "weather_code",
            DailyField::WindSpeedMax => "wind_speed_10m_max",
            DailyField::WindGustsMax => "wind_gusts_10m_max",
        }
    }
}

/// Per-day arrays keyed by provider field name. Entries may be `null`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct DailySeries(HashMap<String, Vec<Value>>);

impl DailySeries {
    pub fn value(&self, field: DailyField, day: usize) -> Option<f64> {
        self.0
            .get(field.as_str())
            .and_then(|values| values.get(day))
            .and_then(Value::as_f64)
    }

    pub fn insert(&mut self, field: DailyField, values: Vec<Option<f64>>) {
        let values = values
            .into_iter()
            .map(|value| value.map(Value::from).unwrap_or(Value::Null))
            .collect();
        self.0.insert(field.as_str().to_string(), values);
    }
}

impl FromIterator<(DailyField, Vec<Option<f64>>)> for DailySeries {
    fn from_iter<T: IntoIterator<Item = (DailyField, Vec<Option<f64>>)>>(iter: T) -> Self {
        let mut series = DailySeries::default();
        for (field, values) in iter {
            series.insert(field, values);
        }
        series
    }
}

/// One coordinate's answer. Everything except `daily` is ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub daily: Option<DailySeries>,
}

impl ForecastResponse {
    pub fn with_daily(daily: DailySeries) -> Self {
        Self { daily: Some(daily) }
    }

    pub fn missing() -> Self {
        Self { daily: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRequest {
    pub latitudes: String,
    pub longitudes: String,
    pub fields: Vec<DailyField>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timezone: String,
    pub model: Option<String>,
}

impl DailyRequest {
    pub fn for_cells(
        cells: &[Cell],
        fields: &[DailyField],
        window: &ForecastWindow,
        timezone: &str,
        model: Option<&str>,
    ) -> Self {
        Self {
            latitudes: join_coordinates(cells.iter().map(|cell| cell.lat)),
            longitudes: join_coordinates(cells.iter().map(|cell| cell.lon)),
            fields: fields.to_vec(),
            start_date: window.start(),
            end_date: window.end(),
            timezone: timezone.to_string(),
            model: model.map(str::to_string),
        }
    }

    pub fn coordinate_count(&self) -> usize {
        if self.latitudes.is_empty() {
            return 0;
        }
        self.latitudes.split(',').count()
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("latitude", self.latitudes.clone()),
            ("longitude", self.longitudes.clone()),
            (
                "daily",
                self.fields
                    .iter()
                    .map(|field| field.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ("start_date", self.start_date.format("%Y-%m-%d").to_string()),
            ("end_date", self.end_date.format("%Y-%m-%d").to_string()),
            ("timezone", self.timezone.clone()),
        ];
        if let Some(model) = &self.model {
            pairs.push(("models", model.clone()));
        }
        pairs
    }
}

fn join_coordinates(values: impl Iterator<Item = f64>) -> String {
    values
        .map(|value| format!("{value:.4}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub trait ForecastClient: Send + Sync {
    /// Returns one response per requested coordinate, in request order.
    fn fetch_daily(&self, request: &DailyRequest) -> Result<Vec<ForecastResponse>, HeatmapError>;
}

impl<C: ForecastClient + ?Sized> ForecastClient for &C {
    fn fetch_daily(&self, request: &DailyRequest) -> Result<Vec<ForecastResponse>, HeatmapError> {
        (**self).fetch_daily(request)
    }
}

#[derive(Clone)]
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, HeatmapError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("heatmap-weather/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HeatmapError::ForecastHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| HeatmapError::ForecastHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ForecastClient for OpenMeteoClient {
    fn fetch_daily(&self, request: &DailyRequest) -> Result<Vec<ForecastResponse>, HeatmapError> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .get(&self.base_url)
            .query(&request.query_pairs())
            .send()
            .map_err(|err| HeatmapError::ForecastHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let success = response.status().is_success();
        let body = response
            .text()
            .map_err(|err| HeatmapError::ForecastHttp(err.to_string()))?;
        debug!(
            status,
            coordinates = request.coordinate_count(),
            latency_ms = started.elapsed().as_millis() as u64,
            "forecast response"
        );

        let payload = serde_json::from_str::<Value>(&body);
        if !success {
            // Rate limits and bad requests usually carry the provider's error object.
            if let Ok(value) = &payload {
                if let Some(reason) = provider_error(value) {
                    return Err(HeatmapError::Provider(reason));
                }
            }
            return Err(HeatmapError::ForecastStatus {
                status,
                message: truncate(&body, 200),
            });
        }

        let payload = payload.map_err(|err| HeatmapError::ForecastDecode(err.to_string()))?;
        parse_payload(payload, request.coordinate_count())
    }
}

/// Normalizes a provider payload into exactly `expected` responses.
pub fn parse_payload(
    payload: Value,
    expected: usize,
) -> Result<Vec<ForecastResponse>, HeatmapError> {
    if let Some(reason) = provider_error(&payload) {
        return Err(HeatmapError::Provider(reason));
    }

    let mut responses: Vec<ForecastResponse> = match payload {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| decode_response(index, item))
            .collect(),
        Value::Object(_) => vec![decode_response(0, payload)],
        other => {
            return Err(HeatmapError::ForecastDecode(format!(
                "expected an object or array, got {}",
                truncate(&other.to_string(), 80)
            )));
        }
    };

    if responses.len() != expected {
        warn!(
            expected,
            received = responses.len(),
            "forecast response count does not match request"
        );
        responses.resize_with(expected, ForecastResponse::missing);
    }
    Ok(responses)
}

/// An item that does not decode counts as "no daily data" for that coordinate only.
fn decode_response(index: usize, item: Value) -> ForecastResponse {
    serde_json::from_value(item).unwrap_or_else(|err| {
        warn!(index, error = %err, "undecodable forecast item, treating as missing");
        ForecastResponse::missing()
    })
}

fn provider_error(value: &Value) -> Option<String> {
    let flagged = value
        .get("error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !flagged {
        return None;
    }
    Some(
        value
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

/// Primary and gust responses for one batch, index-aligned with the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchForecast {
    pub primary: Vec<ForecastResponse>,
    pub gusts: Vec<ForecastResponse>,
}

pub struct ForecastFetcher<'a, C: ForecastClient> {
    client: &'a C,
    window: ForecastWindow,
    timezone: String,
    gust_model: String,
}

impl<'a, C: ForecastClient> ForecastFetcher<'a, C> {
    pub fn new(client: &'a C, window: ForecastWindow, settings: &ProviderSettings) -> Self {
        Self {
            client,
            window,
            timezone: settings.timezone.clone(),
            gust_model: settings.gust_model.clone(),
        }
    }

    pub fn primary_request(&self, batch: &[Cell]) -> DailyRequest {
        DailyRequest::for_cells(batch, &DailyField::PRIMARY, &self.window, &self.timezone, None)
    }

    pub fn gust_request(&self, batch: &[Cell]) -> DailyRequest {
        DailyRequest::for_cells(
            batch,
            &DailyField::GUSTS,
            &self.window,
            &self.timezone,
            Some(self.gust_model.as_str()),
        )
    }

    /// Runs both lookups concurrently and fails if either fails.
    pub fn fetch(&self, batch: &[Cell]) -> Result<BatchForecast, HeatmapError> {
        let primary_request = self.primary_request(batch);
        let gust_request = self.gust_request(batch);

        let (primary, gusts) = thread::scope(|scope| {
            let primary = scope.spawn(|| self.client.fetch_daily(&primary_request));
            let gusts = scope.spawn(|| self.client.fetch_daily(&gust_request));
            (join_lookup(primary.join()), join_lookup(gusts.join()))
        });

        let primary = primary?;
        let gusts = gusts?;
        Ok(BatchForecast {
            primary: align(primary, batch.len()),
            gusts: align(gusts, batch.len()),
        })
    }
}

fn join_lookup(
    joined: thread::Result<Result<Vec<ForecastResponse>, HeatmapError>>,
) -> Result<Vec<ForecastResponse>, HeatmapError> {
    joined.unwrap_or_else(|_| {
        Err(HeatmapError::ForecastHttp(
            "forecast lookup thread panicked".to_string(),
        ))
    })
}

fn align(mut responses: Vec<ForecastResponse>, len: usize) -> Vec<ForecastResponse> {
    responses.resize_with(len, ForecastResponse::missing);
    responses
}
