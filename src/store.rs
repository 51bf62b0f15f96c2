use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::domain::{CellId, CellRecord, ForecastWindow};
use crate::error::HeatmapError;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelsUsed {
    pub primary: String,
    pub gusts: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    pub version: u32,
    pub generated_at: String,
    pub day_count: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub models_used: ModelsUsed,
    pub cells: BTreeMap<CellId, CellRecord>,
}

impl StoreDocument {
    pub fn empty(window: &ForecastWindow, models_used: ModelsUsed) -> Self {
        Self {
            version: SCHEMA_VERSION,
            generated_at: iso_timestamp(),
            day_count: window.days(),
            start_date: window.start(),
            end_date: window.end(),
            models_used,
            cells: BTreeMap::new(),
        }
    }
}

/// Why a run started from an empty document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshReason {
    Missing,
    Unreadable(String),
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { cells: usize },
    Fresh(FreshReason),
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: Utf8PathBuf,
    document: StoreDocument,
}

impl CheckpointStore {
    pub fn new(path: Utf8PathBuf, document: StoreDocument) -> Self {
        Self { path, document }
    }

    /// Resumes from `path` when it holds a readable document, otherwise starts from
    /// `fresh`. Never fails: an unreadable checkpoint is discarded.
    pub fn load_or_default(path: &Utf8Path, fresh: StoreDocument) -> (Self, LoadOutcome) {
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return (
                    Self::new(path.to_path_buf(), fresh),
                    LoadOutcome::Fresh(FreshReason::Missing),
                );
            }
            Err(err) => {
                return (
                    Self::new(path.to_path_buf(), fresh),
                    LoadOutcome::Fresh(FreshReason::Unreadable(err.to_string())),
                );
            }
        };

        match serde_json::from_str::<StoreDocument>(&content) {
            Ok(document) => {
                let cells = document.cells.len();
                (
                    Self::new(path.to_path_buf(), document),
                    LoadOutcome::Loaded { cells },
                )
            }
            Err(err) => (
                Self::new(path.to_path_buf(), fresh),
                LoadOutcome::Fresh(FreshReason::Corrupt(err.to_string())),
            ),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn document(&self) -> &StoreDocument {
        &self.document
    }

    pub fn has(&self, id: &CellId) -> bool {
        self.document.cells.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.document.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.cells.is_empty()
    }

    /// Adds records for ids not stored yet and returns how many were added.
    /// Existing records are never replaced.
    pub fn merge(&mut self, records: impl IntoIterator<Item = CellRecord>) -> usize {
        let mut added = 0;
        for record in records {
            if let std::collections::btree_map::Entry::Vacant(entry) =
                self.document.cells.entry(record.id.clone())
            {
                entry.insert(record);
                added += 1;
            }
        }
        added
    }

    /// Points the header at the window of the current run. Records already stored keep
    /// the days they were fetched with.
    pub fn refresh_window(&mut self, window: &ForecastWindow) {
        self.document.day_count = window.days();
        self.document.start_date = window.start();
        self.document.end_date = window.end();
    }

    /// Rewrites the whole document through a temp file in the target directory.
    pub fn persist(&mut self) -> Result<(), HeatmapError> {
        self.document.generated_at = iso_timestamp();
        let content = serde_json::to_vec(&self.document)
            .map_err(|err| HeatmapError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.path, &content)
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HeatmapError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HeatmapError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".heatmap-weather")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HeatmapError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| HeatmapError::Filesystem(err.to_string()))?;
    temp.flush()
        .map_err(|err| HeatmapError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| HeatmapError::Filesystem(err.to_string()))?;
    Ok(())
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cell, DayMetric};

    fn document() -> StoreDocument {
        let window =
            ForecastWindow::new(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), 2).unwrap();
        StoreDocument::empty(
            &window,
            ModelsUsed {
                primary: "best_match".to_string(),
                gusts: "icon_seamless".to_string(),
            },
        )
    }

    fn record(id: &str, min: i64) -> CellRecord {
        let cell = Cell::new(id, 1.0, 2.0).unwrap();
        CellRecord {
            id: cell.id,
            lat: cell.lat,
            lon: cell.lon,
            days: vec![DayMetric::from([min, 0, 0, 0, 0, 0])],
        }
    }

    #[test]
    fn merge_keeps_existing_records() {
        let mut store = CheckpointStore::new(Utf8PathBuf::from("unused.json"), document());
        assert_eq!(store.merge(vec![record("a", 1)]), 1);
        assert_eq!(store.merge(vec![record("a", 9), record("b", 2)]), 1);

        let id: CellId = "a".parse().unwrap();
        assert_eq!(store.document().cells[&id].days[0].temperature_min, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn refresh_window_moves_header_only() {
        let mut store = CheckpointStore::new(Utf8PathBuf::from("unused.json"), document());
        store.merge(vec![record("a", 1)]);
        let window =
            ForecastWindow::new(NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(), 4).unwrap();
        store.refresh_window(&window);

        assert_eq!(store.document().day_count, 4);
        assert_eq!(
            store.document().end_date,
            NaiveDate::from_ymd_opt(2026, 2, 13).unwrap()
        );
        assert_eq!(store.document().cells.len(), 1);
    }

    #[test]
    fn document_uses_camel_case_keys() {
        let json = serde_json::to_value(document()).unwrap();
        for key in [
            "version",
            "generatedAt",
            "dayCount",
            "startDate",
            "endDate",
            "modelsUsed",
            "cells",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["endDate"], "2026-01-06");
    }
}
