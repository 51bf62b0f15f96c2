use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;
use tracing::info;

use crate::domain::Cell;
use crate::error::HeatmapError;

#[derive(Debug, Deserialize)]
struct CellEntry {
    id: String,
    lat: f64,
    lon: f64,
}

/// Reads the whole cell source. Any problem here is fatal for the run.
pub fn load_cells(path: &Utf8Path, limit: Option<usize>) -> Result<Vec<Cell>, HeatmapError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|_| HeatmapError::SourceRead(path.as_std_path().to_path_buf()))?;
    let mut cells = parse_cells(&content)?;
    let total = cells.len();

    if let Some(limit) = limit {
        cells.truncate(limit);
        info!(loaded = cells.len(), total, "loaded cells (test mode)");
    } else {
        info!(loaded = total, "loaded cells");
    }
    Ok(cells)
}

pub fn parse_cells(content: &str) -> Result<Vec<Cell>, HeatmapError> {
    let entries: Vec<CellEntry> =
        serde_json::from_str(content).map_err(|err| HeatmapError::SourceParse(err.to_string()))?;

    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .into_iter()
        .map(|entry| {
            let cell = Cell::new(&entry.id, entry.lat, entry.lon)?;
            if !seen.insert(cell.id.clone()) {
                return Err(HeatmapError::DuplicateCell(cell.id.to_string()));
            }
            Ok(cell)
        })
        .collect()
}
