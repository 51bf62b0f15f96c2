use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HeatmapError {
    #[error("invalid cell id: {0:?}")]
    InvalidCellId(String),

    #[error("invalid cell {id}: {reason}")]
    InvalidCell { id: String, reason: String },

    #[error("duplicate cell id in cell source: {0}")]
    DuplicateCell(String),

    #[error("failed to read cell source at {0}")]
    SourceRead(PathBuf),

    #[error("failed to parse cell source: {0}")]
    SourceParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("forecast request failed: {0}")]
    ForecastHttp(String),

    #[error("forecast provider returned status {status}: {message}")]
    ForecastStatus { status: u16, message: String },

    #[error("forecast provider reported an error: {0}")]
    Provider(String),

    #[error("failed to decode forecast response: {0}")]
    ForecastDecode(String),

    #[error("giving up on batch at cell index {cursor} after {attempts} failed attempts")]
    RetriesExhausted { cursor: usize, attempts: u32 },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl HeatmapError {
    /// Failures that back off and retry the same batch instead of aborting the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HeatmapError::ForecastHttp(_)
                | HeatmapError::ForecastStatus { .. }
                | HeatmapError::Provider(_)
                | HeatmapError::ForecastDecode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failures_are_transient() {
        assert!(HeatmapError::ForecastHttp("timeout".to_string()).is_transient());
        assert!(
            HeatmapError::ForecastStatus {
                status: 429,
                message: "slow down".to_string()
            }
            .is_transient()
        );
        assert!(HeatmapError::Provider("limit exceeded".to_string()).is_transient());
        assert!(!HeatmapError::Filesystem("disk full".to_string()).is_transient());
        assert!(!HeatmapError::SourceParse("eof".to_string()).is_transient());
    }
}
