use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffController, FailureDecision, Sleeper};
use crate::config::ResolvedConfig;
use crate::domain::{Cell, CellId, ForecastWindow};
use crate::error::HeatmapError;
use crate::forecast::{ForecastClient, ForecastFetcher, PRIMARY_MODEL};
use crate::metrics::derive_batch;
use crate::partition::Partitioner;
use crate::store::{CheckpointStore, FreshReason, LoadOutcome, ModelsUsed, StoreDocument};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Mutable state of one run: where the loop is, how big the next batch is,
/// and everything stored so far.
#[derive(Debug, Clone)]
pub struct Session {
    pub partitioner: Partitioner,
    pub backoff: BackoffController,
    pub store: CheckpointStore,
}

impl Session {
    pub fn new(total_cells: usize, backoff: BackoffController, store: CheckpointStore) -> Self {
        Self {
            partitioner: Partitioner::new(total_cells),
            backoff,
            store,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Every cell of the slice was already stored; no request was made.
    Skipped { span: usize },
    Stored {
        span: usize,
        added: usize,
        missing: Vec<CellId>,
        pacing: Duration,
    },
    /// The fetch failed; the cursor stays put and the batch shrinks.
    Failed { error: String, cooldown: Duration },
    Finished,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub cells_total: usize,
    pub cells_stored: usize,
    pub cells_added: usize,
    pub batches_fetched: usize,
    pub batches_skipped: usize,
    pub failures: usize,
    pub missing_cells: Vec<String>,
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub cells_total: usize,
    pub cells_done: usize,
    pub cells_pending: usize,
    /// Stored ids that are not in the cell source.
    pub unknown_ids: usize,
    pub day_count: u32,
    pub generated_at: Option<String>,
    pub output_path: String,
}

pub struct Pipeline<C: ForecastClient, S: Sleeper> {
    config: ResolvedConfig,
    client: C,
    sleeper: S,
    window: ForecastWindow,
}

impl<C: ForecastClient, S: Sleeper> Pipeline<C, S> {
    pub fn new(config: ResolvedConfig, client: C, sleeper: S, window: ForecastWindow) -> Self {
        Self {
            config,
            client,
            sleeper,
            window,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn fresh_document(&self) -> StoreDocument {
        StoreDocument::empty(
            &self.window,
            ModelsUsed {
                primary: PRIMARY_MODEL.to_string(),
                gusts: self.config.provider.gust_model.clone(),
            },
        )
    }

    pub fn open_store(&self, sink: &dyn ProgressSink) -> (CheckpointStore, LoadOutcome) {
        let (mut store, outcome) =
            CheckpointStore::load_or_default(&self.config.output_path, self.fresh_document());
        match &outcome {
            LoadOutcome::Loaded { cells } => {
                info!(cells, path = %store.path(), "resuming from existing output");
                sink.event(ProgressEvent {
                    message: format!("phase=Resume; already have {cells} cells"),
                    elapsed: None,
                });
                let stored_days = store.document().day_count;
                if stored_days != self.config.horizon_days {
                    warn!(
                        stored_days,
                        configured_days = self.config.horizon_days,
                        "stored horizon differs from configuration; new cells use the configured horizon"
                    );
                }
                if store.document().start_date != self.window.start() {
                    info!(
                        stored_start = %store.document().start_date,
                        start = %self.window.start(),
                        "moving stored forecast window to this run"
                    );
                }
                store.refresh_window(&self.window);
            }
            LoadOutcome::Fresh(FreshReason::Missing) => {
                info!(path = %store.path(), "no existing output, starting fresh");
            }
            LoadOutcome::Fresh(FreshReason::Unreadable(reason))
            | LoadOutcome::Fresh(FreshReason::Corrupt(reason)) => {
                warn!(path = %store.path(), %reason, "could not read existing output, starting fresh");
                sink.event(ProgressEvent {
                    message: "phase=Resume; existing output unreadable, starting fresh".to_string(),
                    elapsed: None,
                });
            }
        }
        (store, outcome)
    }

    pub fn new_session(&self, cells: &[Cell], store: CheckpointStore) -> Session {
        Session::new(cells.len(), BackoffController::from_config(&self.config), store)
    }

    /// Processes one slice at the cursor. Only non-transient errors are returned.
    pub fn step(
        &self,
        cells: &[Cell],
        session: &mut Session,
        sink: &dyn ProgressSink,
    ) -> Result<StepOutcome, HeatmapError> {
        if session.partitioner.is_done() {
            return Ok(StepOutcome::Finished);
        }

        let batch_size = session.backoff.batch_size();
        let slice = session
            .partitioner
            .next_batch(cells, &session.store, batch_size);
        let label = format!(
            "cells {}..{} of {}",
            slice.start,
            slice.start + slice.span,
            session.partitioner.total()
        );

        if slice.is_empty() {
            debug!(start = slice.start, span = slice.span, "slice already done");
            sink.event(ProgressEvent {
                message: format!("phase=Skip; {label} already done"),
                elapsed: None,
            });
            session.partitioner.advance(slice.span);
            return Ok(StepOutcome::Skipped { span: slice.span });
        }

        info!(
            start = slice.start,
            pending = slice.pending.len(),
            skipped = slice.already_done(),
            batch_size,
            "fetching batch"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; {label} ({} pending, batch size {batch_size})",
                slice.pending.len()
            ),
            elapsed: None,
        });

        let fetcher = ForecastFetcher::new(&self.client, self.window, &self.config.provider);
        let started = Instant::now();
        let forecast = match fetcher.fetch(&slice.pending) {
            Ok(forecast) => forecast,
            Err(err) if err.is_transient() => {
                return match session.backoff.on_failure() {
                    FailureDecision::Retry(cooldown) => {
                        warn!(
                            error = %err,
                            next_batch_size = session.backoff.batch_size(),
                            cooldown_ms = cooldown.as_millis() as u64,
                            "batch failed, pausing before retry"
                        );
                        sink.event(ProgressEvent {
                            message: format!(
                                "phase=Backoff; {err}; pausing {}s",
                                cooldown.as_secs()
                            ),
                            elapsed: Some(started.elapsed()),
                        });
                        Ok(StepOutcome::Failed {
                            error: err.to_string(),
                            cooldown,
                        })
                    }
                    FailureDecision::GiveUp { attempts } => Err(HeatmapError::RetriesExhausted {
                        cursor: session.partitioner.cursor(),
                        attempts,
                    }),
                };
            }
            Err(err) => return Err(err),
        };

        let horizon = self.config.horizon_days as usize;
        let derivation = derive_batch(&slice.pending, &forecast, horizon);
        let added = session.store.merge(derivation.records);
        session.store.persist()?;
        session.partitioner.advance(slice.span);
        let pacing = session.backoff.on_success();

        info!(
            added,
            missing = derivation.missing.len(),
            stored = session.store.len(),
            "saved batch"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; saved {} cells ({added} new)",
                session.store.len()
            ),
            elapsed: Some(started.elapsed()),
        });

        Ok(StepOutcome::Stored {
            span: slice.span,
            added,
            missing: derivation.missing,
            pacing,
        })
    }

    /// Runs until every cell has been visited. Transient failures are retried,
    /// forever unless a retry ceiling is configured.
    pub fn run(
        &self,
        cells: &[Cell],
        session: &mut Session,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, HeatmapError> {
        let mut summary = RunSummary {
            cells_total: cells.len(),
            output_path: session.store.path().to_string(),
            ..RunSummary::default()
        };

        loop {
            match self.step(cells, session, sink)? {
                StepOutcome::Finished => break,
                StepOutcome::Skipped { .. } => summary.batches_skipped += 1,
                StepOutcome::Stored {
                    added,
                    missing,
                    pacing,
                    ..
                } => {
                    summary.batches_fetched += 1;
                    summary.cells_added += added;
                    summary
                        .missing_cells
                        .extend(missing.into_iter().map(|id| id.to_string()));
                    if !session.partitioner.is_done() {
                        self.sleeper.sleep(pacing);
                    }
                }
                StepOutcome::Failed { cooldown, .. } => {
                    summary.failures += 1;
                    self.sleeper.sleep(cooldown);
                }
            }
        }

        summary.cells_stored = session.store.len();
        info!(
            stored = summary.cells_stored,
            added = summary.cells_added,
            failures = summary.failures,
            "all batches processed"
        );
        sink.event(ProgressEvent {
            message: "phase=Done; all batches processed".to_string(),
            elapsed: None,
        });
        Ok(summary)
    }
}

pub fn status(cells: &[Cell], store: &CheckpointStore, outcome: &LoadOutcome) -> StatusReport {
    let source_ids: HashSet<&CellId> = cells.iter().map(|cell| &cell.id).collect();
    let cells_done = cells.iter().filter(|cell| store.has(&cell.id)).count();
    let unknown_ids = store
        .document()
        .cells
        .keys()
        .filter(|id| !source_ids.contains(id))
        .count();
    StatusReport {
        cells_total: cells.len(),
        cells_done,
        cells_pending: cells.len() - cells_done,
        unknown_ids,
        day_count: store.document().day_count,
        generated_at: matches!(outcome, LoadOutcome::Loaded { .. })
            .then(|| store.document().generated_at.clone()),
        output_path: store.path().to_string(),
    }
}
