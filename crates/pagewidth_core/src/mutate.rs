use std::thread::sleep;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{Block, MutationError, NotionApi};
use crate::collect::PageSet;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownErrorPolicy {
    #[default]
    Abort,
    Skip,
}

impl UnknownErrorPolicy {
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("abort") {
            return Ok(Self::Abort);
        }
        if value.eq_ignore_ascii_case("skip") {
            return Ok(Self::Skip);
        }
        bail!("unsupported unknown-error policy: {value} (expected abort|skip)")
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub full_width: bool,
    pub delay: Duration,
    pub unknown_errors: UnknownErrorPolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            full_width: true,
            delay: DEFAULT_DELAY,
            unknown_errors: UnknownErrorPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    SkippedNoAccess,
    Fatal(MutationError),
}

impl MutationOutcome {
    pub fn from_result(result: Result<(), MutationError>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(error) if error.is_access_denied() => Self::SkippedNoAccess,
            Err(error) => Self::Fatal(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageFailure {
    pub page_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: Vec<PageFailure>,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.applied + self.skipped + self.failed.len()
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed())
    }
}

#[derive(Debug, Error)]
#[error(
    "aborted at page {page_id} after {} of {} pages",
    .summary.processed(),
    .summary.total
)]
pub struct BatchAborted {
    pub page_id: String,
    pub summary: BatchSummary,
    #[source]
    pub source: MutationError,
}

pub trait Pacer {
    fn pause(&mut self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, delay: Duration) {
        if !delay.is_zero() {
            sleep(delay);
        }
    }
}

pub trait ProgressObserver {
    fn page_finished(&mut self, page: &Block, outcome: &MutationOutcome, summary: &BatchSummary);
}

impl ProgressObserver for () {
    fn page_finished(&mut self, _page: &Block, _outcome: &MutationOutcome, _summary: &BatchSummary) {}
}

pub fn run_batch<A: NotionApi, O: ProgressObserver>(
    api: &mut A,
    pages: &PageSet,
    options: &BatchOptions,
    observer: &mut O,
) -> Result<BatchSummary, BatchAborted> {
    run_batch_with_pacer(api, pages, options, &mut ThreadPacer, observer)
}

/// A fixed `options.delay` pause follows every page that did not abort the run.
pub fn run_batch_with_pacer<A: NotionApi, P: Pacer, O: ProgressObserver>(
    api: &mut A,
    pages: &PageSet,
    options: &BatchOptions,
    pacer: &mut P,
    observer: &mut O,
) -> Result<BatchSummary, BatchAborted> {
    let mut summary = BatchSummary {
        total: pages.len(),
        ..BatchSummary::default()
    };

    for page in pages {
        let outcome = MutationOutcome::from_result(api.set_full_width(&page.id, options.full_width));
        match &outcome {
            MutationOutcome::Applied => {
                debug!(page = %page.id, "applied full width setting");
                summary.applied += 1;
            }
            MutationOutcome::SkippedNoAccess => {
                debug!(page = %page.id, "skipping page without edit access");
                summary.skipped += 1;
            }
            MutationOutcome::Fatal(error) => match options.unknown_errors {
                UnknownErrorPolicy::Abort => {
                    warn!(page = %page.id, error = %error, "aborting batch");
                    return Err(BatchAborted {
                        page_id: page.id.clone(),
                        summary,
                        source: error.clone(),
                    });
                }
                UnknownErrorPolicy::Skip => {
                    warn!(page = %page.id, error = %error, "ignoring unrecognized mutation error");
                    summary.failed.push(PageFailure {
                        page_id: page.id.clone(),
                        message: error.message.clone(),
                    });
                }
            },
        }

        observer.page_finished(page, &outcome, &summary);
        pacer.pause(options.delay);
    }

    Ok(summary)
}
