//! Batch progress aggregation.
//!
//! `percent_complete` is sweep-weighted: failed and cancelled jobs count
//! toward finishing the sweep, not toward success. Use `success_rate` (or
//! `by_status[Completed]`) for a success-only figure; the two are never
//! interchangeable.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::batch::{BatchRecord, BatchStatus};
use crate::estimation::round_cents;
use crate::job::JobStatus;

/// Point-in-time progress of one batch, suitable for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    /// Every status is present, zero counts included.
    pub by_status: BTreeMap<JobStatus, usize>,
    /// Share of jobs resolved at least once, 0-100.
    pub percent_complete: f64,
    /// Share of jobs currently completed, 0-100.
    pub success_rate: f64,
    /// Credits attributed to completed renders.
    pub estimated_cost_so_far: f64,
    /// Credits if every job completes.
    pub estimated_total_cost: f64,
    pub status: BatchStatus,
    /// "N of M failed" when any job failed or was cancelled.
    pub failure_summary: Option<String>,
}

/// Summarize a batch. Pure; recomputed on demand from the job set.
pub fn summarize(batch: &BatchRecord) -> ProgressSummary {
    let total = batch.jobs.len();
    let mut by_status: BTreeMap<JobStatus, usize> =
        JobStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    let mut swept = 0usize;
    let mut cost_so_far = 0.0;
    let mut total_cost = 0.0;

    for job in &batch.jobs {
        *by_status.entry(job.status).or_default() += 1;
        if job.is_swept() {
            swept += 1;
        }
        if job.status == JobStatus::Completed {
            cost_so_far += job.estimated_cost;
        }
        total_cost += job.estimated_cost;
    }

    let completed = by_status[&JobStatus::Completed];
    let percent_complete = if total == 0 {
        if batch.started_at.is_some() {
            100.0
        } else {
            0.0
        }
    } else {
        percent(swept, total)
    };

    ProgressSummary {
        total,
        by_status,
        percent_complete,
        success_rate: percent(completed, total),
        estimated_cost_so_far: round_cents(cost_so_far),
        estimated_total_cost: round_cents(total_cost),
        status: batch.status(),
        failure_summary: batch.failure_summary(),
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}
