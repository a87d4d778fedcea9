//! Concurrent, rate-limited synthesis of neutral summaries.
//!
//! Jobs run on a bounded pool (`buffer_unordered`). Every call goes through
//! the shared [`RateLimiter`]. A rate-limit or quota error trips the limiter
//! and raises the stop flag: jobs already dispatched finish, nothing new is
//! submitted. Results are folded into the report on the caller's task as they
//! complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_client::util::truncate_to_char_boundary;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use neutralnews_common::config::SynthesisConfig;
use neutralnews_common::{GroupId, NeutralSynthesizer, SynthesisError, SynthesisOutput, SynthesisSource};

use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Create,
    Update,
}

#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub group_id: GroupId,
    pub kind: JobKind,
    pub sources: Vec<SynthesisSource>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        group_id: GroupId,
        kind: JobKind,
        output: SynthesisOutput,
    },
    /// A hard rate or quota limit was hit; no partial output.
    Stopped {
        group_id: GroupId,
        error: SynthesisError,
    },
    /// Retries or the reduced retry ran out, or the request was rejected.
    GaveUp {
        group_id: GroupId,
        error: SynthesisError,
    },
    /// Skipped because a stop was already signalled.
    NotSubmitted { group_id: GroupId },
}

impl JobOutcome {
    pub fn group_id(&self) -> GroupId {
        match self {
            JobOutcome::Completed { group_id, .. }
            | JobOutcome::Stopped { group_id, .. }
            | JobOutcome::GaveUp { group_id, .. }
            | JobOutcome::NotSubmitted { group_id } => *group_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<JobOutcome>,
    pub created: u32,
    pub updated: u32,
    pub stopped: u32,
    pub failed: u32,
    pub not_submitted: u32,
    pub calls: u32,
}

impl DispatchReport {
    fn record(&mut self, outcome: JobOutcome, calls: u32) {
        self.calls += calls;
        match &outcome {
            JobOutcome::Completed { kind: JobKind::Create, .. } => self.created += 1,
            JobOutcome::Completed { kind: JobKind::Update, .. } => self.updated += 1,
            JobOutcome::Stopped { .. } => self.stopped += 1,
            JobOutcome::GaveUp { .. } => self.failed += 1,
            JobOutcome::NotSubmitted { .. } => self.not_submitted += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn completed(&self) -> impl Iterator<Item = (GroupId, JobKind, &SynthesisOutput)> {
        self.outcomes.iter().filter_map(|o| match o {
            JobOutcome::Completed {
                group_id,
                kind,
                output,
            } => Some((*group_id, *kind, output)),
            _ => None,
        })
    }
}

impl std::fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created={} updated={} stopped={} failed={} not_submitted={} calls={}",
            self.created, self.updated, self.stopped, self.failed, self.not_submitted, self.calls
        )
    }
}

pub struct SynthesisDispatcher {
    synthesizer: Arc<dyn NeutralSynthesizer>,
    limiter: Arc<RateLimiter>,
    config: SynthesisConfig,
}

impl SynthesisDispatcher {
    pub fn new(
        synthesizer: Arc<dyn NeutralSynthesizer>,
        limiter: Arc<RateLimiter>,
        config: SynthesisConfig,
    ) -> Self {
        Self {
            synthesizer,
            limiter,
            config,
        }
    }

    pub async fn dispatch(&self, jobs: Vec<SynthesisJob>) -> DispatchReport {
        let mut report = DispatchReport::default();
        if jobs.is_empty() {
            return report;
        }

        let workers = self.config.max_workers.min(jobs.len()).max(1);
        let stop = AtomicBool::new(false);
        info!(jobs = jobs.len(), workers, "Dispatching synthesis jobs");

        // The stop check sits in `map`, which runs when the pool pulls the
        // next job, so it gates submission rather than in-flight work.
        let mut results = stream::iter(jobs)
            .map(|job| {
                let submit = !stop.load(Ordering::SeqCst);
                let stop = &stop;
                async move {
                    if submit {
                        self.run_job(job, stop).await
                    } else {
                        (JobOutcome::NotSubmitted { group_id: job.group_id }, 0)
                    }
                }
            })
            .buffer_unordered(workers);

        while let Some((outcome, calls)) = results.next().await {
            report.record(outcome, calls);
        }

        info!(%report, "Synthesis dispatch complete");
        report
    }

    /// Run one job to completion. Returns the outcome and the number of
    /// synthesis calls it made.
    async fn run_job(&self, job: SynthesisJob, stop: &AtomicBool) -> (JobOutcome, u32) {
        let group_id = job.group_id;
        let mut sources = job.sources.clone();
        let mut calls = 0u32;
        let mut attempt = 0u32;
        let mut reduced = false;

        loop {
            self.limiter.acquire().await;
            calls += 1;

            let error = match self.synthesizer.generate(&sources).await {
                Ok(output) => {
                    let outcome = JobOutcome::Completed {
                        group_id,
                        kind: job.kind,
                        output: output.clamped(),
                    };
                    return (outcome, calls);
                }
                Err(e) => e,
            };

            match error {
                e if e.is_hard_limit() => {
                    warn!(group_id, error = %e, "Synthesis limit hit, stopping dispatch");
                    self.limiter.trip().await;
                    stop.store(true, Ordering::SeqCst);
                    return (JobOutcome::Stopped { group_id, error: e }, calls);
                }
                SynthesisError::ContextTooLarge(msg) if !reduced => {
                    warn!(group_id, error = msg.as_str(), "Synthesis input too large, retrying reduced");
                    reduced = true;
                    sources = reduce_sources(
                        &job.sources,
                        self.config.reduced_source_count,
                        &self.config.reduced_text_chars,
                    );
                }
                e @ SynthesisError::ContextTooLarge(_) => {
                    warn!(group_id, error = %e, "Reduced synthesis input still too large, giving up");
                    return (JobOutcome::GaveUp { group_id, error: e }, calls);
                }
                e @ SynthesisError::Rejected(_) => {
                    warn!(group_id, error = %e, "Synthesis request rejected, giving up");
                    return (JobOutcome::GaveUp { group_id, error: e }, calls);
                }
                e => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        warn!(group_id, attempt, error = %e, "Synthesis failed, giving up");
                        return (JobOutcome::GaveUp { group_id, error: e }, calls);
                    }
                    let backoff = Duration::from_secs(self.config.backoff_base_secs.pow(attempt));
                    warn!(
                        group_id,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Synthesis failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Keep the `count` sources with the shortest text, shortest first, and cut
/// the i-th one to `caps[i]` bytes (the last cap applies to the rest).
pub fn reduce_sources(sources: &[SynthesisSource], count: usize, caps: &[usize]) -> Vec<SynthesisSource> {
    let mut order: Vec<usize> = (0..sources.len()).collect();
    order.sort_by_key(|&i| (sources[i].text.len(), i));

    order
        .into_iter()
        .take(count.max(1))
        .enumerate()
        .map(|(rank, i)| {
            let mut source = sources[i].clone();
            if let Some(cap) = caps.get(rank).or(caps.last()) {
                source.text = truncate_to_char_boundary(&source.text, *cap).to_string();
            }
            source
        })
        .collect()
}
