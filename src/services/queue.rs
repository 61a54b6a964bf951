// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Deferred processing of staged payloads.
//!
//! The webhook stages a payload and hands its path to a bounded queue; a
//! fixed pool of workers runs each one through the pipeline. Anything that
//! does not fully commit is written to the failure log for replay.

use crate::error::PipelineError;
use crate::services::parser::ParsedDocument;
use crate::services::pipeline::{Pipeline, PipelineReport};
use crate::services::staging::FailureLog;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Run an already parsed staged payload and record anything left uncommitted.
pub async fn run_document(
    pipeline: &Pipeline,
    failures: &FailureLog,
    staged_file: &Path,
    doc: ParsedDocument,
) -> PipelineReport {
    let report = pipeline.process_document(doc, Utc::now()).await;
    if let Some(summary) = report.failure_summary() {
        record_failure(failures, staged_file, &summary).await;
    }
    report
}

/// Read, parse and run one staged payload from disk.
pub async fn run_staged_file(
    pipeline: &Pipeline,
    failures: &FailureLog,
    staged_file: &Path,
) -> Result<PipelineReport, PipelineError> {
    let result = match tokio::fs::read(staged_file).await {
        Ok(bytes) => pipeline.process_bytes(&bytes).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(report) => {
            if let Some(summary) = report.failure_summary() {
                record_failure(failures, staged_file, &summary).await;
            }
            Ok(report)
        }
        Err(e) => {
            record_failure(failures, staged_file, &e.to_string()).await;
            Err(e)
        }
    }
}

async fn record_failure(failures: &FailureLog, staged_file: &Path, error: &str) {
    if let Err(e) = failures.record(staged_file, error).await {
        tracing::error!(
            staged_file = %staged_file.display(),
            error = %e,
            "Failed to write failure log"
        );
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("processing queue is full")]
    Full,

    #[error("processing queue is shut down")]
    Closed,
}

/// Bounded queue of staged payloads with a fixed worker pool.
pub struct ProcessingQueue {
    sender: std::sync::Mutex<Option<mpsc::Sender<PathBuf>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessingQueue {
    /// Spawn `workers` tasks draining a queue of `capacity` entries.
    pub fn start(
        pipeline: Arc<Pipeline>,
        failures: Arc<FailureLog>,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<PathBuf>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let pipeline = pipeline.clone();
                let failures = failures.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver only long enough to take one job.
                        let next = rx.lock().await.recv().await;
                        let Some(path) = next else { break };

                        tracing::debug!(worker, staged_file = %path.display(), "Processing staged payload");
                        match run_staged_file(&pipeline, &failures, &path).await {
                            Ok(report) => tracing::info!(
                                worker,
                                staged_file = %path.display(),
                                samples = report.parse.samples,
                                complete = report.is_complete(),
                                "Staged payload processed"
                            ),
                            Err(e) => tracing::error!(
                                worker,
                                staged_file = %path.display(),
                                error = %e,
                                "Staged payload failed"
                            ),
                        }
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();

        tracing::info!(workers, capacity, "Processing queue started");
        Self {
            sender: std::sync::Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Queue a staged file without waiting for room.
    pub fn enqueue(&self, staged_file: PathBuf) -> Result<(), EnqueueError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(EnqueueError::Closed)?;

        sender.try_send(staged_file).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Stop accepting work and wait for queued payloads to finish.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().unwrap_or_else(|e| e.into_inner()).take());

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}
