// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pipeline stages and the services that drive them.

pub mod aggregator;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod staging;
pub mod tracker;
pub mod writer;

pub use aggregator::Aggregator;
pub use pipeline::{Pipeline, PipelineReport, SourceReport, WriteTargets};
pub use queue::ProcessingQueue;
pub use staging::{FailureLog, StageOutcome, Stager};
pub use tracker::IncrementalTracker;
pub use writer::StorageWriter;
