// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the ingestion pipeline.

pub mod aggregate;
pub mod sample;
pub mod workout;

pub use aggregate::{AggregateBucket, BucketKey, Granularity};
pub use sample::{MetricKind, MetricSample, UNKNOWN_SOURCE};
pub use workout::{Workout, WorkoutRecord, WorkoutSample};
