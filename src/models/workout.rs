// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Workout session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workout session with summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    /// Export tool workout ID (synthesized from name + start when missing)
    pub workout_id: String,
    /// Activity name (e.g. "Outdoor Run")
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Duration in seconds
    pub duration_secs: f64,
    /// "Indoor", "Outdoor", or empty
    pub location: String,
    pub distance: Option<f64>,
    pub distance_unit: String,
    pub active_energy: Option<f64>,
    pub energy_unit: String,
    pub step_count: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub min_heart_rate: Option<f64>,
    pub intensity: Option<f64>,
    /// e.g. "kcal/hr·kg"
    pub intensity_unit: String,
}

/// Time-series point recorded during a workout.
///
/// Refers back to its workout by ID; the workout does not embed these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSample {
    pub workout_id: String,
    pub timestamp: DateTime<Utc>,
    pub heart_rate: Option<f64>,
    pub energy: Option<f64>,
    pub distance: Option<f64>,
    pub step_count: Option<f64>,
    /// Heart rate during the post-workout recovery period
    pub recovery_heart_rate: Option<f64>,
}

impl WorkoutSample {
    /// A sample with no readings carries nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none()
            && self.energy.is_none()
            && self.distance.is_none()
            && self.step_count.is_none()
            && self.recovery_heart_rate.is_none()
    }
}

/// A parsed workout together with its samples.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutRecord {
    pub workout: Workout,
    pub samples: Vec<WorkoutSample>,
}
