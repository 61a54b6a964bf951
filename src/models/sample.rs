// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Health metric sample model.

use crate::time_utils::offset_east;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source tag used when a record does not name its origin device/app.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Metric types known to the export tool.
///
/// Anything the tool adds later lands in `Other` and flows through the
/// pipeline unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    // ─── Activity ────────────────────────────────────────────────
    ActiveEnergy,
    BasalEnergyBurned,
    StepCount,
    FlightsClimbed,
    WalkingRunningDistance,
    AppleExerciseTime,
    AppleStandTime,
    AppleStandHour,
    TimeInDaylight,
    PhysicalEffort,

    // ─── Heart ───────────────────────────────────────────────────
    HeartRate,
    HeartRateVariability,
    RestingHeartRate,
    WalkingHeartRateAverage,
    CardioRecovery,

    // ─── Respiratory ─────────────────────────────────────────────
    RespiratoryRate,
    BloodOxygenSaturation,
    Vo2Max,

    // ─── Body ────────────────────────────────────────────────────
    WeightBodyMass,
    BodyFatPercentage,
    BodyMassIndex,
    LeanBodyMass,

    // ─── Sleep ───────────────────────────────────────────────────
    SleepAnalysis,
    AppleSleepingWristTemperature,
    BreathingDisturbances,

    // ─── Mobility ────────────────────────────────────────────────
    WalkingSpeed,
    WalkingStepLength,
    WalkingDoubleSupportPercentage,
    WalkingAsymmetryPercentage,
    StairSpeedUp,
    StairSpeedDown,
    SixMinuteWalkingTestDistance,

    // ─── Audio ───────────────────────────────────────────────────
    EnvironmentalAudioExposure,
    HeadphoneAudioExposure,

    // ─── Cycling ─────────────────────────────────────────────────
    CyclingDistance,
    CyclingPower,
    CyclingCadence,
    CyclingFunctionalThresholdPower,

    // ─── Water ───────────────────────────────────────────────────
    UnderwaterDepth,
    UnderwaterTemperature,

    /// A metric name this build does not know about.
    Other(String),
}

impl MetricKind {
    /// Map an export metric name to its kind.
    pub fn from_name(name: &str) -> Self {
        match name {
            "active_energy" => Self::ActiveEnergy,
            "basal_energy_burned" => Self::BasalEnergyBurned,
            "step_count" => Self::StepCount,
            "flights_climbed" => Self::FlightsClimbed,
            "walking_running_distance" => Self::WalkingRunningDistance,
            "apple_exercise_time" => Self::AppleExerciseTime,
            "apple_stand_time" => Self::AppleStandTime,
            "apple_stand_hour" => Self::AppleStandHour,
            "time_in_daylight" => Self::TimeInDaylight,
            "physical_effort" => Self::PhysicalEffort,
            "heart_rate" => Self::HeartRate,
            "heart_rate_variability" => Self::HeartRateVariability,
            "resting_heart_rate" => Self::RestingHeartRate,
            "walking_heart_rate_average" => Self::WalkingHeartRateAverage,
            "cardio_recovery" => Self::CardioRecovery,
            "respiratory_rate" => Self::RespiratoryRate,
            "blood_oxygen_saturation" => Self::BloodOxygenSaturation,
            "vo2_max" => Self::Vo2Max,
            "weight_body_mass" => Self::WeightBodyMass,
            "body_fat_percentage" => Self::BodyFatPercentage,
            "body_mass_index" => Self::BodyMassIndex,
            "lean_body_mass" => Self::LeanBodyMass,
            "sleep_analysis" => Self::SleepAnalysis,
            "apple_sleeping_wrist_temperature" => Self::AppleSleepingWristTemperature,
            "breathing_disturbances" => Self::BreathingDisturbances,
            "walking_speed" => Self::WalkingSpeed,
            "walking_step_length" => Self::WalkingStepLength,
            "walking_double_support_percentage" => Self::WalkingDoubleSupportPercentage,
            "walking_asymmetry_percentage" => Self::WalkingAsymmetryPercentage,
            "stair_speed_up" => Self::StairSpeedUp,
            "stair_speed_down" => Self::StairSpeedDown,
            "six_minute_walking_test_distance" => Self::SixMinuteWalkingTestDistance,
            "environmental_audio_exposure" => Self::EnvironmentalAudioExposure,
            "headphone_audio_exposure" => Self::HeadphoneAudioExposure,
            "cycling_distance" => Self::CyclingDistance,
            "cycling_power" => Self::CyclingPower,
            "cycling_cadence" => Self::CyclingCadence,
            "cycling_functional_threshold_power" => Self::CyclingFunctionalThresholdPower,
            "underwater_depth" => Self::UnderwaterDepth,
            "underwater_temperature" => Self::UnderwaterTemperature,
            other => Self::Other(other.to_string()),
        }
    }

    /// The export/storage name of this metric.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ActiveEnergy => "active_energy",
            Self::BasalEnergyBurned => "basal_energy_burned",
            Self::StepCount => "step_count",
            Self::FlightsClimbed => "flights_climbed",
            Self::WalkingRunningDistance => "walking_running_distance",
            Self::AppleExerciseTime => "apple_exercise_time",
            Self::AppleStandTime => "apple_stand_time",
            Self::AppleStandHour => "apple_stand_hour",
            Self::TimeInDaylight => "time_in_daylight",
            Self::PhysicalEffort => "physical_effort",
            Self::HeartRate => "heart_rate",
            Self::HeartRateVariability => "heart_rate_variability",
            Self::RestingHeartRate => "resting_heart_rate",
            Self::WalkingHeartRateAverage => "walking_heart_rate_average",
            Self::CardioRecovery => "cardio_recovery",
            Self::RespiratoryRate => "respiratory_rate",
            Self::BloodOxygenSaturation => "blood_oxygen_saturation",
            Self::Vo2Max => "vo2_max",
            Self::WeightBodyMass => "weight_body_mass",
            Self::BodyFatPercentage => "body_fat_percentage",
            Self::BodyMassIndex => "body_mass_index",
            Self::LeanBodyMass => "lean_body_mass",
            Self::SleepAnalysis => "sleep_analysis",
            Self::AppleSleepingWristTemperature => "apple_sleeping_wrist_temperature",
            Self::BreathingDisturbances => "breathing_disturbances",
            Self::WalkingSpeed => "walking_speed",
            Self::WalkingStepLength => "walking_step_length",
            Self::WalkingDoubleSupportPercentage => "walking_double_support_percentage",
            Self::WalkingAsymmetryPercentage => "walking_asymmetry_percentage",
            Self::StairSpeedUp => "stair_speed_up",
            Self::StairSpeedDown => "stair_speed_down",
            Self::SixMinuteWalkingTestDistance => "six_minute_walking_test_distance",
            Self::EnvironmentalAudioExposure => "environmental_audio_exposure",
            Self::HeadphoneAudioExposure => "headphone_audio_exposure",
            Self::CyclingDistance => "cycling_distance",
            Self::CyclingPower => "cycling_power",
            Self::CyclingCadence => "cycling_cadence",
            Self::CyclingFunctionalThresholdPower => "cycling_functional_threshold_power",
            Self::UnderwaterDepth => "underwater_depth",
            Self::UnderwaterTemperature => "underwater_temperature",
            Self::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MetricKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// A single normalized metric data point.
///
/// Uniqueness key is `(metric, source, timestamp)`; a later write for the
/// same key replaces the earlier one downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: MetricKind,
    /// Device/app that produced the reading (e.g. "Apple Watch")
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    /// UTC offset of the exporting device, seconds east. Hourly and daily
    /// buckets follow the device's local clock.
    #[serde(default)]
    pub utc_offset_secs: i32,
}

impl MetricSample {
    /// The reading's timestamp on the device's local clock.
    pub fn local_time(&self) -> DateTime<FixedOffset> {
        self.timestamp.with_timezone(&offset_east(self.utc_offset_secs))
    }
}
