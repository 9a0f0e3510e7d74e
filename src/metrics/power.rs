//! Running power estimation.
//!
//! Estimates mechanical running power from ground speed and elevation change
//! when no power meter is connected. The model adds a flat-ground running cost
//! proportional to speed, aerodynamic drag and the work done against gravity.

use crate::metrics::error::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};

/// Physics constants
const AIR_DENSITY: f64 = 1.225; // kg/m³ at sea level
const GRAVITY: f64 = 9.81; // m/s²
const DEFAULT_CDA: f64 = 0.24; // m² (upright runner)
const DEFAULT_RUNNING_COST: f64 = 1.04; // J/kg/m

/// Tunable model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerModelConfig {
    /// Runner mass in kilograms
    pub runner_mass_kg: f64,
    /// Flat-ground cost of running in J/kg/m
    pub running_cost: f64,
    /// Drag coefficient times frontal area (CdA)
    pub cda: f64,
    /// Air density in kg/m³
    pub air_density: f64,
}

impl Default for PowerModelConfig {
    fn default() -> Self {
        Self {
            runner_mass_kg: 70.0,
            running_cost: DEFAULT_RUNNING_COST,
            cda: DEFAULT_CDA,
            air_density: AIR_DENSITY,
        }
    }
}

/// Estimates running power from speed and elevation change.
#[derive(Debug, Clone, Default)]
pub struct PowerEstimator {
    config: PowerModelConfig,
}

impl PowerEstimator {
    pub fn new(config: PowerModelConfig) -> Self {
        Self { config }
    }

    /// Create an estimator for a runner of the given mass.
    pub fn for_mass(runner_mass_kg: f64) -> Self {
        Self::new(PowerModelConfig {
            runner_mass_kg: runner_mass_kg.clamp(30.0, 200.0),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &PowerModelConfig {
        &self.config
    }

    /// Estimate power in watts over one interval.
    ///
    /// # Arguments
    /// * `speed_mps` - Ground speed over the interval in m/s
    /// * `elevation_change_m` - Altitude gained (positive) or lost (negative)
    /// * `elapsed_seconds` - Interval length, must be positive
    pub fn estimate(
        &self,
        speed_mps: f64,
        elevation_change_m: f64,
        elapsed_seconds: f64,
    ) -> MetricsResult<f64> {
        if !elapsed_seconds.is_finite() || elapsed_seconds <= 0.0 {
            return Err(MetricsError::InvalidInput(format!(
                "elapsed time must be positive, got {}",
                elapsed_seconds
            )));
        }
        if !speed_mps.is_finite() || speed_mps < 0.0 {
            return Err(MetricsError::InvalidInput(format!(
                "speed must be non-negative, got {}",
                speed_mps
            )));
        }
        if !elevation_change_m.is_finite() {
            return Err(MetricsError::InvalidInput(
                "elevation change must be finite".to_string(),
            ));
        }

        let mass = self.config.runner_mass_kg;
        let p_running = mass * self.config.running_cost * speed_mps;
        let p_air = 0.5 * self.config.air_density * self.config.cda * speed_mps.powi(3);
        let p_gravity = mass * GRAVITY * elevation_change_m / elapsed_seconds;

        // Descents reduce cost but a runner never produces negative power
        Ok((p_running + p_air + p_gravity).max(0.0))
    }
}
