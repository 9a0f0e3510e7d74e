//! Sensor fusion for power estimates.
//!
//! Corrects a physics-based power estimate with the runner's heart rate and
//! cadence when no power meter is available. The correction is multiplicative
//! and bounded so a single noisy signal cannot produce an implausible jump.

use serde::{Deserialize, Serialize};

/// Configuration for power fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerFusionConfig {
    /// Weight of the heart-rate factor when both signals are present
    pub heart_rate_weight: f64,
    /// Weight of the cadence factor when both signals are present
    pub cadence_weight: f64,
    /// Maximum relative correction in either direction (0.15 = ±15%)
    pub tolerance_band: f64,
    /// Heart rate at which no correction is applied
    pub reference_heart_rate: f64,
    /// Cadence at which no correction is applied
    pub reference_cadence: f64,
    /// Relative correction per relative heart-rate deviation
    pub heart_rate_sensitivity: f64,
    /// Relative correction per relative cadence deviation
    pub cadence_sensitivity: f64,
}

impl Default for PowerFusionConfig {
    fn default() -> Self {
        Self {
            heart_rate_weight: 0.4,
            cadence_weight: 0.6,
            tolerance_band: 0.15,
            reference_heart_rate: 150.0,
            reference_cadence: 170.0,
            heart_rate_sensitivity: 0.5,
            cadence_sensitivity: 0.8,
        }
    }
}

impl PowerFusionConfig {
    /// Validate and normalize weights.
    pub fn normalize_weights(&mut self) {
        let total = self.heart_rate_weight + self.cadence_weight;
        if total > 0.0 {
            self.heart_rate_weight /= total;
            self.cadence_weight /= total;
        } else {
            self.heart_rate_weight = 0.5;
            self.cadence_weight = 0.5;
        }
    }
}

/// Which auxiliary signals took part in a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionMode {
    /// Heart rate and cadence both used
    HeartRateAndCadence,
    /// Only heart rate used
    HeartRateOnly,
    /// Only cadence used
    CadenceOnly,
    /// No auxiliary signal, estimate passed through
    #[default]
    Passthrough,
}

impl FusionMode {
    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            FusionMode::HeartRateAndCadence => "Heart rate and cadence",
            FusionMode::HeartRateOnly => "Heart rate only",
            FusionMode::CadenceOnly => "Cadence only",
            FusionMode::Passthrough => "Estimate only",
        }
    }
}

/// Diagnostic information about one fusion step.
#[derive(Debug, Clone, Default)]
pub struct FusionDiagnostics {
    /// Signals used
    pub mode: FusionMode,
    /// Combined correction before clamping
    pub raw_factor: f64,
    /// Correction actually applied
    pub applied_factor: f64,
    /// Whether the tolerance band limited the correction
    pub clamped: bool,
    /// Fused power in watts
    pub fused_watts: f64,
}

/// Trait for power fusion algorithms.
pub trait SensorFusion: Send + Sync {
    /// Fuse a basic power estimate with optional heart rate and cadence.
    fn fuse(&self, basic_watts: f64, heart_rate: Option<u16>, cadence: Option<u16>) -> f64 {
        self.fuse_with_diagnostics(basic_watts, heart_rate, cadence)
            .fused_watts
    }

    /// Fuse and report how the result was obtained.
    fn fuse_with_diagnostics(
        &self,
        basic_watts: f64,
        heart_rate: Option<u16>,
        cadence: Option<u16>,
    ) -> FusionDiagnostics;
}

/// Bounded multiplicative correction of estimated running power.
#[derive(Debug, Clone, Default)]
pub struct PowerFusion {
    config: PowerFusionConfig,
}

impl PowerFusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with specific configuration.
    pub fn with_config(mut config: PowerFusionConfig) -> Self {
        config.normalize_weights();
        config.tolerance_band = config.tolerance_band.clamp(0.0, 1.0);
        Self { config }
    }

    pub fn config(&self) -> &PowerFusionConfig {
        &self.config
    }

    fn factor(value: f64, reference: f64, sensitivity: f64) -> f64 {
        if reference <= 0.0 {
            return 1.0;
        }
        1.0 + sensitivity * (value - reference) / reference
    }
}

impl SensorFusion for PowerFusion {
    fn fuse_with_diagnostics(
        &self,
        basic_watts: f64,
        heart_rate: Option<u16>,
        cadence: Option<u16>,
    ) -> FusionDiagnostics {
        let cfg = &self.config;
        let hr_factor = heart_rate.filter(|hr| *hr > 0).map(|hr| {
            Self::factor(
                hr as f64,
                cfg.reference_heart_rate,
                cfg.heart_rate_sensitivity,
            )
        });
        let cadence_factor = cadence.filter(|c| *c > 0).map(|c| {
            Self::factor(c as f64, cfg.reference_cadence, cfg.cadence_sensitivity)
        });

        let (mode, raw_factor) = match (hr_factor, cadence_factor) {
            (Some(h), Some(c)) => (
                FusionMode::HeartRateAndCadence,
                cfg.heart_rate_weight * h + cfg.cadence_weight * c,
            ),
            (Some(h), None) => (FusionMode::HeartRateOnly, h),
            (None, Some(c)) => (FusionMode::CadenceOnly, c),
            (None, None) => {
                return FusionDiagnostics {
                    mode: FusionMode::Passthrough,
                    raw_factor: 1.0,
                    applied_factor: 1.0,
                    clamped: false,
                    fused_watts: basic_watts,
                }
            }
        };

        let low = 1.0 - cfg.tolerance_band;
        let high = 1.0 + cfg.tolerance_band;
        let applied_factor = raw_factor.clamp(low, high);

        FusionDiagnostics {
            mode,
            raw_factor,
            applied_factor,
            clamped: applied_factor != raw_factor,
            fused_watts: basic_watts * applied_factor,
        }
    }
}
