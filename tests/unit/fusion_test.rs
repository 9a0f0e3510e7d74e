//! Unit tests for power fusion.

use proptest::prelude::*;
use runtrack::sensors::{FusionMode, PowerFusion, PowerFusionConfig, SensorFusion};

/// Test default configuration values.
#[test]
fn test_default_config_values() {
    let config = PowerFusionConfig::default();

    assert_eq!(config.heart_rate_weight, 0.4);
    assert_eq!(config.cadence_weight, 0.6);
    assert_eq!(config.tolerance_band, 0.15);
    assert_eq!(config.reference_heart_rate, 150.0);
    assert_eq!(config.reference_cadence, 170.0);
}

/// Test weight normalization with zero weights.
#[test]
fn test_weight_normalization_zero() {
    let mut config = PowerFusionConfig {
        heart_rate_weight: 0.0,
        cadence_weight: 0.0,
        ..Default::default()
    };
    config.normalize_weights();

    assert_eq!(config.heart_rate_weight, 0.5);
    assert_eq!(config.cadence_weight, 0.5);
}

/// Weights are normalized when the fusion is built.
#[test]
fn test_with_config_normalizes() {
    let fusion = PowerFusion::with_config(PowerFusionConfig {
        heart_rate_weight: 1.0,
        cadence_weight: 3.0,
        ..Default::default()
    });

    assert!((fusion.config().heart_rate_weight - 0.25).abs() < 1e-9);
    assert!((fusion.config().cadence_weight - 0.75).abs() < 1e-9);
}

/// No auxiliary signal returns the estimate unchanged.
#[test]
fn test_passthrough() {
    let fusion = PowerFusion::new();
    let diag = fusion.fuse_with_diagnostics(240.0, None, None);

    assert_eq!(diag.mode, FusionMode::Passthrough);
    assert_eq!(diag.fused_watts, 240.0);
    assert!(!diag.clamped);
}

/// Zero-valued signals count as absent.
#[test]
fn test_zero_signals_are_absent() {
    let fusion = PowerFusion::new();
    assert_eq!(fusion.fuse(240.0, Some(0), Some(0)), 240.0);
}

#[test]
fn test_modes_follow_signals() {
    let fusion = PowerFusion::new();
    assert_eq!(
        fusion.fuse_with_diagnostics(200.0, Some(160), None).mode,
        FusionMode::HeartRateOnly
    );
    assert_eq!(
        fusion.fuse_with_diagnostics(200.0, None, Some(180)).mode,
        FusionMode::CadenceOnly
    );
    assert_eq!(
        fusion.fuse_with_diagnostics(200.0, Some(160), Some(180)).mode,
        FusionMode::HeartRateAndCadence
    );
}

/// A heart rate far above reference is capped at the band.
#[test]
fn test_clamped_at_band() {
    let fusion = PowerFusion::new();
    let diag = fusion.fuse_with_diagnostics(200.0, Some(240), None);

    assert!(diag.clamped);
    assert!((diag.fused_watts - 230.0).abs() < 1e-9);
}

/// A narrower band limits more.
#[test]
fn test_custom_band() {
    let fusion = PowerFusion::with_config(PowerFusionConfig {
        tolerance_band: 0.05,
        ..Default::default()
    });
    let fused = fusion.fuse(200.0, Some(60), Some(120));

    assert!((fused - 190.0).abs() < 1e-9);
}

#[test]
fn test_trait_object() {
    let fusion: Box<dyn SensorFusion> = Box::new(PowerFusion::new());
    assert_eq!(fusion.fuse(250.0, Some(150), Some(170)), 250.0);
}

proptest! {
    /// Output always lies inside the tolerance band around the input.
    #[test]
    fn prop_output_within_band(
        basic in 0.0f64..1500.0,
        hr in prop::option::of(0u16..250),
        cadence in prop::option::of(0u16..300),
    ) {
        let fusion = PowerFusion::new();
        let fused = fusion.fuse(basic, hr, cadence);
        prop_assert!(fused >= basic * 0.85 - 1e-9);
        prop_assert!(fused <= basic * 1.15 + 1e-9);
    }

    /// Fusion is deterministic.
    #[test]
    fn prop_deterministic(basic in 0.0f64..1500.0, hr in 1u16..250, cadence in 1u16..300) {
        let fusion = PowerFusion::new();
        prop_assert_eq!(
            fusion.fuse(basic, Some(hr), Some(cadence)),
            fusion.fuse(basic, Some(hr), Some(cadence))
        );
    }
}
