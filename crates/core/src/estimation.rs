//! Per-job render cost estimation.
//!
//! Costs are nominal credits derived from the job's engine tier plus a
//! surcharge when a voice-over is rendered.

use crate::variation::{JobSpec, DIM_ENGINE_TIER, DIM_VOICE_LANGUAGE};

// ---------------------------------------------------------------------------
// Engine tiers
// ---------------------------------------------------------------------------

pub const ENGINE_TIER_DRAFT: &str = "draft";
pub const ENGINE_TIER_STANDARD: &str = "standard";
pub const ENGINE_TIER_PREMIUM: &str = "premium";

/// Base credits per render, by engine tier.
const ENGINE_TIER_COSTS: &[(&str, f64)] = &[
    (ENGINE_TIER_DRAFT, 0.10),
    (ENGINE_TIER_STANDARD, 0.40),
    (ENGINE_TIER_PREMIUM, 1.20),
];

/// Tier assumed when a job carries no (or an unknown) engine tier.
pub const DEFAULT_ENGINE_TIER: &str = ENGINE_TIER_STANDARD;

/// Added when the job renders a voice-over track.
pub const VOICE_SURCHARGE: f64 = 0.05;

/// Base credits for an engine tier, falling back to the default tier.
pub fn tier_cost(tier: &str) -> f64 {
    ENGINE_TIER_COSTS
        .iter()
        .find(|(name, _)| *name == tier)
        .or_else(|| {
            ENGINE_TIER_COSTS
                .iter()
                .find(|(name, _)| *name == DEFAULT_ENGINE_TIER)
        })
        .map(|(_, cost)| *cost)
        .unwrap_or_default()
}

/// Estimated credits for rendering one job, rounded to cents.
pub fn estimate_job_cost(spec: &JobSpec) -> f64 {
    let tier = spec.dimension(DIM_ENGINE_TIER).unwrap_or(DEFAULT_ENGINE_TIER);
    let mut cost = tier_cost(tier);
    if spec.dimension(DIM_VOICE_LANGUAGE).is_some() {
        cost += VOICE_SURCHARGE;
    }
    round_cents(cost)
}

/// Round a credit amount to two decimal places.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
