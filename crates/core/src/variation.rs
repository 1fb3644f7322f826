//! Variation matrix: fan a small set of creative dimensions out into a
//! concrete, ordered list of generation jobs.
//!
//! Expansion is pure. With no randomized dimensions the output depends only
//! on the request, so two expansions of the same request are identical.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Well-known dimension names
// ---------------------------------------------------------------------------

pub const DIM_HOOK_STYLE: &str = "hook_style";
pub const DIM_PACING: &str = "pacing";
pub const DIM_TRANSITION: &str = "transition";
pub const DIM_VOICE_LANGUAGE: &str = "voice_language";
pub const DIM_VOICE_TONE: &str = "voice_tone";
pub const DIM_ASPECT_RATIO: &str = "aspect_ratio";
pub const DIM_ENGINE_TIER: &str = "engine_tier";
/// Selects the render backend a job is routed to.
pub const DIM_ENGINE: &str = "engine";

/// Formats offered by the multi-format export flow.
pub const DEFAULT_ASPECT_RATIOS: &[&str] = &["9:16", "1:1", "16:9", "4:5"];

/// Upper bound on jobs per batch accepted from callers.
pub const MAX_BATCH_JOBS: u32 = 5_000;

/// Maximum length of a dimension name.
const MAX_DIMENSION_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// One variation axis and the values a job may take on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Dimension {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    /// Sample uniformly per job instead of cycling round-robin.
    #[serde(default)]
    pub randomize: bool,
    /// An empty value list is an error instead of omitting the dimension.
    #[serde(default)]
    pub required: bool,
}

impl Dimension {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            randomize: false,
            required: false,
        }
    }

    pub fn randomized(mut self) -> Self {
        self.randomize = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value for the job at ordinal `index`. Caller guarantees `values` is
    /// non-empty.
    fn pick<R: Rng>(&self, index: u32, rng: &mut R) -> &str {
        let slot = if self.randomize {
            rng.random_range(0..self.values.len())
        } else {
            index as usize % self.values.len()
        };
        &self.values[slot]
    }
}

/// User-chosen variation settings for one batch.
///
/// Persisted verbatim alongside the batch so the matrix that produced the
/// jobs can always be inspected later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct VariationRequest {
    #[validate(range(max = 5000))]
    pub count: u32,
    /// The product / script / asset every job renders from.
    #[validate(length(min = 1, max = 512))]
    pub source_ref: String,
    #[serde(default)]
    #[validate(nested)]
    pub dimensions: Vec<Dimension>,
}

impl VariationRequest {
    pub fn new(source_ref: impl Into<String>, count: u32) -> Self {
        Self {
            count,
            source_ref: source_ref.into(),
            dimensions: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Agency bulk production: every hook style crossed round-robin with
    /// pacing and voice tone.
    pub fn bulk_production(
        source_ref: impl Into<String>,
        count: u32,
        hook_styles: &[&str],
        pacings: &[&str],
        voice_tones: &[&str],
    ) -> Self {
        Self::new(source_ref, count)
            .with_dimension(Dimension::new(DIM_HOOK_STYLE, hook_styles.iter().copied()).required())
            .with_dimension(Dimension::new(DIM_PACING, pacings.iter().copied()))
            .with_dimension(Dimension::new(DIM_VOICE_TONE, voice_tones.iter().copied()))
    }

    /// Multi-format export: one job per aspect ratio of the same source.
    pub fn multi_format(source_ref: impl Into<String>, aspect_ratios: &[&str]) -> Self {
        Self::new(source_ref, aspect_ratios.len() as u32).with_dimension(
            Dimension::new(DIM_ASPECT_RATIO, aspect_ratios.iter().copied()).required(),
        )
    }

    /// Ad replication: `count` variants of one ad with hook, pacing and
    /// transition sampled independently per variant.
    pub fn ad_replication(
        source_ref: impl Into<String>,
        count: u32,
        hook_styles: &[&str],
        pacings: &[&str],
        transitions: &[&str],
    ) -> Self {
        Self::new(source_ref, count)
            .with_dimension(Dimension::new(DIM_HOOK_STYLE, hook_styles.iter().copied()).randomized())
            .with_dimension(Dimension::new(DIM_PACING, pacings.iter().copied()).randomized())
            .with_dimension(Dimension::new(DIM_TRANSITION, transitions.iter().copied()).randomized())
    }
}

// ---------------------------------------------------------------------------
// Job spec
// ---------------------------------------------------------------------------

/// The frozen creative assignment for one job. Never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Ordinal within the batch.
    pub index: u32,
    /// Dimension name -> chosen value, ordered by name.
    pub dimensions: BTreeMap<String, String>,
    pub source_ref: String,
}

impl JobSpec {
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Expand a request into exactly `request.count` job specs.
///
/// Randomized dimensions draw from the thread-local RNG; use
/// [`expand_with_rng`] for reproducible sampling.
pub fn expand(request: &VariationRequest) -> Result<Vec<JobSpec>, CoreError> {
    expand_with_rng(request, &mut rand::rng())
}

/// Expand a request using the supplied RNG for randomized dimensions.
///
/// Dimensions with no values are omitted from every spec unless marked
/// `required`, which is a validation error.
pub fn expand_with_rng<R: Rng>(
    request: &VariationRequest,
    rng: &mut R,
) -> Result<Vec<JobSpec>, CoreError> {
    validate_dimensions(&request.dimensions)?;

    let active: Vec<&Dimension> = request
        .dimensions
        .iter()
        .filter(|d| !d.values.is_empty())
        .collect();

    let mut specs = Vec::with_capacity(request.count as usize);
    for index in 0..request.count {
        let mut dimensions = BTreeMap::new();
        for dim in &active {
            dimensions.insert(dim.name.clone(), dim.pick(index, rng).to_string());
        }
        specs.push(JobSpec {
            index,
            dimensions,
            source_ref: request.source_ref.clone(),
        });
    }
    Ok(specs)
}

/// Structural checks that `expand` enforces regardless of count.
pub fn validate_dimensions(dimensions: &[Dimension]) -> Result<(), CoreError> {
    let mut seen = HashSet::with_capacity(dimensions.len());
    for dim in dimensions {
        if dim.name.is_empty() {
            return Err(CoreError::Validation(
                "Dimension name must not be empty".to_string(),
            ));
        }
        if dim.name.len() > MAX_DIMENSION_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "Dimension name must not exceed {MAX_DIMENSION_NAME_LEN} characters"
            )));
        }
        if !seen.insert(dim.name.as_str()) {
            return Err(CoreError::Validation(format!(
                "Duplicate dimension: \"{}\"",
                dim.name
            )));
        }
        if dim.required && dim.values.is_empty() {
            return Err(CoreError::Validation(format!(
                "Dimension \"{}\" requires at least one value",
                dim.name
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
