//! Configuration for a pipeline run.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config across workers, serialise it into run
//! reports, and diff two runs to understand why their outcomes differ.
//!
//! # Design choice: builder over constructor
//! Callers set only what they care about and rely on documented defaults
//! for the rest; new fields never break existing call sites.

use crate::error::MillError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a batch-conversion run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docmill::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_workers(8)
///     .max_retries(2)
///     .flush_interval(25)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of work items processed concurrently. Default: 4.
    ///
    /// The pipeline is network-bound, not CPU-bound, so a handful of
    /// concurrent items usually saturates the remote API without tripping
    /// its rate limits. Raise it for fast backends; lower it if the store
    /// starts returning rate-limit errors.
    pub max_workers: usize,

    /// Maximum retry attempts after a transient failure. Default: 3.
    ///
    /// Applies to every remote call made through the adapter and to the
    /// transform invocation itself. Terminal errors (not-found, validation)
    /// are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// keeps N concurrent workers from hammering a recovering backend in
    /// lock-step.
    pub retry_base_delay_ms: u64,

    /// Flush the checkpoint to disk every N completed items. Default: 50.
    ///
    /// Smaller values bound the amount of work a crash can lose; larger
    /// values reduce disk churn on big corpora. The final flush at run end
    /// happens regardless.
    pub flush_interval: usize,

    /// Probe the destination for an existing non-empty folder before
    /// processing, and skip the item if one is found. Default: true.
    ///
    /// This is the migration path for corpora processed before a checkpoint
    /// file existed. The durable checkpoint set is always consulted first
    /// and remains authoritative.
    pub skip_existing: bool,

    /// Durable location of the processed-id set.
    pub checkpoint_path: PathBuf,

    /// Durable location of the accumulated result records.
    pub results_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
            flush_interval: 50,
            skip_existing: true,
            checkpoint_path: PathBuf::from("docmill_state/checkpoint.json"),
            results_path: PathBuf::from("docmill_state/results.json"),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Backoff before retry `attempt` (1-indexed): `base * 2^(attempt-1)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_base_delay_ms = ms;
        self
    }

    pub fn flush_interval(mut self, n: usize) -> Self {
        self.config.flush_interval = n.max(1);
        self
    }

    pub fn skip_existing(mut self, v: bool) -> Self {
        self.config.skip_existing = v;
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = path.into();
        self
    }

    pub fn results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.results_path = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, MillError> {
        let c = &self.config;
        if c.max_workers == 0 {
            return Err(MillError::InvalidConfig("max_workers must be ≥ 1".into()));
        }
        if c.flush_interval == 0 {
            return Err(MillError::InvalidConfig(
                "flush_interval must be ≥ 1".into(),
            ));
        }
        if c.checkpoint_path == c.results_path {
            return Err(MillError::InvalidConfig(
                "checkpoint_path and results_path must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = PipelineConfig::builder().build().unwrap();
        assert_eq!(c.max_workers, 4);
        assert_eq!(c.max_retries, 3);
        assert!(c.skip_existing);
    }

    #[test]
    fn zero_workers_clamped_by_setter() {
        let c = PipelineConfig::builder().max_workers(0).build().unwrap();
        assert_eq!(c.max_workers, 1);
    }

    #[test]
    fn same_state_paths_rejected() {
        let err = PipelineConfig::builder()
            .checkpoint_path("state.json")
            .results_path("state.json")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let c = PipelineConfig::builder()
            .retry_base_delay_ms(100)
            .build()
            .unwrap();
        assert_eq!(c.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(c.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(c.backoff_for_attempt(3), Duration::from_millis(400));
    }
}
