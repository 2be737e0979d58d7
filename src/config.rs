use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Top-level configuration, constructed once and passed into the
/// orchestrators. There is no process-wide mutable state.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub alerts: AlertThresholdConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read config file '{}': {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// How the stage orchestrator reacts to a FAILED stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Abort remaining stages on the first failure.
    FailFast,
    /// Run every non-skipped stage regardless of prior failures.
    PartialSuccess,
    /// Same control flow as PartialSuccess; retries are intrinsic to
    /// stage execution, not a separate branch.
    RetryContinue,
}

/// Inter-attempt delay policy for stage retries. The policy is explicit
/// and configurable rather than implied by comments.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetryDelay {
    Fixed { secs: u64 },
    Exponential { base_secs: u64 },
}

impl RetryDelay {
    /// Delay to wait before the given retry attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            RetryDelay::Fixed { secs } => Duration::from_secs(*secs),
            RetryDelay::Exponential { base_secs } => {
                Duration::from_secs(base_secs.saturating_mul(1u64 << (attempt - 1).min(16)))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub retry_delay: RetryDelay,
    pub stage_timeout_secs: u64,
    pub failure_mode: FailureMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: RetryDelay::Fixed { secs: 5 },
            stage_timeout_secs: 900,
            failure_mode: FailureMode::PartialSuccess,
        }
    }
}

impl OrchestratorConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// Fuzzy acceptance threshold when the candidate's school agrees.
    pub medium_threshold: f64,
    /// Raised threshold when the candidate's school differs.
    pub high_threshold: f64,
    /// Treat unmatched records as new canonical entities.
    pub create_new_entities: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            medium_threshold: 85.0,
            high_threshold: 95.0,
            create_new_entities: false,
        }
    }
}

/// Warning/critical threshold pair for one quality-metric dimension.
/// A dimension value strictly above `warning` generates no alert.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertThresholdConfig {
    pub coverage: ThresholdPair,
    pub validation: ThresholdPair,
    /// Evaluated on the inlier complement (100 - outlier%), so below
    /// threshold uniformly means unhealthy across all dimensions.
    pub outlier: ThresholdPair,
    pub composite: ThresholdPair,
}

impl Default for AlertThresholdConfig {
    fn default() -> Self {
        Self {
            coverage: ThresholdPair { warning: 80.0, critical: 60.0 },
            validation: ThresholdPair { warning: 85.0, critical: 70.0 },
            outlier: ThresholdPair { warning: 90.0, critical: 80.0 },
            composite: ThresholdPair { warning: 75.0, critical: 60.0 },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishConfig {
    /// Derived/materialized views refreshed best-effort by the Publish phase.
    pub views: Vec<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            views: vec![
                "prospect_rankings".to_string(),
                "position_leaderboards".to_string(),
                "source_coverage".to_string(),
            ],
        }
    }
}
