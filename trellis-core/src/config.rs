//! Render Configuration
//!
//! Host-facing knobs for a [`RenderGraph`](crate::render::RenderGraph),
//! loadable from JSON. Missing fields take their defaults.
//!
//! ```json
//! { "execution_model": "islands", "culling": true, "worker_threads": 4 }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::RecomputeOptions;
use crate::render::ExecutionModel;

/// Configuration of a render graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// How kernels are distributed over workers.
    pub execution_model: ExecutionModel,
    /// Skip kernels that cannot reach an observable vertex.
    pub culling: bool,
    /// Worker pool size. Zero uses the machine's available parallelism.
    pub worker_threads: usize,
    /// Overrides the `vertex_count / worker_threads` group size heuristic.
    pub target_group_size: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            execution_model: ExecutionModel::MaximallyParallel,
            culling: false,
            worker_threads: 0,
            target_group_size: None,
        }
    }
}

impl RenderConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no graph can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_group_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "target_group_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Worker count with zero resolved to the available parallelism.
    pub fn resolved_worker_threads(&self) -> usize {
        match self.worker_threads {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    /// Recomputation options implied by this configuration.
    pub fn recompute_options(&self) -> RecomputeOptions {
        RecomputeOptions {
            algorithm: self.execution_model.sorting_algorithm(),
            thread_count: self.resolved_worker_threads(),
            target_group_size: self.target_group_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SortingAlgorithm;

    #[test]
    fn empty_document_gives_defaults() {
        let config = RenderConfig::from_json("{}").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert!(config.resolved_worker_threads() >= 1);
    }

    #[test]
    fn fields_parse() {
        let config = RenderConfig::from_json(
            r#"{ "execution_model": "islands", "culling": true, "worker_threads": 3, "target_group_size": 16 }"#,
        )
        .unwrap();
        assert_eq!(config.execution_model, ExecutionModel::Islands);
        assert!(config.culling);

        let options = config.recompute_options();
        assert_eq!(options.algorithm, SortingAlgorithm::LocalDepthFirst);
        assert_eq!(options.thread_count, 3);
        assert_eq!(options.target_group_size, Some(16));
    }

    #[test]
    fn zero_group_size_is_rejected() {
        let err = RenderConfig::from_json(r#"{ "target_group_size": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "target_group_size",
                ..
            }
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            RenderConfig::from_json("{ culling: yes"),
            Err(ConfigError::Parse(_))
        ));
    }
}
