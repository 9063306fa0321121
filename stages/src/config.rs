//! Builder and tracing configuration.
//!
//! Options are plain serde structs so they can live inside an application's own config
//! file. Validation happens in [`StagesOptions::sanitize`] before anything is built.

use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageResult};

/// Where stage bodies run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    /// On the thread polling the chain.
    #[default]
    Inline,
    /// On a caller-supplied executor.
    Executor,
    /// On the process-wide default pool.
    Pool,
}

/// Tracing sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceTarget {
    /// Lines on stdout.
    Console,
    /// Events through the `tracing` facade.
    #[default]
    Logger,
}

/// Level used by the `tracing`-facade sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Trace,
    #[default]
    Debug,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingOptions {
    pub target: TraceTarget,
    pub level: TraceLevel,
    /// Maximum caller frames captured per trace line.
    pub context_depth: usize,
    /// Name carried on `tracing` events as the `logger` field.
    pub logger: Option<String>,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            target: TraceTarget::default(),
            level: TraceLevel::default(),
            context_depth: 8,
            logger: None,
        }
    }
}

impl TracingOptions {
    pub fn sanitize(&self) -> StageResult<()> {
        if self.context_depth == 0 {
            return Err(StageError::Config(
                "tracing.context_depth must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesOptions {
    pub execution: ExecutionKind,
    /// `None` disables tracing.
    pub tracing: Option<TracingOptions>,
}

impl StagesOptions {
    /// Validate option combinations that serde cannot express.
    pub fn sanitize(&self) -> StageResult<()> {
        if let Some(tracing) = &self.tracing {
            tracing.sanitize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StagesOptions::default();
        assert_eq!(options.execution, ExecutionKind::Inline);
        assert!(options.tracing.is_none());
        assert!(options.sanitize().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let options: StagesOptions = serde_json::from_str(
            r#"{"execution": "pool", "tracing": {"target": "console", "level": "info"}}"#,
        )
        .unwrap();
        assert_eq!(options.execution, ExecutionKind::Pool);
        let tracing = options.tracing.unwrap();
        assert_eq!(tracing.target, TraceTarget::Console);
        assert_eq!(tracing.level, TraceLevel::Info);
        assert_eq!(tracing.context_depth, 8);
        assert!(tracing.logger.is_none());
    }

    #[test]
    fn test_deserialize_logger_name() {
        let tracing: TracingOptions =
            serde_json::from_str(r#"{"logger": "payments", "context_depth": 3}"#).unwrap();
        assert_eq!(tracing.logger.as_deref(), Some("payments"));
        assert_eq!(tracing.context_depth, 3);
        assert_eq!(tracing.target, TraceTarget::Logger);
    }

    #[test]
    fn test_sanitize_rejects_zero_depth() {
        let options = StagesOptions {
            execution: ExecutionKind::Inline,
            tracing: Some(TracingOptions {
                context_depth: 0,
                ..Default::default()
            }),
        };
        let err = options.sanitize().unwrap_err();
        assert!(err.to_string().contains("context_depth"));
    }

    #[test]
    fn test_unknown_execution_kind_rejected() {
        let result: Result<StagesOptions, _> = serde_json::from_str(r#"{"execution": "fibers"}"#);
        assert!(result.is_err());
    }
}
