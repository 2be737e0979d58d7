// Orchestration layer: top-level stage pipeline and per-batch ETL phases

pub mod orchestrator;
pub mod phases;

pub use orchestrator::{
    ConnectorResult, NotificationOutcome, Notifier, PipelineOrchestrator, StageConnector,
    StageHealth,
};
pub use phases::{EtlOrchestrator, EtlStageConnector, TransformCounts, Transformer};
