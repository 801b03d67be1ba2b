//! Strata: Cascading Resource Synchronizer
//!
//! Keeps four dependently-keyed collections consistent with each other and
//! with the selected project while mutations run concurrently.
//!
//! # Core Concepts
//!
//! - **Cascade**: Project → Uploads → Analyses → {Summaries, Forecasts}, each
//!   level fetched by the key set of the level above it
//! - **Run ids**: every cascade run is tagged; a stage commits only while its
//!   run is the latest one for that stage
//! - **Feature gate**: an advisory tier check consulted before gated mutations
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use strata::{MemoryService, MockAnalyzer, SyncSession, TierToken};
//!
//! let service = Arc::new(MemoryService::new());
//! let analyzer = Arc::new(MockAnalyzer::new(service.clone(), strata::sample_verdict()));
//! let (_tier, tier_rx) = tokio::sync::watch::channel(TierToken::from("free"));
//! let session = SyncSession::new(service, analyzer, tier_rx);
//! assert!(session.current_project().is_none());
//! ```

pub mod analyze;
pub mod config;
pub mod gate;
pub mod model;
pub mod mutation;
pub mod persistence;
mod session;
pub mod store;
pub mod sync;

pub use analyze::{
    sample_verdict, AnalyzeRequest, AnalyzeResponse, AnalyzeService, AnalyzeTarget, MockAnalyzer,
    SubprocessAnalyzer, Verdict,
};
pub use config::{AnalyzerConfig, ConfigError, StrataConfig};
pub use gate::{can_perform, Capability, Denial, FeatureGate, Tier, TierToken};
pub use model::{
    Analysis, AnalysisId, Forecast, ForecastId, ForecastSeries, NewUpload, Project, ProjectId,
    Sentiment, Summary, SummaryId, Upload, UploadId, UploadSource,
};
pub use mutation::{
    AnalyzeOptions, MutationCoordinator, MutationError, MutationLimits, MutationOutcome,
    MutationResult,
};
pub use persistence::{
    MemoryService, OpenService, ResourceService, ServiceError, ServiceOp, ServiceResult,
    SqliteService,
};
pub use session::SyncSession;
pub use store::{Level, LevelRecord, LevelStatus, ResourceStore, StoreEvent, StoreSnapshot};
pub use sync::{CascadeReport, CascadeSynchronizer, NodeKind, StageOutcome, SyncMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
