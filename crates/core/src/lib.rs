pub mod audit;
pub mod campaign;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod errors;
pub mod ingest;
pub mod normalize;
pub mod reconcile;
pub mod rfm;
pub mod segments;
pub mod store;

pub use audit::{OperationKind, OperationLogEntry};
pub use campaign::{
    plan_campaign, CampaignCriteria, CampaignDraft, CampaignError, CampaignPlan, CampaignStatus,
    SendMode,
};
pub use dashboard::{dashboard_metrics, DashboardMetrics};
pub use domain::customer::{Customer, CustomerId, OriginSystem, Phone, TenantId};
pub use domain::integration::Integration;
pub use domain::order::{Order, OrderId, OrderItem, OrderPayment, OrderReference};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ingest::{
    CsvImportMode, IngestSettings, IngestionPipeline, IngestionReport, OrderSource, SourceError,
    SyncMode,
};
pub use reconcile::{Candidate, ReconcileDecision, ReconcileError, Reconciler};
pub use rfm::{CohortBaseline, RfmScore, Segment};
pub use segments::{score_cohort, CustomerFilter, ScoredCustomer, SegmentSummary, Selection};
pub use store::{CommitOutcome, CustomerStore, IntegrationStore, OrderInsert, StoreError};
