//! Persistence collaborator for the catalog: store traits plus the
//! in-memory implementation used by the binary and tests. The only storage
//! capabilities assumed are get-by-natural-key, insert, update, and batch
//! update; (code, series) uniqueness is enforced here.

mod memory;
mod projections;

pub use memory::MemoryCatalog;
pub use projections::MemoryProjections;

use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::types::{
    Assessment, Execution, ExecutionKind, ExecutionStatus, ProjectionKind, RefMonth, Security,
    SecurityKey,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Constraint or enum-level rejection; field name mapped to the message.
    #[error("validation failed: {0:?}")]
    Validation(HashMap<String, String>),
    #[error("duplicate security {0}")]
    DuplicateKey(SecurityKey),
    #[error("security {0} not found")]
    MissingSecurity(SecurityKey),
    #[error("execution {0} not found")]
    MissingExecution(u64),
}

impl StoreError {
    pub fn validation(field: &str, message: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), message.to_string());
        StoreError::Validation(fields)
    }
}

#[async_trait]
pub trait SecurityStore: Send + Sync {
    async fn get(&self, key: &SecurityKey) -> Result<Option<Security>>;
    async fn insert(&self, security: Security) -> Result<()>;
    async fn update(&self, security: Security) -> Result<()>;
    /// All securities sharing (credit_risk, reference_date), the assessment
    /// propagation family.
    async fn find_family(
        &self,
        credit_risk: &str,
        reference_date: NaiveDate,
    ) -> Result<Vec<Security>>;
    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn get(&self, key: &SecurityKey) -> Result<Option<Assessment>>;
    async fn upsert(&self, assessment: Assessment) -> Result<()>;
    /// Batch form of upsert, used by the propagation fan-out.
    async fn upsert_many(&self, assessments: Vec<Assessment>) -> Result<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Creates the audit record in `pending` and returns it with its id.
    async fn create(&self, kind: ExecutionKind, trigger: &str) -> Result<Execution>;
    async fn mark_running(&self, id: u64) -> Result<()>;
    /// Clamps to 100 and never lets progress move backwards; returns the
    /// effective stored value.
    async fn set_progress(&self, id: u64, progress: u8) -> Result<u8>;
    async fn finish(
        &self,
        id: u64,
        status: ExecutionStatus,
        errors: Vec<String>,
    ) -> Result<()>;
    async fn get(&self, id: u64) -> Result<Option<Execution>>;
}

#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Latest monthly value for the series, or None when the month is not
    /// covered. The series is read-only for the pipeline.
    async fn latest_for_month(
        &self,
        kind: ProjectionKind,
        month: RefMonth,
    ) -> Result<Option<Decimal>>;
}
