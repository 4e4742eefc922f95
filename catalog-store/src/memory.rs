use crate::{AssessmentStore, ExecutionStore, Result, SecurityStore, StoreError};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use core_types::types::{
    Assessment, Execution, ExecutionKind, ExecutionStatus, Security, SecurityKey,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory catalog keyed by natural key. The map itself is the (code,
/// series) uniqueness constraint.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    securities: RwLock<HashMap<SecurityKey, Security>>,
    assessments: RwLock<HashMap<SecurityKey, Assessment>>,
    executions: RwLock<HashMap<u64, Execution>>,
    next_execution_id: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_security(security: &Security) -> Result<()> {
        if security.code.trim().is_empty() {
            return Err(StoreError::validation("code", "can't be blank"));
        }
        if security.series.trim().is_empty() {
            return Err(StoreError::validation("series", "can't be blank"));
        }
        if security.issuer.trim().is_empty() {
            return Err(StoreError::validation("issuer", "can't be blank"));
        }
        if security.duration_days <= 0 {
            return Err(StoreError::validation("duration", "must be greater than 0"));
        }
        Ok(())
    }

    fn validate_assessment(assessment: &Assessment) -> Result<()> {
        if !assessment.scores.all_in_range() {
            return Err(StoreError::validation("scores", "must be between 1 and 5"));
        }
        Ok(())
    }
}

#[async_trait]
impl SecurityStore for MemoryCatalog {
    async fn get(&self, key: &SecurityKey) -> Result<Option<Security>> {
        Ok(self.securities.read().get(key).cloned())
    }

    async fn insert(&self, security: Security) -> Result<()> {
        Self::validate_security(&security)?;
        let key = security.key();
        let mut guard = self.securities.write();
        if guard.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        guard.insert(key, security);
        Ok(())
    }

    async fn update(&self, security: Security) -> Result<()> {
        Self::validate_security(&security)?;
        let key = security.key();
        let mut guard = self.securities.write();
        if !guard.contains_key(&key) {
            return Err(StoreError::MissingSecurity(key));
        }
        guard.insert(key, security);
        Ok(())
    }

    async fn find_family(
        &self,
        credit_risk: &str,
        reference_date: NaiveDate,
    ) -> Result<Vec<Security>> {
        let guard = self.securities.read();
        Ok(guard
            .values()
            .filter(|s| {
                s.credit_risk.as_deref() == Some(credit_risk)
                    && s.reference_date == Some(reference_date)
            })
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.securities.read().len())
    }
}

#[async_trait]
impl AssessmentStore for MemoryCatalog {
    async fn get(&self, key: &SecurityKey) -> Result<Option<Assessment>> {
        Ok(self.assessments.read().get(key).cloned())
    }

    async fn upsert(&self, assessment: Assessment) -> Result<()> {
        Self::validate_assessment(&assessment)?;
        self.assessments
            .write()
            .insert(assessment.security.clone(), assessment);
        Ok(())
    }

    async fn upsert_many(&self, assessments: Vec<Assessment>) -> Result<()> {
        for assessment in &assessments {
            Self::validate_assessment(assessment)?;
        }
        let mut guard = self.assessments.write();
        for assessment in assessments {
            guard.insert(assessment.security.clone(), assessment);
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryCatalog {
    async fn create(&self, kind: ExecutionKind, trigger: &str) -> Result<Execution> {
        let id = self.next_execution_id.fetch_add(1, Ordering::SeqCst) + 1;
        let execution = Execution {
            id,
            kind,
            status: ExecutionStatus::Pending,
            trigger: trigger.to_string(),
            started_at: None,
            finished_at: None,
            progress: 0,
            errors: Vec::new(),
        };
        self.executions.write().insert(id, execution.clone());
        Ok(execution)
    }

    async fn mark_running(&self, id: u64) -> Result<()> {
        let mut guard = self.executions.write();
        let execution = guard.get_mut(&id).ok_or(StoreError::MissingExecution(id))?;
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        Ok(())
    }

    async fn set_progress(&self, id: u64, progress: u8) -> Result<u8> {
        let mut guard = self.executions.write();
        let execution = guard.get_mut(&id).ok_or(StoreError::MissingExecution(id))?;
        let clamped = progress.min(100);
        if clamped > execution.progress {
            execution.progress = clamped;
        }
        Ok(execution.progress)
    }

    async fn finish(
        &self,
        id: u64,
        status: ExecutionStatus,
        errors: Vec<String>,
    ) -> Result<()> {
        let mut guard = self.executions.write();
        let execution = guard.get_mut(&id).ok_or(StoreError::MissingExecution(id))?;
        execution.status = status;
        execution.finished_at = Some(Utc::now());
        execution.errors = errors;
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Execution>> {
        Ok(self.executions.read().get(&id).cloned())
    }
}
