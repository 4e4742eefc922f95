//! Validate-and-upsert for one normalized record. This is the sole writer
//! path for Security records; everything else only reads the catalog.

use catalog_store::{ProjectionStore, SecurityStore, StoreError};
use core_types::types::{NormalizedSecurity, Security, SecurityKey, SyncSource};
use rating_engine::expected_return_for;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingCode,
    MissingSecurityType,
    MissingIssuer,
    MissingDuration,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingCode => "missing_code",
            SkipReason::MissingSecurityType => "missing_security_type",
            SkipReason::MissingIssuer => "missing_issuer",
            SkipReason::MissingDuration => "missing_duration",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-level result. Skips and errors are counted by the caller, never
/// raised; only unexpected store failures propagate out of `reconcile`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created,
    Updated,
    Skipped(SkipReason),
    Error(HashMap<String, String>),
}

pub struct ReconcileEngine {
    securities: Arc<dyn SecurityStore>,
    projections: Arc<dyn ProjectionStore>,
    override_source: Option<SyncSource>,
}

impl ReconcileEngine {
    pub fn new(
        securities: Arc<dyn SecurityStore>,
        projections: Arc<dyn ProjectionStore>,
    ) -> Self {
        Self {
            securities,
            projections,
            override_source: None,
        }
    }

    /// Force every touched record to this sync source instead of keeping
    /// whatever the stored record already carries.
    pub fn with_override_source(mut self, source: SyncSource) -> Self {
        self.override_source = Some(source);
        self
    }

    pub async fn reconcile(&self, rec: NormalizedSecurity) -> Result<Outcome, StoreError> {
        let Some(code) = rec.code.as_deref().map(str::trim).filter(|c| !c.is_empty())
        else {
            return Ok(Outcome::Skipped(SkipReason::MissingCode));
        };
        let Some(security_type) = rec.security_type else {
            return Ok(Outcome::Skipped(SkipReason::MissingSecurityType));
        };
        let Some(issuer) = rec
            .issuer
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
        else {
            return Ok(Outcome::Skipped(SkipReason::MissingIssuer));
        };
        let Some(duration_days) = rec.duration_days else {
            return Ok(Outcome::Skipped(SkipReason::MissingDuration));
        };

        let key = SecurityKey::new(code, rec.series.clone());
        let existing = self.securities.get(&key).await?;

        let mut security = Security {
            code: code.to_string(),
            series: rec.series.clone(),
            issuer: issuer.to_string(),
            credit_risk: rec.credit_risk.clone(),
            security_type,
            benchmark_index: rec.benchmark_index,
            coupon_rate: rec.coupon_rate,
            correction_rate: rec.correction_rate,
            duration_days,
            reference_date: rec.reference_date,
            maturity_date: rec.maturity_date,
            ntnb_reference: rec.ntnb_reference.clone(),
            ntnb_reference_date: rec.ntnb_reference_date,
            expected_return: None,
            sync_source: self.override_source.unwrap_or(rec.sync_source),
        };

        let computed = expected_return_for(&security, self.projections.as_ref()).await?;
        match existing {
            None => {
                security.expected_return = computed;
                match self.securities.insert(security).await {
                    Ok(()) => Ok(Outcome::Created),
                    Err(err) => Self::store_outcome(err),
                }
            }
            Some(stored) => {
                // sync_source is sticky across updates unless overridden
                security.sync_source = self.override_source.unwrap_or(stored.sync_source);
                security.expected_return = computed.or(stored.expected_return);
                match self.securities.update(security).await {
                    Ok(()) => Ok(Outcome::Updated),
                    Err(err) => Self::store_outcome(err),
                }
            }
        }
    }

    fn store_outcome(err: StoreError) -> Result<Outcome, StoreError> {
        match err {
            StoreError::Validation(fields) => Ok(Outcome::Error(fields)),
            StoreError::DuplicateKey(key) => {
                let mut fields = HashMap::new();
                fields.insert("code".to_string(), format!("{key} already taken"));
                Ok(Outcome::Error(fields))
            }
            other => Err(other),
        }
    }
}
