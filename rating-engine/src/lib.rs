//! Benchmark-aware expected-return and rating-hub calculator, plus the
//! assessment propagation service that fans scored fields out across a
//! (credit_risk, reference_date) family.

use catalog_store::{AssessmentStore, ProjectionStore, SecurityStore, StoreError};
use core_types::types::{
    Assessment, AssessmentScores, BenchmarkIndex, Grade, ProjectionKind, Recommendation, RefMonth,
    Security, SecurityKey,
};
use log::debug;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RatingError {
    #[error("security {0} not found")]
    UnknownSecurity(SecurityKey),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rates above 2 are percentage notation; divide down to ratio form.
pub fn ratio_form(rate: Decimal) -> Decimal {
    if rate > Decimal::from(2) {
        rate / Decimal::from(100)
    } else {
        rate
    }
}

/// Benchmark-adjusted expected return: additive for `di_plus`/`ipca`,
/// multiplicative for `di_multiple`. CDI-family benchmarks read the CDI
/// projection, `ipca` reads the IPCA projection; everything else resolves
/// to None.
pub async fn expected_return_for(
    security: &Security,
    projections: &dyn ProjectionStore,
) -> Result<Option<Decimal>, StoreError> {
    let (Some(benchmark), Some(reference), Some(rate)) = (
        security.benchmark_index,
        security.reference_date,
        security.coupon_rate,
    ) else {
        return Ok(None);
    };
    let month = RefMonth::from(reference);
    let value = match benchmark {
        BenchmarkIndex::DiPlus => projections
            .latest_for_month(ProjectionKind::Cdi, month)
            .await?
            .map(|projection| projection + rate),
        BenchmarkIndex::DiMultiple => projections
            .latest_for_month(ProjectionKind::Cdi, month)
            .await?
            .map(|projection| projection * ratio_form(rate)),
        BenchmarkIndex::Ipca => projections
            .latest_for_month(ProjectionKind::Ipca, month)
            .await?
            .map(|projection| projection + rate),
        BenchmarkIndex::Cdi | BenchmarkIndex::IgpM => None,
    };
    Ok(value)
}

/// Expected-return ratio used by the rating hub: stored expected_return
/// first, then the computed value, then the raw coupon as a last resort.
pub async fn resolve_ratio(
    security: &Security,
    projections: &dyn ProjectionStore,
) -> Result<Option<Decimal>, StoreError> {
    if let Some(stored) = security.expected_return {
        return Ok(Some(ratio_form(stored)));
    }
    if let Some(computed) = expected_return_for(security, projections).await? {
        return Ok(Some(ratio_form(computed)));
    }
    Ok(security.coupon_rate.map(ratio_form))
}

/// `ratio × (sum of the four scores / 4) × 10`.
pub fn rating_hub(scores: &AssessmentScores, ratio: Decimal) -> Decimal {
    ratio * (Decimal::from(u32::from(scores.sum())) / Decimal::from(4)) * Decimal::from(10)
}

enum Propagation {
    /// New assessment: only family members without one receive the copy.
    FillMissing,
    /// Edited assessment: only existing family assessments are overwritten.
    OverwriteExisting,
}

/// Write path for assessments. Recomputes rating_hub on every write and
/// performs the family fan-out as an explicit copy, not a cascade.
pub struct AssessmentService {
    securities: Arc<dyn SecurityStore>,
    assessments: Arc<dyn AssessmentStore>,
    projections: Arc<dyn ProjectionStore>,
}

impl AssessmentService {
    pub fn new(
        securities: Arc<dyn SecurityStore>,
        assessments: Arc<dyn AssessmentStore>,
        projections: Arc<dyn ProjectionStore>,
    ) -> Self {
        Self {
            securities,
            assessments,
            projections,
        }
    }

    pub async fn create(
        &self,
        key: &SecurityKey,
        scores: AssessmentScores,
        grade: Grade,
        recommendation: Recommendation,
    ) -> Result<Assessment, RatingError> {
        self.write(key, scores, grade, recommendation, Propagation::FillMissing)
            .await
    }

    pub async fn update(
        &self,
        key: &SecurityKey,
        scores: AssessmentScores,
        grade: Grade,
        recommendation: Recommendation,
    ) -> Result<Assessment, RatingError> {
        self.write(
            key,
            scores,
            grade,
            recommendation,
            Propagation::OverwriteExisting,
        )
        .await
    }

    async fn write(
        &self,
        key: &SecurityKey,
        scores: AssessmentScores,
        grade: Grade,
        recommendation: Recommendation,
        propagation: Propagation,
    ) -> Result<Assessment, RatingError> {
        // the range gate has to run before any hub arithmetic
        if !scores.all_in_range() {
            return Err(RatingError::Store(StoreError::validation(
                "scores",
                "must be between 1 and 5",
            )));
        }
        let security = self
            .securities
            .get(key)
            .await?
            .ok_or_else(|| RatingError::UnknownSecurity(key.clone()))?;

        let assessment = self.build(&security, scores, grade, recommendation).await?;
        self.assessments.upsert(assessment.clone()).await?;
        self.propagate(&security, scores, grade, recommendation, propagation)
            .await?;
        Ok(assessment)
    }

    async fn build(
        &self,
        security: &Security,
        scores: AssessmentScores,
        grade: Grade,
        recommendation: Recommendation,
    ) -> Result<Assessment, StoreError> {
        let ratio = resolve_ratio(security, self.projections.as_ref()).await?;
        Ok(Assessment {
            security: security.key(),
            scores,
            grade,
            recommendation,
            rating_hub: ratio.map(|r| rating_hub(&scores, r)),
        })
    }

    async fn propagate(
        &self,
        origin: &Security,
        scores: AssessmentScores,
        grade: Grade,
        recommendation: Recommendation,
        propagation: Propagation,
    ) -> Result<(), RatingError> {
        let (Some(credit_risk), Some(reference)) =
            (origin.credit_risk.as_deref(), origin.reference_date)
        else {
            return Ok(());
        };

        let family = self.securities.find_family(credit_risk, reference).await?;
        let mut batch = Vec::new();
        for member in family {
            if member.key() == origin.key() {
                continue;
            }
            let existing = self.assessments.get(&member.key()).await?;
            let eligible = match propagation {
                Propagation::FillMissing => existing.is_none(),
                Propagation::OverwriteExisting => existing.is_some(),
            };
            if !eligible {
                continue;
            }
            batch.push(self.build(&member, scores, grade, recommendation).await?);
        }
        if !batch.is_empty() {
            debug!(
                "propagating assessment of {} to {} family member(s)",
                origin.key(),
                batch.len()
            );
            self.assessments.upsert_many(batch).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_store::{MemoryCatalog, MemoryProjections};
    use chrono::NaiveDate;
    use core_types::types::{SecurityType, SyncSource, DEFAULT_SERIES};
    use rust_decimal_macros::dec;

    fn scores() -> AssessmentScores {
        AssessmentScores {
            issuer_quality: 3,
            capital_structure: 4,
            solvency_ratio: 5,
            credit_spread: 2,
        }
    }

    fn security(code: &str) -> Security {
        Security {
            code: code.to_string(),
            series: DEFAULT_SERIES.to_string(),
            issuer: "Issuer A".to_string(),
            credit_risk: Some("Originator X".to_string()),
            security_type: SecurityType::Debenture,
            benchmark_index: None,
            coupon_rate: None,
            correction_rate: None,
            duration_days: 360,
            reference_date: NaiveDate::from_ymd_opt(2025, 3, 1),
            maturity_date: None,
            ntnb_reference: None,
            ntnb_reference_date: None,
            expected_return: None,
            sync_source: SyncSource::Api,
        }
    }

    fn march() -> RefMonth {
        RefMonth {
            year: 2025,
            month: 3,
        }
    }

    #[test]
    fn rating_hub_worked_example() {
        assert_eq!(rating_hub(&scores(), dec!(0.12)), dec!(4.2));
    }

    #[test]
    fn ratio_form_normalizes_percentage_notation() {
        assert_eq!(ratio_form(dec!(115)), dec!(1.15));
        assert_eq!(ratio_form(dec!(0.12)), dec!(0.12));
        assert_eq!(ratio_form(dec!(2)), dec!(2));
    }

    #[tokio::test]
    async fn multiplicative_expected_return_worked_example() {
        let projections = MemoryProjections::new();
        projections.load([(ProjectionKind::Cdi, march(), dec!(12.00))]);

        let mut sec = security("DEB1");
        sec.benchmark_index = Some(BenchmarkIndex::DiMultiple);
        sec.coupon_rate = Some(dec!(115));

        let result = expected_return_for(&sec, &projections).await.unwrap();
        assert_eq!(result, Some(dec!(13.80)));
    }

    #[tokio::test]
    async fn additive_expected_return_adds_spread() {
        let projections = MemoryProjections::new();
        projections.load([(ProjectionKind::Ipca, march(), dec!(4.50))]);

        let mut sec = security("DEB2");
        sec.benchmark_index = Some(BenchmarkIndex::Ipca);
        sec.coupon_rate = Some(dec!(6.25));

        let result = expected_return_for(&sec, &projections).await.unwrap();
        assert_eq!(result, Some(dec!(10.75)));
    }

    #[tokio::test]
    async fn unsupported_benchmark_yields_none() {
        let projections = MemoryProjections::new();
        let mut sec = security("DEB3");
        sec.benchmark_index = Some(BenchmarkIndex::IgpM);
        sec.coupon_rate = Some(dec!(8));
        assert_eq!(expected_return_for(&sec, &projections).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ratio_falls_back_to_coupon_rate() {
        let projections = MemoryProjections::new(); // no data loaded
        let mut sec = security("DEB4");
        sec.benchmark_index = Some(BenchmarkIndex::DiPlus);
        sec.coupon_rate = Some(dec!(12));
        assert_eq!(
            resolve_ratio(&sec, &projections).await.unwrap(),
            Some(dec!(0.12))
        );
    }

    #[tokio::test]
    async fn rating_hub_is_unset_when_no_ratio_resolves() {
        let store = Arc::new(MemoryCatalog::new());
        let projections = Arc::new(MemoryProjections::new());
        let sec = security("DEB5"); // no coupon, no benchmark
        SecurityStore::insert(store.as_ref(), sec.clone()).await.unwrap();

        let service =
            AssessmentService::new(store.clone(), store.clone(), projections);
        let assessment = service
            .create(&sec.key(), scores(), Grade::Hg, Recommendation::Enter)
            .await
            .unwrap();
        assert_eq!(assessment.rating_hub, None);
    }

    #[tokio::test]
    async fn out_of_range_scores_are_rejected_before_any_write() {
        let store = Arc::new(MemoryCatalog::new());
        let sec = security("DEB12");
        SecurityStore::insert(store.as_ref(), sec.clone()).await.unwrap();

        let service = AssessmentService::new(
            store.clone(),
            store.clone(),
            Arc::new(MemoryProjections::new()),
        );
        let wild = AssessmentScores {
            issuer_quality: 100,
            capital_structure: 100,
            solvency_ratio: 100,
            credit_spread: 100,
        };
        let err = service
            .create(&sec.key(), wild, Grade::Hg, Recommendation::Enter)
            .await
            .unwrap_err();
        match err {
            RatingError::Store(StoreError::Validation(fields)) => {
                assert!(fields.contains_key("scores"))
            }
            other => panic!("expected validation error, got {other}"),
        }
        let untouched = AssessmentStore::get(store.as_ref(), &sec.key())
            .await
            .unwrap();
        assert!(untouched.is_none());
    }

    #[tokio::test]
    async fn create_fans_out_to_family_members_without_assessments() {
        let store = Arc::new(MemoryCatalog::new());
        let projections = Arc::new(MemoryProjections::new());

        let mut origin = security("DEB6");
        origin.expected_return = Some(dec!(12));
        let mut sibling = security("DEB7");
        sibling.expected_return = Some(dec!(10));
        let mut outsider = security("DEB8");
        outsider.credit_risk = Some("Someone Else".to_string());

        for sec in [&origin, &sibling, &outsider] {
            SecurityStore::insert(store.as_ref(), sec.clone()).await.unwrap();
        }

        let service =
            AssessmentService::new(store.clone(), store.clone(), projections);
        service
            .create(&origin.key(), scores(), Grade::Hy, Recommendation::NotEnter)
            .await
            .unwrap();

        let copied = AssessmentStore::get(store.as_ref(), &sibling.key())
            .await
            .unwrap()
            .expect("sibling should have received a copy");
        assert_eq!(copied.scores, scores());
        assert_eq!(copied.grade, Grade::Hy);
        // sibling's hub uses its own ratio: 0.10 × 3.5 × 10
        assert_eq!(copied.rating_hub, Some(dec!(3.5)));

        let untouched = AssessmentStore::get(store.as_ref(), &outsider.key())
            .await
            .unwrap();
        assert!(untouched.is_none());
    }

    #[tokio::test]
    async fn update_overwrites_only_existing_family_assessments() {
        let store = Arc::new(MemoryCatalog::new());
        let projections = Arc::new(MemoryProjections::new());

        let mut origin = security("DEB9");
        origin.expected_return = Some(dec!(12));
        let mut assessed = security("DEB10");
        assessed.expected_return = Some(dec!(12));
        let unassessed = security("DEB11");

        for sec in [&origin, &assessed, &unassessed] {
            SecurityStore::insert(store.as_ref(), sec.clone()).await.unwrap();
        }

        let service =
            AssessmentService::new(store.clone(), store.clone(), projections);
        // seed an assessment on `assessed` only
        AssessmentStore::upsert(
            store.as_ref(),
            Assessment {
                security: assessed.key(),
                scores: scores(),
                grade: Grade::Hg,
                recommendation: Recommendation::Enter,
                rating_hub: None,
            },
        )
        .await
        .unwrap();

        let new_scores = AssessmentScores {
            issuer_quality: 1,
            capital_structure: 1,
            solvency_ratio: 1,
            credit_spread: 1,
        };
        service
            .update(&origin.key(), new_scores, Grade::Hy, Recommendation::NotEnter)
            .await
            .unwrap();

        let overwritten = AssessmentStore::get(store.as_ref(), &assessed.key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(overwritten.scores, new_scores);
        assert_eq!(overwritten.recommendation, Recommendation::NotEnter);

        let still_missing = AssessmentStore::get(store.as_ref(), &unassessed.key())
            .await
            .unwrap();
        assert!(still_missing.is_none());
    }
}
