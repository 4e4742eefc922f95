use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sentinel series used when a spreadsheet row carries no series of its own.
pub const DEFAULT_SERIES: &str = "ÚNICA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityType {
    Cri,
    Cra,
    Debenture,
    DebenturePlus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkIndex {
    Cdi,
    DiPlus,
    DiMultiple,
    Ipca,
    IgpM,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    Api,
    Xls,
}

/// Natural key for a catalog entry. Series defaults to [`DEFAULT_SERIES`]
/// when the upstream data does not split the issue into series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityKey {
    pub code: String,
    pub series: String,
}

impl SecurityKey {
    pub fn new(code: impl Into<String>, series: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            series: series.into(),
        }
    }
}

impl std::fmt::Display for SecurityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.code, self.series)
    }
}

/// One fixed-income security as stored in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub code: String,
    pub series: String,
    pub issuer: String,
    pub credit_risk: Option<String>,
    pub security_type: SecurityType,
    pub benchmark_index: Option<BenchmarkIndex>,
    pub coupon_rate: Option<Decimal>,
    pub correction_rate: Option<Decimal>,
    pub duration_days: i64,
    pub reference_date: Option<NaiveDate>,
    pub maturity_date: Option<NaiveDate>,
    pub ntnb_reference: Option<String>,
    pub ntnb_reference_date: Option<NaiveDate>,
    pub expected_return: Option<Decimal>,
    pub sync_source: SyncSource,
}

impl Security {
    pub fn key(&self) -> SecurityKey {
        SecurityKey::new(self.code.clone(), self.series.clone())
    }
}

/// Normalizer output: one spreadsheet or feed row mapped to typed attributes.
/// Everything the validation gate checks later stays optional here; soft
/// parse failures surface as `None`, never as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSecurity {
    pub row_index: u32,
    pub code: Option<String>,
    pub series: String,
    pub issuer: Option<String>,
    pub credit_risk: Option<String>,
    pub security_type: Option<SecurityType>,
    pub benchmark_index: Option<BenchmarkIndex>,
    pub coupon_rate: Option<Decimal>,
    pub correction_rate: Option<Decimal>,
    pub duration_days: Option<i64>,
    pub reference_date: Option<NaiveDate>,
    pub maturity_date: Option<NaiveDate>,
    pub ntnb_reference: Option<String>,
    pub ntnb_reference_date: Option<NaiveDate>,
    pub sync_source: SyncSource,
}

impl NormalizedSecurity {
    pub fn empty(row_index: u32, sync_source: SyncSource) -> Self {
        Self {
            row_index,
            code: None,
            series: DEFAULT_SERIES.to_string(),
            issuer: None,
            credit_risk: None,
            security_type: None,
            benchmark_index: None,
            coupon_rate: None,
            correction_rate: None,
            duration_days: None,
            reference_date: None,
            maturity_date: None,
            ntnb_reference: None,
            ntnb_reference_date: None,
            sync_source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Hy,
    Hg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Enter,
    NotEnter,
}

/// The four qualitative dimensions, each scored 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentScores {
    pub issuer_quality: u8,
    pub capital_structure: u8,
    pub solvency_ratio: u8,
    pub credit_spread: u8,
}

impl AssessmentScores {
    pub fn sum(&self) -> u16 {
        u16::from(self.issuer_quality)
            + u16::from(self.capital_structure)
            + u16::from(self.solvency_ratio)
            + u16::from(self.credit_spread)
    }

    pub fn all_in_range(&self) -> bool {
        [
            self.issuer_quality,
            self.capital_structure,
            self.solvency_ratio,
            self.credit_spread,
        ]
        .iter()
        .all(|s| (1..=5).contains(s))
    }
}

/// Qualitative assessment attached to one security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub security: SecurityKey,
    pub scores: AssessmentScores,
    pub grade: Grade,
    pub recommendation: Recommendation,
    pub rating_hub: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    FileSync,
    ApiSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Durable audit record of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: u64,
    pub kind: ExecutionKind,
    pub status: ExecutionStatus,
    pub trigger: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionKind {
    Cdi,
    Selic,
    Ipca,
    IgpM,
}

/// Calendar month key for the projection series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefMonth {
    pub year: i32,
    pub month: u32,
}

impl From<NaiveDate> for RefMonth {
    fn from(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}
