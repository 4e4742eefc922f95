use crate::reconcile::Outcome;
use core_types::progress::JobStatsSnapshot;
use std::collections::HashMap;

/// Structured detail for one row the store rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct RowErrorDetail {
    pub row: u32,
    pub fields: HashMap<String, String>,
}

impl std::fmt::Display for RowErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, message)| format!("{field} {message}"))
            .collect();
        parts.sort();
        write!(f, "row {}: {}", self.row, parts.join(", "))
    }
}

/// Cumulative outcome counters for one run.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub skip_reasons: HashMap<&'static str, u64>,
    pub errors: Vec<RowErrorDetail>,
}

impl BatchStats {
    pub fn record(&mut self, row: u32, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped(reason) => {
                self.skipped += 1;
                *self.skip_reasons.entry(reason.as_str()).or_insert(0) += 1;
            }
            Outcome::Error(fields) => self.errors.push(RowErrorDetail { row, fields }),
        }
    }

    pub fn snapshot(&self) -> JobStatsSnapshot {
        JobStatsSnapshot {
            created: self.created,
            updated: self.updated,
            skipped: self.skipped,
            errors: self.errors.len() as u64,
        }
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}
