use crate::{ProjectionStore, Result};
use async_trait::async_trait;
use core_types::types::{ProjectionKind, RefMonth};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Monthly CDI/SELIC/IPCA/IGP-M projection values. Loaded once, then only
/// consulted; the ingestion pipeline never mutates these.
#[derive(Debug, Default)]
pub struct MemoryProjections {
    values: RwLock<HashMap<(ProjectionKind, RefMonth), Decimal>>,
}

impl MemoryProjections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, entries: impl IntoIterator<Item = (ProjectionKind, RefMonth, Decimal)>) {
        let mut guard = self.values.write();
        for (kind, month, value) in entries {
            guard.insert((kind, month), value);
        }
    }
}

#[async_trait]
impl ProjectionStore for MemoryProjections {
    async fn latest_for_month(
        &self,
        kind: ProjectionKind,
        month: RefMonth,
    ) -> Result<Option<Decimal>> {
        Ok(self.values.read().get(&(kind, month)).copied())
    }
}
