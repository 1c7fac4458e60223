use async_trait::async_trait;
use uuid::Uuid;

use crate::config::IngestPolicy;
use crate::error::Result;
use crate::models::{DiseaseCounts, ProductionRecord, SeverityContext};

/// Row counts produced by applying one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedUpload {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Persistence for the production series, per-session severity and scan results.
///
/// `apply_upload` must be atomic: readers see either the series before the
/// upload or the series after it, never a mix.
#[async_trait]
pub trait ProductionStore: Send + Sync {
    async fn apply_upload(
        &self,
        policy: IngestPolicy,
        records: &[ProductionRecord],
        severity: &SeverityContext,
    ) -> Result<AppliedUpload>;

    /// All records, ascending by date.
    async fn fetch_series(&self) -> Result<Vec<ProductionRecord>>;

    async fn session_severity(&self, session_id: &str) -> Result<Option<i32>>;

    async fn record_scan(&self, disease: &str, confidence: f64) -> Result<Uuid>;

    /// Per-label detection counts, non-disease labels excluded.
    async fn disease_counts(&self) -> Result<DiseaseCounts>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::RwLock;

    use chrono::NaiveDate;

    use super::*;
    use crate::loss::NON_DISEASE_LABELS;

    #[derive(Default)]
    struct Inner {
        production: BTreeMap<NaiveDate, f64>,
        sessions: HashMap<String, i32>,
        scans: Vec<(Uuid, String, f64)>,
    }

    /// Single-lock store used by tests in place of Postgres.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: RwLock<Inner>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ProductionStore for MemoryStore {
        async fn apply_upload(
            &self,
            policy: IngestPolicy,
            records: &[ProductionRecord],
            severity: &SeverityContext,
        ) -> Result<AppliedUpload> {
            let mut inner = self.inner.write().unwrap();
            let mut applied = AppliedUpload::default();

            inner
                .sessions
                .insert(severity.session_id.clone(), severity.severity);
            if policy == IngestPolicy::Replace {
                applied.removed = inner.production.len();
                inner.production.clear();
            }
            for record in records {
                match inner.production.insert(record.date, record.value) {
                    Some(_) => applied.updated += 1,
                    None => applied.inserted += 1,
                }
            }
            Ok(applied)
        }

        async fn fetch_series(&self) -> Result<Vec<ProductionRecord>> {
            let inner = self.inner.read().unwrap();
            Ok(inner
                .production
                .iter()
                .map(|(&date, &value)| ProductionRecord { date, value })
                .collect())
        }

        async fn session_severity(&self, session_id: &str) -> Result<Option<i32>> {
            Ok(self.inner.read().unwrap().sessions.get(session_id).copied())
        }

        async fn record_scan(&self, disease: &str, confidence: f64) -> Result<Uuid> {
            let id = Uuid::new_v4();
            self.inner
                .write()
                .unwrap()
                .scans
                .push((id, disease.to_string(), confidence));
            Ok(id)
        }

        async fn disease_counts(&self) -> Result<DiseaseCounts> {
            let inner = self.inner.read().unwrap();
            let mut counts = DiseaseCounts::default();
            for (_, disease, _) in &inner.scans {
                if NON_DISEASE_LABELS.contains(&disease.as_str()) {
                    continue;
                }
                *counts.disease_counts.entry(disease.clone()).or_insert(0) += 1;
                counts.total_diseases_detected += 1;
            }
            Ok(counts)
        }
    }
}
