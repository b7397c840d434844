use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use leadcheck_model::{Run, RunId, RunRecord, RunRecordId, RunRecordStatus, RunStatus};
use tokio::sync::Mutex;

use crate::error::{LeadError, Result};

use super::repository::{RecordPatch, RecordQuery, RunRepository};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<RunId, Run>,
    records: BTreeMap<RunRecordId, RunRecord>,
}

/// Repository held in process memory; records iterate in id order like the
/// Postgres implementation.
#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    inner: Mutex<Inner>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of a run, in id order.
    pub async fn records_of(&self, run_id: RunId) -> Vec<RunRecord> {
        let guard = self.inner.lock().await;
        guard
            .records
            .values()
            .filter(|record| record.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn insert_run(&self, run: &Run) -> Result<()> {
        self.inner.lock().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        Ok(self.inner.lock().await.runs.get(&id).cloned())
    }

    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let run = guard
            .runs
            .get_mut(&id)
            .ok_or_else(|| LeadError::NotFound(format!("run {id}")))?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn set_run_status_if(
        &self,
        id: RunId,
        status: RunStatus,
        from: &[RunStatus],
    ) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let run = guard
            .runs
            .get_mut(&id)
            .ok_or_else(|| LeadError::NotFound(format!("run {id}")))?;
        if !from.contains(&run.status) {
            return Ok(false);
        }
        run.status = status;
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_records(&self, records: &[RunRecord]) -> Result<()> {
        let mut guard = self.inner.lock().await;
        for record in records {
            guard.records.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn get_record(&self, id: RunRecordId) -> Result<Option<RunRecord>> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }

    async fn page_records(&self, query: &RecordQuery) -> Result<Vec<RunRecord>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .records
            .values()
            .filter(|record| record.run_id == query.run_id)
            .filter(|record| query.filter.matches(record.status))
            .filter(|record| query.after.is_none_or(|after| record.id > after))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn record_statuses(&self, run_id: RunId) -> Result<Vec<RunRecordStatus>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .records
            .values()
            .filter(|record| record.run_id == run_id)
            .map(|record| record.status)
            .collect())
    }

    async fn update_record(
        &self,
        id: RunRecordId,
        patch: &RecordPatch,
    ) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let record = guard
            .records
            .get_mut(&id)
            .ok_or_else(|| LeadError::NotFound(format!("run record {id}")))?;
        Ok(patch.apply(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::repository::StatusFilter;
    use leadcheck_model::{Lead, RunFlags};

    async fn seeded(count: usize) -> (InMemoryRunRepository, RunId) {
        let repo = InMemoryRunRepository::new();
        let run = Run::new(None, RunFlags::default());
        repo.insert_run(&run).await.expect("run");
        let records: Vec<_> = (0..count)
            .map(|_| RunRecord::new(run.id, Lead::default()))
            .collect();
        repo.insert_records(&records).await.expect("records");
        (repo, run.id)
    }

    #[tokio::test]
    async fn keyset_paging_survives_status_changes() {
        let (repo, run_id) = seeded(5).await;
        let mut after = None;
        let mut seen = 0;

        loop {
            let page = repo
                .page_records(&RecordQuery::keyset(
                    run_id,
                    StatusFilter::Eq(RunRecordStatus::Pending),
                    after,
                    2,
                ))
                .await
                .expect("page");
            for record in &page {
                repo.update_record(
                    record.id,
                    &RecordPatch::status(RunRecordStatus::Cancelled),
                )
                .await
                .expect("update");
            }
            seen += page.len();
            after = page.last().map(|record| record.id);
            if page.len() < 2 {
                break;
            }
        }

        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn conditional_run_status() {
        let (repo, run_id) = seeded(0).await;
        repo.set_run_status(run_id, RunStatus::Cancelled)
            .await
            .expect("cancel");
        let changed = repo
            .set_run_status_if(
                run_id,
                RunStatus::Completed,
                &[RunStatus::Queued, RunStatus::Processing],
            )
            .await
            .expect("guarded");
        assert!(!changed);
        let run = repo.get_run(run_id).await.expect("get").expect("run");
        assert_eq!(run.status, RunStatus::Cancelled);
    }
}
