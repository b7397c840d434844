use leadcheck_model::{RunId, RunStatus};
use tracing::{debug, info};

use crate::error::Result;
use crate::persistence::RunRepository;

/// Re-reads every record status of a run and marks the run `completed` once
/// all of them are terminal.
///
/// Runs after every record transition, so concurrent checks race freely;
/// the write only moves a run out of `queued`/`processing`, which makes
/// repeats no-ops and never overwrites a cancellation.
pub async fn check_run_completion(
    repo: &dyn RunRepository,
    run_id: RunId,
) -> Result<bool> {
    let statuses = repo.record_statuses(run_id).await?;
    let pending = statuses.iter().filter(|status| !status.is_terminal()).count();

    if pending > 0 {
        debug!(run_id = %run_id, pending, total = statuses.len(), "run still has open records");
        return Ok(false);
    }

    let changed = repo
        .set_run_status_if(
            run_id,
            RunStatus::Completed,
            &[RunStatus::Queued, RunStatus::Processing],
        )
        .await?;
    if changed {
        info!(run_id = %run_id, records = statuses.len(), "run completed");
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryRunRepository, RecordPatch};
    use leadcheck_model::{Lead, Run, RunFlags, RunRecord, RunRecordStatus};

    #[tokio::test]
    async fn completes_only_when_every_record_is_terminal() {
        let repo = InMemoryRunRepository::new();
        let run = Run::new(None, RunFlags::default());
        repo.insert_run(&run).await.expect("run");
        let a = RunRecord::new(run.id, Lead::default());
        let b = RunRecord::new(run.id, Lead::default());
        repo.insert_records(&[a.clone(), b.clone()]).await.expect("records");

        repo.update_record(a.id, &RecordPatch::status(RunRecordStatus::Failed))
            .await
            .expect("a");
        assert!(!check_run_completion(&repo, run.id).await.expect("check"));

        repo.update_record(b.id, &RecordPatch::status(RunRecordStatus::Completed))
            .await
            .expect("b");
        assert!(check_run_completion(&repo, run.id).await.expect("check"));
        assert!(!check_run_completion(&repo, run.id).await.expect("repeat"));

        let stored = repo.get_run(run.id).await.expect("get").expect("run");
        assert_eq!(stored.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn never_overwrites_a_cancelled_run() {
        let repo = InMemoryRunRepository::new();
        let run = Run::new(None, RunFlags::default());
        repo.insert_run(&run).await.expect("run");
        repo.set_run_status(run.id, RunStatus::Cancelled)
            .await
            .expect("cancel");

        assert!(!check_run_completion(&repo, run.id).await.expect("check"));
        let stored = repo.get_run(run.id).await.expect("get").expect("run");
        assert_eq!(stored.status, RunStatus::Cancelled);
    }
}
