use async_trait::async_trait;
use leadcheck_model::{
    Run, RunId, RunRecordId, RunRecordStatus, RunStatus,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{StepContext, Workflow, WorkflowKind};
use crate::error::{LeadError, Result};
use crate::events::{
    CorrelationKey, DomainEvent, EventEnvelope, EventId, EventName,
    RecordQueued, RecordRef, RunQueued, RunRef,
};
use crate::persistence::{Guard, RecordPatch, RecordQuery, StatusFilter};

use super::{WorkflowDeps, completion::check_run_completion};

/// Pages processed by a fan-out; `pages[i]` is the length of page `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutSummary {
    pub pages: Vec<usize>,
    pub queued: usize,
}

/// Records touched by a cancellation or retrigger sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub pages: usize,
    pub records: usize,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct PageResult {
    len: usize,
    affected: usize,
    last: Option<RunRecordId>,
}

async fn fetch_run(ctx: &StepContext, deps: &WorkflowDeps, run_id: RunId) -> Result<Run> {
    let repo = deps.repo.as_ref();
    ctx.run("fetch-run", move || async move {
        repo.get_run(run_id)
            .await?
            .ok_or_else(|| LeadError::InvalidInput(format!("run {run_id} does not exist")))
    })
    .await
}

/// `process-run`: pages through a run's records and queues one
/// `process-run-record` execution per record.
///
/// Paging stops at the first page shorter than the page size, never on a
/// count query, so records inserted during the loop are still picked up.
#[derive(Debug)]
pub struct ProcessRunWorkflow {
    deps: WorkflowDeps,
}

impl ProcessRunWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for ProcessRunWorkflow {
    type Input = RunQueued;
    type Output = FanOutSummary;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ProcessRun
    }

    fn trigger(&self) -> EventName {
        EventName::RunQueued
    }

    fn accept(&self, event: &DomainEvent) -> Option<RunQueued> {
        match event {
            DomainEvent::RunQueued(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn cancel_on(&self, input: &RunQueued) -> Option<(EventName, CorrelationKey)> {
        Some((EventName::RunCancelled, CorrelationKey::Run(input.run_id)))
    }

    async fn run(&self, ctx: &StepContext, input: RunQueued) -> Result<FanOutSummary> {
        let deps = &self.deps;
        let repo = deps.repo.as_ref();
        let events = deps.events.as_ref();
        let run_id = input.run_id;
        let ignore_cache = input.ignore_cache;
        let page_size = deps.page_size.max(1);

        let run = fetch_run(ctx, deps, run_id).await?;
        if run.status.is_terminal() {
            info!(run_id = %run_id, status = %run.status, "run already terminal; nothing to queue");
            return Ok(FanOutSummary::default());
        }

        ctx.run("mark-run-processing", move || async move {
            repo.set_run_status_if(
                run_id,
                RunStatus::Processing,
                &[RunStatus::Queued, RunStatus::Processing],
            )
            .await
        })
        .await?;

        let scope = format!("{}/queue", ctx.execution_id());
        let scope = scope.as_str();
        let mut summary = FanOutSummary::default();

        loop {
            let offset = summary.pages.len() * page_size;
            let page = ctx
                .run("queue-page", move || async move {
                    let records = repo
                        .page_records(&RecordQuery::offset(
                            run_id,
                            StatusFilter::Any,
                            offset,
                            page_size,
                        ))
                        .await?;

                    let mut affected = 0;
                    for record in &records {
                        let event_id = EventId::derived(scope, record.id.as_uuid());
                        let patch = RecordPatch::status(RunRecordStatus::Processing)
                            .with_correlation_id(Some(event_id.as_uuid()))
                            .guarded(Guard::NotTerminal);
                        if !repo.update_record(record.id, &patch).await? {
                            continue;
                        }
                        events
                            .publish_envelope(EventEnvelope::with_id(
                                event_id,
                                DomainEvent::RecordQueued(RecordQueued {
                                    run_record_id: record.id,
                                    ignore_cache,
                                }),
                            ))
                            .await?;
                        affected += 1;
                    }

                    Ok(PageResult {
                        len: records.len(),
                        affected,
                        last: records.last().map(|record| record.id),
                    })
                })
                .await?;

            summary.pages.push(page.len);
            summary.queued += page.affected;
            if page.len < page_size {
                break;
            }
        }

        if summary.queued == 0 {
            ctx.run("check-run-completion", move || async move {
                check_run_completion(repo, run_id).await
            })
            .await?;
        }

        info!(run_id = %run_id, pages = summary.pages.len(), queued = summary.queued, "run fanned out");
        Ok(summary)
    }
}

/// `cancel-run`: cancels every open record of a run, then the run.
#[derive(Debug)]
pub struct CancelRunWorkflow {
    deps: WorkflowDeps,
}

impl CancelRunWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for CancelRunWorkflow {
    type Input = RunRef;
    type Output = SweepSummary;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::CancelRun
    }

    fn trigger(&self) -> EventName {
        EventName::RunCancelled
    }

    fn accept(&self, event: &DomainEvent) -> Option<RunRef> {
        match event {
            DomainEvent::RunCancelled(data) => Some(data.clone()),
            _ => None,
        }
    }

    async fn run(&self, ctx: &StepContext, input: RunRef) -> Result<SweepSummary> {
        let deps = &self.deps;
        let repo = deps.repo.as_ref();
        let events = deps.events.as_ref();
        let run_id = input.run_id;
        let page_size = deps.page_size.max(1);
        let scope = format!("{}/cancel", ctx.execution_id());
        let scope = scope.as_str();

        let mut summary = SweepSummary::default();
        let mut after = None;

        loop {
            let page = ctx
                .run("cancel-page", move || async move {
                    let records = repo
                        .page_records(&RecordQuery::keyset(
                            run_id,
                            StatusFilter::NonTerminal,
                            after,
                            page_size,
                        ))
                        .await?;

                    for record in &records {
                        events
                            .publish_envelope(EventEnvelope::with_id(
                                EventId::derived(scope, record.id.as_uuid()),
                                DomainEvent::RecordCancelled(RecordRef {
                                    run_record_id: record.id,
                                }),
                            ))
                            .await?;
                        repo.update_record(
                            record.id,
                            &RecordPatch::status(RunRecordStatus::Cancelled)
                                .guarded(Guard::NotTerminal),
                        )
                        .await?;
                    }

                    Ok(PageResult {
                        len: records.len(),
                        affected: records.len(),
                        last: records.last().map(|record| record.id),
                    })
                })
                .await?;

            summary.pages += 1;
            summary.records += page.affected;
            after = page.last;
            if page.len < page_size {
                break;
            }
        }

        ctx.run("mark-run-cancelled", move || async move {
            repo.set_run_status(run_id, RunStatus::Cancelled).await
        })
        .await?;

        info!(run_id = %run_id, records = summary.records, "run cancelled");
        Ok(summary)
    }
}

/// `retrigger-stuck-records`: aborts and re-queues every record of a run
/// that has not completed, moving the run back to `processing`. Re-queued
/// records keep the run's `ignore_cache` flag.
#[derive(Debug)]
pub struct RetriggerStuckWorkflow {
    deps: WorkflowDeps,
}

impl RetriggerStuckWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for RetriggerStuckWorkflow {
    type Input = RunRef;
    type Output = SweepSummary;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::RetriggerStuckRecords
    }

    fn trigger(&self) -> EventName {
        EventName::RunRetriggerStuck
    }

    fn accept(&self, event: &DomainEvent) -> Option<RunRef> {
        match event {
            DomainEvent::RunRetriggerStuck(data) => Some(data.clone()),
            _ => None,
        }
    }

    async fn run(&self, ctx: &StepContext, input: RunRef) -> Result<SweepSummary> {
        let deps = &self.deps;
        let repo = deps.repo.as_ref();
        let events = deps.events.as_ref();
        let run_id = input.run_id;
        let page_size = deps.page_size.max(1);

        let run = fetch_run(ctx, deps, run_id).await?;
        let ignore_cache = run.flags.ignore_cache;

        let mut summary = SweepSummary::default();
        let mut after = None;

        loop {
            let page = ctx
                .run("retrigger-page", move || async move {
                    let records = repo
                        .page_records(&RecordQuery::keyset(
                            run_id,
                            StatusFilter::NotEq(RunRecordStatus::Completed),
                            after,
                            page_size,
                        ))
                        .await?;

                    // Reopen the run before any record is re-queued so a fast
                    // record's completion check can close it again.
                    if !records.is_empty() {
                        repo.set_run_status(run_id, RunStatus::Processing).await?;
                    }

                    for record in &records {
                        events
                            .publish(DomainEvent::RecordCancelled(RecordRef {
                                run_record_id: record.id,
                            }))
                            .await?;
                        repo.update_record(record.id, &RecordPatch::reset_to_pending())
                            .await?;

                        let event_id = EventId::new();
                        repo.update_record(
                            record.id,
                            &RecordPatch::status(RunRecordStatus::Processing)
                                .with_correlation_id(Some(event_id.as_uuid())),
                        )
                        .await?;
                        events
                            .publish_envelope(EventEnvelope::with_id(
                                event_id,
                                DomainEvent::RecordQueued(RecordQueued {
                                    run_record_id: record.id,
                                    ignore_cache,
                                }),
                            ))
                            .await?;
                    }

                    Ok(PageResult {
                        len: records.len(),
                        affected: records.len(),
                        last: records.last().map(|record| record.id),
                    })
                })
                .await?;

            summary.pages += 1;
            summary.records += page.affected;
            after = page.last;
            if page.len < page_size {
                break;
            }
        }

        info!(run_id = %run_id, records = summary.records, "stuck records retriggered");
        Ok(summary)
    }
}
