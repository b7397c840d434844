use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{LeadError, Result};

use super::{config::EngineConfig, workflow::WorkflowKind};

/// Per-kind concurrency ceilings. Waiters are served in arrival order
/// because `tokio::sync::Semaphore` is fair.
#[derive(Clone, Default)]
pub struct ConcurrencyGates {
    gates: HashMap<WorkflowKind, (usize, Arc<Semaphore>)>,
}

impl fmt::Debug for ConcurrencyGates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, (limit, semaphore)) in &self.gates {
            map.entry(
                &kind.as_str(),
                &format!("{}/{}", limit - semaphore.available_permits(), limit),
            );
        }
        map.finish()
    }
}

/// Slot held for the lifetime of an execution; `None` for unbounded kinds.
#[derive(Debug)]
pub struct GatePermit(#[allow(dead_code)] Option<OwnedSemaphorePermit>);

impl ConcurrencyGates {
    pub fn from_config(config: &EngineConfig) -> Self {
        let gates = WorkflowKind::ALL
            .into_iter()
            .filter_map(|kind| {
                config.limits(kind).concurrency.map(|limit| {
                    let limit = limit.max(1);
                    (kind, (limit, Arc::new(Semaphore::new(limit))))
                })
            })
            .collect();
        Self { gates }
    }

    pub async fn acquire(&self, kind: WorkflowKind) -> Result<GatePermit> {
        let Some((_, semaphore)) = self.gates.get(&kind) else {
            return Ok(GatePermit(None));
        };
        let permit = Arc::clone(semaphore).acquire_owned().await.map_err(|_| {
            LeadError::Internal(format!("concurrency gate for {kind} closed"))
        })?;
        Ok(GatePermit(Some(permit)))
    }

    /// `(in use, limit)` for a bounded kind.
    pub fn utilization(&self, kind: WorkflowKind) -> Option<(usize, usize)> {
        self.gates.get(&kind).map(|(limit, semaphore)| {
            (limit - semaphore.available_permits(), *limit)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waits_for_a_free_slot_in_arrival_order() {
        let mut config = EngineConfig::default();
        config.record.concurrency = Some(1);
        let gates = ConcurrencyGates::from_config(&config);

        let first = gates
            .acquire(WorkflowKind::ProcessRunRecord)
            .await
            .expect("first");
        assert_eq!(
            gates.utilization(WorkflowKind::ProcessRunRecord),
            Some((1, 1))
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for n in 0..3 {
            let gates = gates.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = gates
                    .acquire(WorkflowKind::ProcessRunRecord)
                    .await
                    .expect("permit");
                tx.send(n).expect("send");
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(rx.try_recv().is_err());
        drop(first);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.expect("recv"));
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unbounded_kinds_never_wait() {
        let gates = ConcurrencyGates::from_config(&EngineConfig::default());
        assert!(gates.utilization(WorkflowKind::ValidateEmail).is_none());
        let _a = gates.acquire(WorkflowKind::ValidateEmail).await.expect("a");
        let _b = gates.acquire(WorkflowKind::ValidateEmail).await.expect("b");
    }
}
