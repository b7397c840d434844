use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{CorrelationKey, EventName};

use super::workflow::ExecutionId;

type Subscriptions = HashMap<(EventName, CorrelationKey), Vec<(ExecutionId, CancellationToken)>>;

/// Maps `(event, correlation key)` to the tokens of executions that asked to
/// be cancelled by it.
#[derive(Clone, Default, Debug)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<Subscriptions>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        event: EventName,
        key: CorrelationKey,
        execution: ExecutionId,
        token: CancellationToken,
    ) {
        let mut guard = self.inner.lock().await;
        guard.entry((event, key)).or_default().push((execution, token));
    }

    pub async fn deregister(
        &self,
        event: EventName,
        key: CorrelationKey,
        execution: &ExecutionId,
    ) {
        let mut guard = self.inner.lock().await;
        if let Some(entries) = guard.get_mut(&(event, key)) {
            entries.retain(|(id, _)| id != execution);
            if entries.is_empty() {
                guard.remove(&(event, key));
            }
        }
    }

    /// Cancels every execution registered for the pair and returns how many
    /// were signalled.
    pub async fn cancel(&self, event: EventName, key: CorrelationKey) -> usize {
        let guard = self.inner.lock().await;
        let Some(entries) = guard.get(&(event, key)) else {
            return 0;
        };
        for (execution, token) in entries {
            debug!(execution_id = %execution, event = %event, correlation = %key, "cancelling execution");
            token.cancel();
        }
        entries.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadcheck_model::RunRecordId;

    #[tokio::test]
    async fn only_matching_keys_are_cancelled() {
        let registry = CancellationRegistry::new();
        let mine = CorrelationKey::RunRecord(RunRecordId::new());
        let other = CorrelationKey::RunRecord(RunRecordId::new());
        let token = CancellationToken::new();
        let untouched = CancellationToken::new();

        registry
            .register(EventName::RecordCancelled, mine, "a".into(), token.clone())
            .await;
        registry
            .register(EventName::RecordCancelled, other, "b".into(), untouched.clone())
            .await;

        assert_eq!(registry.cancel(EventName::RecordCancelled, mine).await, 1);
        assert_eq!(registry.cancel(EventName::RecordQueued, other).await, 0);
        assert!(token.is_cancelled());
        assert!(!untouched.is_cancelled());

        registry
            .deregister(EventName::RecordCancelled, mine, &"a".into())
            .await;
        assert_eq!(registry.len().await, 1);
    }
}
