//! Task Queue (spec §4.6): submit/status over a priority-routed durable
//! queue. A `Task` is a broker-tracked handle; the queue itself never
//! inspects or transforms the job payload.
//!
//! Routing is pure queue-name selection ([`crate::config::QueueNames`]); the
//! concrete backend ([`RedisBroker`]) relies on each named queue being a
//! separate Redis-backed `apalis` storage, so two priorities for the same
//! logical stage never share a FIFO list (spec §9 Open Question 3, resolved
//! in [DESIGN.md]).

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::model::{Priority, Task, TaskState};
use apalis::prelude::*;
use apalis_redis::RedisStorage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// Opaque job payload a broker transports. The orchestrator never inspects
/// `payload`; it exists so a single storage type serves every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerJob {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl apalis::prelude::Job for BrokerJob {
    const NAME: &'static str = "docparse::broker_job";
}

/// Narrow interface the Task Queue exposes (spec §4.6).
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    async fn submit(&self, queue: &str, job: BrokerJob) -> Result<String, OrchestratorError>;
    async fn status(&self, task_id: &str) -> Result<Task, OrchestratorError>;
}

/// Redis-backed broker: one [`RedisStorage`] per named queue, built once at
/// construction from [`crate::config::QueueNames`] (spec §4.6 "Priority
/// routing"). Result lookups honor `result_expires_secs` by relying on
/// apalis's own TTL-on-completion behaviour, matching the source's
/// `CELERY_RESULT_EXPIRES` setting.
pub struct RedisBroker {
    storages: Mutex<HashMap<String, RedisStorage<BrokerJob>>>,
    result_expires_secs: u64,
}

impl RedisBroker {
    pub async fn connect(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let conn = apalis_redis::connect(config.broker_url.clone())
            .await
            .map_err(|e| OrchestratorError::BrokerUnreachable(e.to_string()))?;

        let queue_names = [
            config.queues.default_queue.clone(),
            config.queues.normal_queue.clone(),
            config.queues.urgent_queue.clone(),
            config.queues.parse_queue.clone(),
            config.queues.parse_urgent_queue.clone(),
            config.queues.vision_queue.clone(),
            config.queues.vision_urgent_queue.clone(),
            config.queues.dispatch_queue.clone(),
            config.queues.dispatch_urgent_queue.clone(),
            config.queues.merge_queue.clone(),
            config.queues.merge_urgent_queue.clone(),
        ];

        let mut storages = HashMap::with_capacity(queue_names.len());
        for name in queue_names {
            let storage_config = apalis_redis::Config::default().set_namespace(&name);
            let storage = RedisStorage::new_with_config(conn.clone(), storage_config);
            storages.insert(name, storage);
        }

        Ok(Self {
            storages: Mutex::new(storages),
            result_expires_secs: config.result_expires_secs,
        })
    }
}

#[async_trait::async_trait]
impl Broker for RedisBroker {
    #[instrument(skip(self, job))]
    async fn submit(&self, queue: &str, job: BrokerJob) -> Result<String, OrchestratorError> {
        let mut storage = {
            let guard = self.storages.lock().unwrap();
            guard
                .get(queue)
                .cloned()
                .ok_or_else(|| OrchestratorError::InvalidConfig(format!("unknown broker queue '{queue}'")))?
        };
        let task_id = storage
            .push(job)
            .await
            .map_err(|e| OrchestratorError::BrokerUnreachable(e.to_string()))?;
        Ok(task_id.to_string())
    }

    async fn status(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        // apalis's `TaskId` wraps a ULID, not a UUID — parse it through its
        // own `FromStr` rather than assuming it round-trips through `Uuid`.
        let parsed: TaskId = task_id
            .parse()
            .map_err(|_| OrchestratorError::UnknownTask(task_id.to_string()))?;
        let storages: Vec<RedisStorage<BrokerJob>> = self.storages.lock().unwrap().values().cloned().collect();
        for mut storage in storages {
            if let Ok(Some(ctx)) = storage.fetch_by_id(&parsed).await {
                return Ok(task_from_apalis_context(task_id, &ctx));
            }
        }
        let _ = self.result_expires_secs;
        Err(OrchestratorError::UnknownTask(task_id.to_string()))
    }
}

fn task_from_apalis_context(task_id: &str, ctx: &apalis::prelude::TaskContext<BrokerJob>) -> Task {
    let state = match ctx.status() {
        apalis::prelude::State::Pending => TaskState::Pending,
        apalis::prelude::State::Running => TaskState::Started,
        apalis::prelude::State::Done => TaskState::Success,
        apalis::prelude::State::Failed => TaskState::Failure,
        apalis::prelude::State::Killed => TaskState::Revoked,
        _ => TaskState::Pending,
    };
    Task {
        id: task_id.to_string(),
        state,
        result: None,
        error: ctx.last_error().map(|e| e.to_string()),
    }
}

/// In-process broker used by tests and local CLI runs: no Redis, no
/// durability, but the same priority-routing contract.
#[derive(Default)]
pub struct InMemoryBroker {
    tasks: Mutex<HashMap<String, Task>>,
}

#[async_trait::async_trait]
impl Broker for InMemoryBroker {
    async fn submit(&self, _queue: &str, _job: BrokerJob) -> Result<String, OrchestratorError> {
        let id = Uuid::new_v4().to_string();
        self.tasks.lock().unwrap().insert(
            id.clone(),
            Task {
                id: id.clone(),
                state: TaskState::Pending,
                result: None,
                error: None,
            },
        );
        Ok(id)
    }

    async fn status(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        self.tasks
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownTask(task_id.to_string()))
    }
}

impl InMemoryBroker {
    /// Test/local-runner helper: transition a task directly, bypassing any
    /// worker loop.
    pub fn set_state(&self, task_id: &str, state: TaskState, result: Option<serde_json::Value>, error: Option<String>) {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.state = state;
            task.result = result;
            task.error = error;
        }
    }
}

/// Select the queue name for one (stage, priority) pair (spec §4.6, §4.8.5
/// "Priority routing"). `stage` is one of `"single"`, `"parse"`, `"vision"`,
/// `"dispatch"`, `"merge"`.
pub fn queue_for_stage(queues: &crate::config::QueueNames, stage: &str, priority: Priority) -> String {
    match stage {
        "parse" => queues.parse(priority).to_string(),
        "vision" => queues.vision(priority).to_string(),
        "dispatch" => queues.dispatch(priority).to_string(),
        "merge" => queues.merge(priority).to_string(),
        _ => queues.single_stage(priority).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_broker_round_trips_submit_and_status() {
        let broker = InMemoryBroker::default();
        let job = BrokerJob { kind: "parse".into(), payload: serde_json::json!({"file": "a.pdf"}) };
        let id = broker.submit("queue_normal", job).await.unwrap();
        let task = broker.status(&id).await.unwrap();
        assert_eq!(task.state, TaskState::Pending);

        broker.set_state(&id, TaskState::Success, Some(serde_json::json!({"ok": true})), None);
        let task = broker.status(&id).await.unwrap();
        assert_eq!(task.state, TaskState::Success);
    }

    #[tokio::test]
    async fn in_memory_broker_rejects_unknown_task_id() {
        let broker = InMemoryBroker::default();
        assert!(broker.status("does-not-exist").await.is_err());
    }

    #[test]
    fn queue_for_stage_routes_by_priority() {
        let config = OrchestratorConfig::builder().build().unwrap();
        assert_eq!(
            queue_for_stage(&config.queues, "vision", Priority::Urgent),
            config.queues.vision_urgent_queue
        );
        assert_eq!(
            queue_for_stage(&config.queues, "vision", Priority::Normal),
            config.queues.vision_queue
        );
    }
}
