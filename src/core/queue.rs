//! In-process task queue: a bounded channel feeding a fixed pool of workers.
//!
//! Every submitted request gets a task id whose state can be polled until it
//! is evicted from the result table.

use crate::config::QueueConfig;
use crate::core::{ProcessingRequest, Processor};
use crate::utils::error::{ProcessorError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_id: Uuid,
    pub task_status: TaskState,
    pub task_result: Option<serde_json::Value>,
    pub spectrum_id: i64,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub started: usize,
    pub retry: usize,
    pub success: usize,
    pub failure: usize,
    pub workers: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct Job {
    task_id: Uuid,
    request: ProcessingRequest,
}

#[derive(Debug, Default)]
struct TaskTable {
    records: HashMap<Uuid, TaskInfo>,
    finished: VecDeque<Uuid>,
}

impl TaskTable {
    fn update(&mut self, task_id: Uuid, apply: impl FnOnce(&mut TaskInfo)) {
        if let Some(info) = self.records.get_mut(&task_id) {
            apply(info);
        }
    }

    fn finish(&mut self, task_id: Uuid, retention: usize) {
        self.finished.push_back(task_id);
        while self.finished.len() > retention {
            if let Some(evicted) = self.finished.pop_front() {
                self.records.remove(&evicted);
            }
        }
    }
}

struct Shared {
    tasks: RwLock<TaskTable>,
    config: QueueConfig,
}

/// Cloneable handle to the queue; all clones share the same workers and results.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
    sender: Arc<StdMutex<Option<mpsc::Sender<Job>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskQueue {
    /// Spawns `config.workers` workers on the current runtime.
    pub fn start(processor: Arc<dyn Processor>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared {
            tasks: RwLock::new(TaskTable::default()),
            config,
        });

        let handles = (0..shared.config.workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let shared = shared.clone();
                let processor = processor.clone();
                tokio::spawn(async move {
                    tracing::debug!("Worker {} started", worker);
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        match job {
                            Some(job) => run_job(&shared, processor.as_ref(), job).await,
                            None => break,
                        }
                    }
                    tracing::debug!("Worker {} stopped", worker);
                })
            })
            .collect();

        tracing::info!(
            "🧵 Task queue started with {} workers (capacity {})",
            shared.config.workers.max(1),
            shared.config.capacity.max(1)
        );

        Self {
            shared,
            sender: Arc::new(StdMutex::new(Some(sender))),
            workers: Arc::new(Mutex::new(handles)),
        }
    }

    /// Enqueues a request and returns its task id without waiting for a worker.
    pub async fn submit(&self, request: ProcessingRequest) -> Result<Uuid> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| queue_error("queue lock poisoned"))?
            .clone()
            .ok_or_else(|| queue_error("queue is shut down"))?;

        let task_id = Uuid::new_v4();
        self.shared.tasks.write().await.records.insert(
            task_id,
            TaskInfo {
                task_id,
                task_status: TaskState::Pending,
                task_result: None,
                spectrum_id: request.spectrum_id,
                attempts: 0,
                submitted_at: Utc::now(),
                finished_at: None,
            },
        );

        let spectrum_id = request.spectrum_id;
        if let Err(e) = sender.try_send(Job { task_id, request }) {
            self.shared.tasks.write().await.records.remove(&task_id);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => queue_error("queue is full"),
                mpsc::error::TrySendError::Closed(_) => queue_error("queue is shut down"),
            });
        }

        tracing::info!("📥 Queued task {} for spectrum {}", task_id, spectrum_id);
        Ok(task_id)
    }

    pub async fn info(&self, task_id: &Uuid) -> Option<TaskInfo> {
        self.shared.tasks.read().await.records.get(task_id).cloned()
    }

    pub async fn stats(&self) -> QueueStats {
        let tasks = self.shared.tasks.read().await;
        let mut stats = QueueStats {
            workers: self.shared.config.workers.max(1),
            capacity: self.shared.config.capacity.max(1),
            ..QueueStats::default()
        };
        for info in tasks.records.values() {
            match info.task_status {
                TaskState::Pending => stats.pending += 1,
                TaskState::Started => stats.started += 1,
                TaskState::Retry => stats.retry += 1,
                TaskState::Success => stats.success += 1,
                TaskState::Failure => stats.failure += 1,
            }
        }
        stats
    }

    /// Stops accepting work and waits for the workers to drain the queue.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Worker ended abnormally: {}", e);
            }
        }
        tracing::info!("🛑 Task queue stopped");
    }
}

fn queue_error(message: &str) -> ProcessorError {
    ProcessorError::QueueError {
        message: message.to_string(),
    }
}

async fn run_job(shared: &Shared, processor: &dyn Processor, job: Job) {
    let Job { task_id, request } = job;
    let retention = shared.config.result_retention.max(1);

    let mut attempt: u32 = 0;
    loop {
        shared.tasks.write().await.update(task_id, |info| {
            info.task_status = TaskState::Started;
            info.attempts = attempt + 1;
        });

        match processor.process(&request).await {
            Ok(message) => {
                let result = serde_json::to_value(&message).ok();
                let mut tasks = shared.tasks.write().await;
                tasks.update(task_id, |info| {
                    info.task_status = TaskState::Success;
                    info.task_result = result;
                    info.finished_at = Some(Utc::now());
                });
                tasks.finish(task_id, retention);
                return;
            }
            Err(e) if attempt < shared.config.max_retries => {
                let delay = shared
                    .config
                    .retry_delay_ms
                    .saturating_mul(1u64 << attempt.min(16));
                tracing::warn!(
                    "🔁 Task {} failed ({}), retrying in {} ms",
                    task_id,
                    e,
                    delay
                );
                shared.tasks.write().await.update(task_id, |info| {
                    info.task_status = TaskState::Retry;
                    info.task_result = Some(serde_json::json!({ "error": e.to_string() }));
                });
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("❌ Task {} failed: {}", task_id, e);
                let mut tasks = shared.tasks.write().await;
                tasks.update(task_id, |info| {
                    info.task_status = TaskState::Failure;
                    info.task_result = Some(serde_json::json!({ "error": e.to_string() }));
                    info.finished_at = Some(Utc::now());
                });
                tasks.finish(task_id, retention);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ProcessingMessage;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls with a retryable error.
    struct FlakyProcessor {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Processor for FlakyProcessor {
        async fn process(&self, request: &ProcessingRequest) -> Result<ProcessingMessage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProcessorError::HsdbResponseError {
                    status: 503,
                    endpoint: "/api/v1/spectra".to_string(),
                    body: String::new(),
                });
            }
            Ok(ProcessingMessage::done(format!(
                "Done processing for spectrum with id {}",
                request.spectrum_id
            )))
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyProcessor> {
        Arc::new(FlakyProcessor {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    fn config(max_retries: u32) -> QueueConfig {
        QueueConfig {
            workers: 2,
            capacity: 8,
            max_retries,
            retry_delay_ms: 1,
            result_retention: 100,
        }
    }

    async fn wait_finished(queue: &TaskQueue, task_id: &Uuid) -> TaskInfo {
        for _ in 0..200 {
            if let Some(info) = queue.info(task_id).await {
                if info.task_status.is_finished() {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", task_id);
    }

    #[tokio::test]
    async fn test_task_succeeds() {
        let queue = TaskQueue::start(flaky(0), config(0));
        let task_id = queue.submit(ProcessingRequest::new(1)).await.unwrap();

        let info = wait_finished(&queue, &task_id).await;
        assert_eq!(info.task_status, TaskState::Success);
        assert_eq!(info.attempts, 1);
        assert_eq!(
            info.task_result.unwrap()["message"],
            "Done processing for spectrum with id 1"
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let processor = flaky(2);
        let queue = TaskQueue::start(processor.clone(), config(3));
        let task_id = queue.submit(ProcessingRequest::new(1)).await.unwrap();

        let info = wait_finished(&queue, &task_id).await;
        assert_eq!(info.task_status, TaskState::Success);
        assert_eq!(info.attempts, 3);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_without_retries() {
        let queue = TaskQueue::start(flaky(1), config(0));
        let task_id = queue.submit(ProcessingRequest::new(1)).await.unwrap();

        let info = wait_finished(&queue, &task_id).await;
        assert_eq!(info.task_status, TaskState::Failure);
        assert!(info.task_result.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("503"));
        assert_eq!(queue.stats().await.failure, 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_results_are_evicted() {
        let queue = TaskQueue::start(
            flaky(0),
            QueueConfig {
                result_retention: 1,
                ..config(0)
            },
        );
        let first = queue.submit(ProcessingRequest::new(1)).await.unwrap();
        wait_finished(&queue, &first).await;
        let second = queue.submit(ProcessingRequest::new(2)).await.unwrap();
        wait_finished(&queue, &second).await;

        assert!(queue.info(&first).await.is_none());
        assert!(queue.info(&second).await.is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let queue = TaskQueue::start(flaky(0), config(0));
        queue.shutdown().await;

        let result = queue.submit(ProcessingRequest::new(1)).await;
        assert!(matches!(result, Err(ProcessorError::QueueError { .. })));
        assert!(queue.stats().await.pending == 0);
    }
}
