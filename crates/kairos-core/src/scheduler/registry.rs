//! Task registry
//!
//! Binds task-type names to the job bodies supplied by the application.
//! Owned by a scheduler instance; nothing here is persisted.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// A zero-argument, fallible job body
pub type TaskBody = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Registry mapping task types to job bodies
#[derive(Default)]
pub struct TaskRegistry {
    bodies: DashMap<String, TaskBody>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async body. Replaces any previous binding for the type.
    pub fn register<F, Fut>(&self, task_type: impl Into<String>, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: TaskBody = Arc::new(move || body().boxed());
        self.insert(task_type.into(), body);
    }

    /// Register a synchronous body. It runs on the blocking thread pool so a
    /// slow body never stalls the async workers.
    pub fn register_blocking<F>(&self, task_type: impl Into<String>, body: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let wrapped: TaskBody = Arc::new(move || {
            let body = Arc::clone(&body);
            async move {
                match tokio::task::spawn_blocking(move || body()).await {
                    Ok(result) => result,
                    Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                    Err(join) => Err(anyhow::anyhow!("blocking body aborted: {join}")),
                }
            }
            .boxed()
        });
        self.insert(task_type.into(), wrapped);
    }

    fn insert(&self, task_type: String, body: TaskBody) {
        if self.bodies.insert(task_type.clone(), body).is_some() {
            info!(task_type = %task_type, "Replaced task function");
        } else {
            info!(task_type = %task_type, "Registered task function");
        }
    }

    /// Look up the body bound to a task type
    pub fn get(&self, task_type: &str) -> Option<TaskBody> {
        self.bodies.get(task_type).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a body is bound to the task type
    pub fn contains(&self, task_type: &str) -> bool {
        self.bodies.contains_key(task_type)
    }

    /// Registered task types, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.bodies.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}
