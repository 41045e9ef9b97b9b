//! Process-wide access to one running system, without a global.
//!
//! A host keeps a [`RunnerContext`] (typically inside its own app state)
//! and calls [`init`](RunnerContext::init) once at startup. Request
//! handlers call [`get`](RunnerContext::get). Every transition happens
//! under a single async mutex, so concurrent
//! [`get_or_init`](RunnerContext::get_or_init) callers all receive the same
//! runner.

use std::io;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::live::RunnerHandle;
use crate::runner::{SystemBuilder, SystemRunner};
use crate::topology::TopologyError;

/// Error returned by [`RunnerContext`] lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("system runner already initialized")]
    AlreadyInitialized,

    #[error("system runner not initialized")]
    NotInitialized,

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

#[derive(Debug)]
struct Running {
    runner: Arc<SystemRunner>,
    handle: RunnerHandle,
}

/// Owner of at most one running [`SystemRunner`] and its service loop.
#[derive(Debug, Default)]
pub struct RunnerContext {
    running: Mutex<Option<Running>>,
}

impl RunnerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the system and start its background service loop.
    ///
    /// # Errors
    ///
    /// - [`ContextError::AlreadyInitialized`] if a runner is already open.
    /// - [`ContextError::Topology`] if the builder's topology is invalid.
    pub async fn init(&self, builder: SystemBuilder) -> Result<Arc<SystemRunner>, ContextError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ContextError::AlreadyInitialized);
        }
        Ok(Self::open(&mut running, builder)?)
    }

    /// The running system.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NotInitialized`] before `init` or after
    /// `close`.
    pub async fn get(&self) -> Result<Arc<SystemRunner>, ContextError> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.runner))
            .ok_or(ContextError::NotInitialized)
    }

    /// The running system, initializing it from `make` if needed.
    ///
    /// `make` is only called by the first caller to find the context empty.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Topology`] if the built topology is invalid.
    pub async fn get_or_init<F>(&self, make: F) -> Result<Arc<SystemRunner>, ContextError>
    where
        F: FnOnce() -> SystemBuilder,
    {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_ref() {
            return Ok(Arc::clone(&r.runner));
        }
        Ok(Self::open(&mut running, make())?)
    }

    /// Stop the service loop and forget the runner.
    ///
    /// Closing an empty context is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the service loop task panicked.
    pub async fn close(&self) -> io::Result<()> {
        let Some(closing) = self.running.lock().await.take() else {
            return Ok(());
        };
        closing.handle.shutdown().await?;
        tracing::info!("system runner closed");
        Ok(())
    }

    /// Whether a runner is currently open.
    pub async fn is_initialized(&self) -> bool {
        self.running.lock().await.is_some()
    }

    fn open(
        slot: &mut Option<Running>,
        builder: SystemBuilder,
    ) -> Result<Arc<SystemRunner>, TopologyError> {
        let runner = Arc::new(builder.build()?);
        let handle = runner.start();
        *slot = Some(Running {
            runner: Arc::clone(&runner),
            handle,
        });
        tracing::info!("system runner initialized");
        Ok(runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_system;

    #[tokio::test]
    async fn get_before_init_fails() {
        let context = RunnerContext::new();
        assert!(matches!(
            context.get().await,
            Err(ContextError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn init_twice_fails() {
        let context = RunnerContext::new();
        context.init(order_system()).await.expect("first init");
        assert!(matches!(
            context.init(order_system()).await,
            Err(ContextError::AlreadyInitialized)
        ));
        context.close().await.expect("close");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_allows_reinit() {
        let context = RunnerContext::new();
        let first = context.init(order_system()).await.expect("init");
        context.close().await.expect("close");
        context.close().await.expect("close again");
        assert!(!context.is_initialized().await);
        assert!(matches!(
            context.get().await,
            Err(ContextError::NotInitialized)
        ));

        let second = context.init(order_system()).await.expect("re-init");
        assert!(!Arc::ptr_eq(&first, &second));
        context.close().await.expect("close");
    }

    #[tokio::test]
    async fn invalid_topology_leaves_context_empty() {
        let context = RunnerContext::new();
        let err = context
            .init(SystemBuilder::new().pipe(&["commands", "orders"]))
            .await
            .expect_err("no stages registered");
        assert!(matches!(err, ContextError::Topology(_)));
        assert!(!context.is_initialized().await);
    }

    #[tokio::test]
    async fn concurrent_get_or_init_share_one_runner() {
        let context = Arc::new(RunnerContext::new());
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let context = Arc::clone(&context);
            tasks.push(tokio::spawn(async move {
                context.get_or_init(order_system).await.expect("get_or_init")
            }));
        }

        let mut runners = Vec::new();
        for task in tasks {
            runners.push(task.await.expect("task should not panic"));
        }
        let first = &runners[0];
        assert!(runners.iter().all(|r| Arc::ptr_eq(r, first)));
        context.close().await.expect("close");
    }
}
