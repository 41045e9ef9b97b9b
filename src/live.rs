//! Background service loop for a [`SystemRunner`].
//!
//! [`SystemRunner::start`] spawns a tokio task that runs service passes
//! while any stage makes progress, then sleeps until a command submission
//! wakes it or the poll interval elapses. [`RunnerHandle`] stops it.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::runner::SystemRunner;

/// Handle for controlling the background service loop.
///
/// Dropping the handle does **not** stop the loop -- call
/// [`shutdown`](RunnerHandle::shutdown) for graceful termination.
///
/// `Clone` is cheap: all fields are `Arc`-wrapped.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    /// Sends `true` to signal the loop to stop.
    pub(crate) shutdown_tx: watch::Sender<bool>,
    /// Set when the last service pass moved no cursor.
    pub(crate) quiescent: Arc<AtomicBool>,
    /// The spawned background task, taken and awaited exactly once by
    /// [`shutdown`](RunnerHandle::shutdown).
    pub(crate) task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl RunnerHandle {
    /// Returns `true` if the most recent service pass found nothing to do.
    pub fn is_quiescent(&self) -> bool {
        self.quiescent.load(Ordering::Acquire)
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// A pass in flight is abandoned between commits; cursors only move in
    /// committed transactions, so nothing is lost. Calling `shutdown` more
    /// than once is safe -- subsequent calls return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the loop task panicked.
    pub async fn shutdown(&self) -> io::Result<()> {
        // The receiver may already be gone if the task has exited.
        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().await.take();
        match task {
            Some(join_handle) => join_handle
                .await
                .map_err(|e| io::Error::other(format!("service loop task panicked: {e}"))),
            None => Ok(()),
        }
    }
}

impl SystemRunner {
    /// Spawn the background service loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> RunnerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let quiescent = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_service_loop(
            Arc::clone(self),
            Arc::clone(&quiescent),
            shutdown_rx,
        ));
        RunnerHandle {
            shutdown_tx,
            quiescent,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
        }
    }
}

async fn run_service_loop(
    runner: Arc<SystemRunner>,
    quiescent: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let poll_interval = runner.config().poll_interval;
    tracing::info!(
        stages = runner.topology().stages().len(),
        "service loop: started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let report = tokio::select! {
            report = runner.run_once() => report,
            () = shutdown_requested(&mut shutdown_rx) => break,
        };

        for failure in &report.failures {
            tracing::warn!(error = %failure, "service loop: step failed, will retry next pass");
        }

        if report.progressed() {
            quiescent.store(false, Ordering::Release);
            continue;
        }
        quiescent.store(true, Ordering::Release);

        tokio::select! {
            _ = runner.wake.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
            () = shutdown_requested(&mut shutdown_rx) => break,
        }
    }

    tracing::info!("service loop: stopped");
}

/// Resolves once `true` is sent. Never resolves if every handle was
/// dropped without calling `shutdown`; the loop then runs until the
/// runtime stops.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let closed = shutdown_rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::aggregate::test_fixtures::{Counter, CounterCommand, CounterEvent};
    use crate::config::RunnerConfig;
    use crate::error::PolicyError;
    use crate::policy::test_fixtures::Mirror;
    use crate::policy::{Inbound, Policy, Reaction, Repository};

    struct Counters;

    impl Policy for Counters {
        const NAME: &'static str = "counters";
        type Event = CounterEvent;

        fn react(
            &self,
            _repository: &Repository,
            _inbound: &Inbound<CounterEvent>,
        ) -> Result<Option<Reaction>, PolicyError> {
            Ok(None)
        }
    }

    fn runner() -> Arc<SystemRunner> {
        Arc::new(
            SystemRunner::builder()
                .stage(Counters)
                .stage(Mirror)
                .pipe(&["counters", "mirror"])
                .config(RunnerConfig {
                    poll_interval: Duration::from_millis(5),
                    ..RunnerConfig::default()
                })
                .build()
                .expect("valid topology"),
        )
    }

    async fn wait_for_mirror(runner: &SystemRunner, expected: u64) {
        for _ in 0..200 {
            if runner.recorder().next_position("mirror").expect("next") >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("mirror never reached {expected} notifications");
    }

    #[tokio::test]
    async fn background_loop_processes_submissions() {
        let runner = runner();
        let handle = runner.start();

        runner
            .create::<Counter>("counters", CounterCommand::Increment)
            .await
            .expect("create");
        wait_for_mirror(&runner, 1).await;

        runner
            .create::<Counter>("counters", CounterCommand::Increment)
            .await
            .expect("create");
        wait_for_mirror(&runner, 2).await;

        handle.shutdown().await.expect("shutdown should succeed");
    }

    #[tokio::test]
    async fn dropped_handle_keeps_loop_running() {
        let runner = runner();
        drop(runner.start());

        runner
            .create::<Counter>("counters", CounterCommand::Increment)
            .await
            .expect("create");
        wait_for_mirror(&runner, 1).await;

        // Later submissions are still picked up.
        runner
            .create::<Counter>("counters", CounterCommand::Increment)
            .await
            .expect("create");
        wait_for_mirror(&runner, 2).await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let runner = runner();
        let handle = runner.start();
        handle.shutdown().await.expect("first shutdown");
        handle.shutdown().await.expect("second shutdown");
    }

    #[tokio::test]
    async fn idle_loop_reports_quiescent() {
        let runner = runner();
        let handle = runner.start();
        for _ in 0..200 {
            if handle.is_quiescent() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.is_quiescent());
        handle.shutdown().await.expect("shutdown");
    }
}
