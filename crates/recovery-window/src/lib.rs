//! Recovery-window manager (C7): dampens autopilot scaling decisions while the runtime is
//! mid-rebalance, and for a grace period after it settles back into `Running`, so a scaling
//! decision never compounds with a reassignment that is already in flight.

use std::sync::Mutex;
use std::time::Duration;

use streams_runtime_facade::{RuntimeState, RuntimeStateWatch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Inner {
    current: RuntimeState,
    last_running_at: Option<Instant>,
}

/// Tracks runtime lifecycle state via a background task that drains the watch channel, so
/// `is_open` never blocks on the channel itself.
pub struct RecoveryWindow {
    inner: std::sync::Arc<Mutex<Inner>>,
    grace: Duration,
    task: JoinHandle<()>,
}

impl RecoveryWindow {
    /// Spawns the draining task against `source`'s state-change channel. `grace` defaults to the
    /// autopilot's evaluation period (`between_runs`) per the design notes, but is taken as a
    /// parameter here so callers can choose independently.
    pub fn spawn(source: &(dyn RuntimeStateWatch), grace: Duration) -> Self {
        let mut rx = source.subscribe();
        let initial = *rx.borrow();
        let last_running_at = (initial == RuntimeState::Running).then(Instant::now);
        let inner = std::sync::Arc::new(Mutex::new(Inner {
            current: initial,
            last_running_at,
        }));

        let task_inner = inner.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow();
                let mut guard = task_inner.lock().unwrap();
                if state == RuntimeState::Running && guard.current != RuntimeState::Running {
                    guard.last_running_at = Some(Instant::now());
                }
                guard.current = state;
            }
            tracing::debug!("runtime state watch channel closed; recovery window is now static");
        });

        Self { inner, grace, task }
    }

    /// True while the runtime is not `Running`, or within the grace interval after it last
    /// re-entered `Running`.
    pub fn is_open(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        if guard.current != RuntimeState::Running {
            return true;
        }
        match guard.last_running_at {
            Some(at) => Instant::now().duration_since(at) < self.grace,
            None => false,
        }
    }
}

impl Drop for RecoveryWindow {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use streams_common::HostInfo;
    use streams_runtime_facade::fake::FakeRuntime;

    #[tokio::test(start_paused = true)]
    async fn open_while_not_running_and_for_grace_period_after() {
        let runtime = FakeRuntime::new(HostInfo::new("localhost", 9099));
        let window = RecoveryWindow::spawn(&runtime, Duration::from_millis(50));
        assert!(!window.is_open());

        runtime.set_state(RuntimeState::Rebalancing);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(window.is_open());

        runtime.set_state(RuntimeState::Running);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(window.is_open(), "grace period should still be open");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!window.is_open(), "grace period should have elapsed");
    }

    #[tokio::test]
    async fn drop_aborts_the_draining_task() {
        let runtime = FakeRuntime::new(HostInfo::new("localhost", 9099));
        let window = RecoveryWindow::spawn(&runtime, Duration::from_millis(50));
        drop(window);
        // Nothing observable from the outside once dropped; this just confirms drop doesn't
        // panic and the task handle is genuinely owned (no leaked unawaited join error).
        let _silence_unused = AtomicUsize::new(0);
    }
}
