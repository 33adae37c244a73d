//! Autopilot state machine (C8): a lag-driven decision loop, serialized behind a fair write lock,
//! that elastically adds or removes stream threads within a configured ceiling while a
//! recovery-window manager dampens decisions during rebalances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use streams_common::config::keys;
use streams_common::{ConfigError, Properties};
use streams_recovery_window::RecoveryWindow;
use streams_runtime_facade::{RuntimeError, ThreadTopologyProvider};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AutopilotState {
    StandBy,
    Boosting,
    Boosted,
    Decreasing,
}

impl AutopilotState {
    pub fn can_transition_to(self, next: AutopilotState) -> bool {
        use AutopilotState::*;
        matches!(
            (self, next),
            (StandBy, Boosting)
                | (StandBy, Decreasing)
                | (StandBy, StandBy)
                | (Boosting, Boosted)
                | (Boosted, Decreasing)
                | (Boosted, StandBy)
                | (Boosted, Boosted)
                | (Decreasing, StandBy)
                | (Decreasing, Boosted)
                | (Decreasing, Decreasing)
        )
    }
}

#[derive(Debug, Error)]
pub enum AutopilotError {
    #[error("transition from {from:?} to {to:?} is not allowed")]
    InvalidTransition {
        from: AutopilotState,
        to: AutopilotState,
    },
    #[error("could not acquire the autopilot write lock within the configured timeout")]
    LockUnavailable,
    #[error("scheduled automation requires a recovery window")]
    SchedulingRequiresWindow,
    #[error("runtime rejected the requested thread change: {0}")]
    RuntimeRejected(#[from] RuntimeError),
}

/// Per-thread, per-partition lag, already filtered for exclusions and invalid offsets.
pub type ThreadInfo = HashMap<String, HashMap<String, i64>>;

#[derive(Clone, Debug)]
pub struct AutopilotConfig {
    pub desired_thread_count: usize,
    pub thread_limit: usize,
    pub lag_threshold: i64,
    pub exclusion_pattern: Option<Regex>,
    pub initial_delay: Duration,
    pub between_runs: Duration,
    pub generic_timeout: Duration,
}

impl AutopilotConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let desired_thread_count = props.get_usize_or(keys::NUM_STREAM_THREADS, 1)?;
        let thread_limit = props.get_usize_or(keys::AUTOPILOT_THREAD_LIMIT, 0)?;
        let lag_threshold = props.get_usize_or(keys::AUTOPILOT_LAG_THRESHOLD, 0)? as i64;
        let exclusion_pattern = props.get_regex(keys::AUTOPILOT_EXCLUSION_PATTERN)?;
        let initial_delay =
            props.get_duration_millis_or(keys::AUTOPILOT_INITIAL_DELAY_MS, Duration::from_secs(30))?;
        let between_runs =
            props.get_duration_millis_or(keys::AUTOPILOT_BETWEEN_RUNS_MS, Duration::from_secs(30))?;
        let max_poll_interval =
            props.get_duration_millis_or(keys::MAX_POLL_INTERVAL_MS, Duration::from_secs(300))?;
        let session_timeout =
            props.get_duration_millis_or(keys::SESSION_TIMEOUT_MS, Duration::from_secs(10))?;
        Ok(Self {
            desired_thread_count,
            thread_limit,
            lag_threshold,
            exclusion_pattern,
            initial_delay,
            between_runs,
            generic_timeout: max_poll_interval.max(session_timeout),
        })
    }
}

pub struct Autopilot {
    state: RwLock<AutopilotState>,
    config: AutopilotConfig,
    thread_topology: Arc<dyn ThreadTopologyProvider>,
    window: Option<RecoveryWindow>,
    schedule: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Autopilot {
    pub fn new(
        config: AutopilotConfig,
        thread_topology: Arc<dyn ThreadTopologyProvider>,
        window: Option<RecoveryWindow>,
    ) -> Self {
        Self {
            state: RwLock::new(AutopilotState::StandBy),
            config,
            thread_topology,
            window,
            schedule: AsyncMutex::new(None),
        }
    }

    pub async fn state(&self) -> AutopilotState {
        *self.state.read().await
    }

    fn is_excluded(&self, topic_partition: &str) -> bool {
        match &self.config.exclusion_pattern {
            Some(re) => re.is_match(topic_of(topic_partition)),
            None => false,
        }
    }

    fn collect_thread_info(&self) -> ThreadInfo {
        self.thread_topology
            .snapshot()
            .threads
            .into_iter()
            .map(|(thread, partitions)| {
                let lags = partitions
                    .into_iter()
                    .filter(|(topic_partition, _)| !self.is_excluded(topic_partition))
                    .filter_map(|(topic_partition, offsets)| {
                        if offsets.end_offset <= 0 || offsets.committed_offset <= 0 {
                            return None;
                        }
                        let lag = (offsets.end_offset - offsets.committed_offset).max(0);
                        Some((topic_partition, lag))
                    })
                    .collect();
                (thread, lags)
            })
            .collect()
    }

    fn decide_next_state(&self, current: AutopilotState, thread_info: &ThreadInfo) -> AutopilotState {
        let thread_count = thread_info.len();
        if thread_count == 0 {
            return current;
        }

        let accumulated_lag: i64 = thread_info.values().flat_map(|p| p.values()).sum();
        let desired = self.config.desired_thread_count;
        let ceiling = desired + self.config.thread_limit;

        if thread_count == ceiling {
            return AutopilotState::Boosted;
        }

        let mut target = ceiling;
        for t in desired..ceiling {
            let divisor = (t as i64).max(1);
            if accumulated_lag / divisor <= self.config.lag_threshold {
                target = t;
                break;
            }
        }

        use std::cmp::Ordering::*;
        match target.cmp(&thread_count) {
            Greater => AutopilotState::Boosting,
            Less => AutopilotState::Decreasing,
            Equal if target == desired => AutopilotState::StandBy,
            Equal => AutopilotState::Boosted,
        }
    }

    /// A single scheduled evaluation. Skipped entirely (not an error) when there is nothing to
    /// evaluate, a mutating operation is already in flight, or the recovery window is open.
    pub async fn run(&self) -> Result<(), AutopilotError> {
        let thread_info = self.collect_thread_info();
        if thread_info.is_empty() {
            return Ok(());
        }

        let window = self
            .window
            .as_ref()
            .ok_or(AutopilotError::SchedulingRequiresWindow)?;
        if window.is_open() {
            return Ok(());
        }

        let mut guard = tokio::time::timeout(self.config.generic_timeout, self.state.write())
            .await
            .map_err(|_elapsed| AutopilotError::LockUnavailable)?;

        // Boosting/Decreasing mean a mutating operation is already in flight; StandBy and
        // Boosted are stable resting states and both re-enter the decision logic.
        if matches!(*guard, AutopilotState::Boosting | AutopilotState::Decreasing) {
            return Ok(());
        }

        let next = self.decide_next_state(*guard, &thread_info);
        match next {
            AutopilotState::StandBy | AutopilotState::Boosted => {
                *guard = next;
            }
            AutopilotState::Boosting => {
                *guard = AutopilotState::Boosting;
                drop(guard);
                let _ = self.do_add().await;
            }
            AutopilotState::Decreasing => {
                *guard = AutopilotState::Decreasing;
                drop(guard);
                let _ = self.do_remove().await;
            }
        }
        Ok(())
    }

    async fn do_add(&self) -> Result<(), RuntimeError> {
        match self.thread_topology.add_thread().await {
            Ok(_) => {
                *self.state.write().await = AutopilotState::Boosted;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "NOOP: runtime declined to add a stream thread");
                Err(err)
            }
        }
    }

    async fn do_remove(&self) -> Result<(), RuntimeError> {
        match self.thread_topology.remove_thread().await {
            Ok(_) => {
                let refreshed = self.collect_thread_info();
                let mut guard = self.state.write().await;
                let next = self.decide_next_state(*guard, &refreshed);
                *guard = next;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "NOOP: runtime declined to remove a stream thread");
                Err(err)
            }
        }
    }

    async fn manual_transition(
        &self,
        target: AutopilotState,
        timeout: Duration,
    ) -> Result<(), AutopilotError> {
        let mut guard = tokio::time::timeout(timeout, self.state.write())
            .await
            .map_err(|_elapsed| AutopilotError::LockUnavailable)?;
        if !guard.can_transition_to(target) {
            return Err(AutopilotError::InvalidTransition {
                from: *guard,
                to: target,
            });
        }
        *guard = target;
        Ok(())
    }

    /// Does not bypass the state machine: the transition must be legal from the current state
    /// before the runtime is ever asked to add a thread.
    pub async fn add_stream_thread(&self, timeout: Duration) -> Result<(), AutopilotError> {
        self.manual_transition(AutopilotState::Boosting, timeout).await?;
        self.do_add().await.map_err(AutopilotError::RuntimeRejected)
    }

    pub async fn remove_stream_thread(&self, timeout: Duration) -> Result<(), AutopilotError> {
        self.manual_transition(AutopilotState::Decreasing, timeout).await?;
        self.do_remove().await.map_err(AutopilotError::RuntimeRejected)
    }

    /// Installs the periodic schedule: `initial_delay`, then every `between_runs`, on one
    /// dedicated task so ticks never run concurrently with each other.
    pub fn automate(self: &Arc<Self>) -> Result<(), AutopilotError> {
        if self.window.is_none() {
            return Err(AutopilotError::SchedulingRequiresWindow);
        }

        let this = self.clone();
        let initial_delay = self.config.initial_delay;
        let between_runs = self.config.between_runs;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut interval = tokio::time::interval(between_runs);
            loop {
                interval.tick().await;
                if let Err(err) = this.run().await {
                    tracing::warn!(%err, "autopilot tick failed");
                }
            }
        });

        if let Ok(mut slot) = self.schedule.try_lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Best-effort: aborts the scheduled task immediately, no draining.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.schedule.lock().await.take() {
            handle.abort();
        }
    }
}

fn topic_of(topic_partition: &str) -> &str {
    topic_partition
        .rsplit_once('-')
        .map(|(topic, _partition)| topic)
        .unwrap_or(topic_partition)
}
