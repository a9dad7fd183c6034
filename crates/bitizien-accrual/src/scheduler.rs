//! Periodic sweep scheduler.
//!
//! A [`Scheduler`] is either `Stopped` or `Running`. Starting it spawns one
//! background task that sweeps immediately and then once per tick. Stopping
//! it signals the task through a watch channel: a sweep already in progress
//! runs to completion, but no further sweep starts. The stopped task's handle
//! is kept, so a later [`Scheduler::shutdown`] still waits for that sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::engine::AccrualEngine;

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Default)]
struct Counters {
    sweeps: AtomicU64,
    failed_sweeps: AtomicU64,
}

struct Active {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Active {
    fn is_running(&self) -> bool {
        !*self.stop_tx.borrow() && !self.handle.is_finished()
    }
}

/// Drives [`AccrualEngine::sweep_all`] at a fixed interval.
pub struct Scheduler {
    engine: Arc<AccrualEngine>,
    active: Mutex<Option<Active>>,
    counters: Arc<Counters>,
}

impl Scheduler {
    pub fn new(engine: Arc<AccrualEngine>) -> Self {
        Self {
            engine,
            active: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        match self.active.lock().as_ref() {
            Some(active) if active.is_running() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    /// Start sweeping every `interval`. Returns `false` if already running.
    ///
    /// Must be called from within a Tokio runtime. A previously stopped
    /// task that is still finishing its last sweep is detached.
    pub fn start(&self, interval: Duration) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(Active::is_running) {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            Arc::clone(&self.engine),
            interval,
            stop_rx,
            Arc::clone(&self.counters),
        ));
        *active = Some(Active { stop_tx, handle });
        info!(interval_secs = interval.as_secs_f64(), "accrual scheduler started");
        true
    }

    /// Stop scheduling sweeps. An in-flight sweep is allowed to finish.
    pub fn stop(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            if !active.stop_tx.send_replace(true) {
                info!("accrual scheduler stopping");
            }
        }
    }

    /// [`stop`](Self::stop) and wait for the background task to exit.
    pub async fn shutdown(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            active.stop_tx.send_replace(true);
            if let Err(e) = active.handle.await {
                error!("accrual scheduler task ended abnormally: {e}");
            }
            info!("accrual scheduler stopped");
        }
    }

    /// Sweeps completed since construction, successful or not.
    pub fn sweeps_completed(&self) -> u64 {
        self.counters.sweeps.load(Ordering::Relaxed)
    }

    /// Sweeps that returned an error or panicked.
    pub fn sweeps_failed(&self) -> u64 {
        self.counters.failed_sweeps.load(Ordering::Relaxed)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.stop_tx.send_replace(true);
        }
    }
}

async fn run(
    engine: Arc<AccrualEngine>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    // tokio panics on a zero period.
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        if *stop_rx.borrow() {
            break;
        }
        sweep_once(&engine, &counters).await;
    }
}

/// Run one sweep in its own task so a panic is contained and logged.
async fn sweep_once(engine: &Arc<AccrualEngine>, counters: &Counters) {
    let engine = Arc::clone(engine);
    let outcome = tokio::spawn(async move { engine.sweep_all().await }).await;

    match outcome {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!("accrual sweep failed: {e}");
            counters.failed_sweeps.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!("accrual sweep panicked: {e}");
            counters.failed_sweeps.fetch_add(1, Ordering::Relaxed);
        }
    }
    counters.sweeps.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use bitizien_core::clock::ManualClock;
    use bitizien_core::config::MiningConfig;
    use bitizien_core::traits::AccountStore;
    use bitizien_core::types::{Account, Timestamp};

    fn scheduler() -> (Scheduler, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000)));
        let engine = AccrualEngine::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            MiningConfig::default(),
        )
        .unwrap();
        (Scheduler::new(Arc::new(engine)), store, clock)
    }

    async fn wait_for_sweeps(s: &Scheduler, n: u64) {
        for _ in 0..200 {
            if s.sweeps_completed() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} sweeps, saw {}", s.sweeps_completed());
    }

    #[tokio::test]
    async fn starts_stopped() {
        let (s, _, _) = scheduler();
        assert_eq!(s.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn start_sweeps_immediately() {
        let (s, store, _) = scheduler();
        store.create_account(Account::new("alice")).await.unwrap();

        assert!(s.start(Duration::from_secs(3600)));
        assert_eq!(s.state(), SchedulerState::Running);
        wait_for_sweeps(&s, 1).await;
        assert_eq!(store.ledger_len(), 1);
        s.shutdown().await;
        assert_eq!(s.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn second_start_is_noop() {
        let (s, _, _) = scheduler();
        assert!(s.start(Duration::from_secs(3600)));
        assert!(!s.start(Duration::from_millis(1)));
        wait_for_sweeps(&s, 1).await;
        s.shutdown().await;
        assert_eq!(s.sweeps_completed(), 1);
    }

    #[tokio::test]
    async fn ticks_repeat_until_stopped() {
        let (s, store, clock) = scheduler();
        store.create_account(Account::new("alice")).await.unwrap();

        s.start(Duration::from_millis(20));
        wait_for_sweeps(&s, 1).await;
        clock.advance(Duration::from_secs(3600));
        // The sweep after next is guaranteed to read the advanced clock.
        let seen = s.sweeps_completed();
        wait_for_sweeps(&s, seen + 2).await;
        s.stop();
        assert_eq!(s.state(), SchedulerState::Stopped);

        let after_stop = s.sweeps_completed();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // At most the sweep that was in flight when stop() ran.
        assert!(s.sweeps_completed() <= after_stop + 1);
        assert_eq!(store.ledger_len(), 2);
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let (s, _, _) = scheduler();
        s.start(Duration::from_secs(3600));
        wait_for_sweeps(&s, 1).await;
        s.shutdown().await;

        assert!(s.start(Duration::from_secs(3600)));
        wait_for_sweeps(&s, 2).await;
        s.shutdown().await;
    }

    #[tokio::test]
    async fn stop_when_stopped_is_harmless() {
        let (s, _, _) = scheduler();
        s.stop();
        s.shutdown().await;
        assert_eq!(s.state(), SchedulerState::Stopped);
    }
}
