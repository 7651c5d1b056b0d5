// Refresh scheduler - periodic ticks driving the live dataset fetch
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshInterval {
    pub value_ms: u64,
    pub label: String,
}

impl RefreshInterval {
    pub fn new(value_ms: u64, label: impl Into<String>) -> Self {
        Self {
            value_ms,
            label: label.into(),
        }
    }

    pub fn never() -> Self {
        Self::new(0, "never")
    }
}

/// Tick identity. `generation` changes with every interval selection, so
/// two timers never produce the same tick even though both count from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshTick {
    pub generation: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshState {
    pub interval: Option<RefreshInterval>,
    pub tick: RefreshTick,
    pub date: Option<DateTime<Utc>>,
}

impl RefreshState {
    pub fn is_ticking(&self) -> bool {
        self.interval.as_ref().is_some_and(|interval| interval.value_ms > 0)
    }
}

/// Two states: idle (no interval or a zero interval) and ticking. Selecting
/// an interval always replaces the running timer; ticks fire immediately
/// and then once per period.
pub struct RefreshScheduler {
    state: Arc<watch::Sender<RefreshState>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        let (state, _) = watch::channel(RefreshState::default());
        Self {
            state: Arc::new(state),
            timer: Mutex::new(None),
        }
    }
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> RefreshState {
        self.state.borrow().clone()
    }

    pub fn select_interval(&self, interval: RefreshInterval) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = timer.take() {
            running.abort();
        }

        let period = interval.value_ms;
        let mut generation = 0;
        self.state.send_modify(|state| {
            state.tick.generation += 1;
            state.tick.count = 0;
            state.interval = Some(interval);
            generation = state.tick.generation;
        });

        if period == 0 {
            tracing::info!("Auto refresh disabled");
            return;
        }

        tracing::info!("Auto refresh every {}ms", period);
        let state = Arc::clone(&self.state);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(period));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                state.send_modify(|state| {
                    // An aborted timer may still be mid-tick.
                    if state.tick.generation == generation {
                        state.tick.count += 1;
                        state.date = Some(Utc::now());
                    }
                });
                tracing::debug!("Refresh tick (generation {})", generation);
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(running) = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            running.abort();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
