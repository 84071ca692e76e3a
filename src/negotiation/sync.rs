// Request generations and cancellable polling timers
//
// A full reload mints a new RequestToken; routine polls reuse the current one.
// Every response is applied only if the token captured at dispatch is still current.

use futures::future::BoxFuture;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn generation(self) -> u64 {
        self.0
    }
}

/// Holds the one current request token
#[derive(Debug, Default)]
pub struct RequestGeneration {
    current: AtomicU64,
}

impl RequestGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new logical load, invalidating every in-flight response of the previous one
    pub fn mint(&self) -> RequestToken {
        RequestToken(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current(&self) -> RequestToken {
        RequestToken(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }
}

/// Outcome of a load whose result may have gone stale in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    Discarded,
}

pub type PollTick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A cancellable fixed-cadence timer owned by a view.
///
/// `start` and `stop` are idempotent: there is never more than one task.
/// While the view is hidden the task is suspended but the schedule is kept,
/// so showing the view again resumes it. Dropping the poller cancels the task.
pub struct Poller {
    name: &'static str,
    schedule: Option<(Duration, PollTick)>,
    visible: bool,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn new(name: &'static str) -> Self {
        Poller {
            name,
            schedule: None,
            visible: true,
            task: None,
        }
    }

    /// Returns false if the poller was already started.
    pub fn start(&mut self, interval: Duration, tick: PollTick) -> bool {
        if self.schedule.is_some() {
            debug!("{} poller already started", self.name);
            return false;
        }
        // tokio intervals panic on a zero period
        let interval = interval.max(Duration::from_millis(1));
        info!("Starting {} poller every {:?}", self.name, interval);
        self.schedule = Some((interval, tick));
        self.spawn_if_visible();
        true
    }

    /// Returns false if the poller was not started.
    pub fn stop(&mut self) -> bool {
        self.cancel_task();
        if self.schedule.take().is_some() {
            info!("Stopped {} poller", self.name);
            true
        } else {
            false
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        if visible {
            debug!("Resuming {} poller", self.name);
            self.spawn_if_visible();
        } else {
            debug!("Suspending {} poller", self.name);
            self.cancel_task();
        }
    }

    pub fn is_started(&self) -> bool {
        self.schedule.is_some()
    }

    /// True while a timer task is actually scheduled
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    fn spawn_if_visible(&mut self) {
        if !self.visible || self.task.is_some() {
            return;
        }
        let Some((interval, tick)) = self.schedule.clone() else {
            return;
        };

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the first fetch is the caller's job
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tick().await;
            }
        }));
    }

    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel_task();
    }
}
