//! Fixed-interval polling of the rig backend.
//!
//! Each loop is one tokio task. A tick is awaited inline, so within a loop
//! the next request never starts before the previous one settled; separate
//! loops interleave freely. Every store write made by a tick goes through
//! the scheduler's [`TeardownGuard`], so once [`PollScheduler::teardown`]
//! returns no late response can touch the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rig_client::{PollOutcome, RigClient};
use rig_core::{CameraId, ServerStatus, SessionMessage};
use rig_store::ConsoleStore;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Period of every polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollCadence {
    pub status: Duration,
    pub camera: Duration,
    pub report: Duration,
    pub pneumatic: Duration,
    pub sync: Duration,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self {
            status: Duration::from_secs(3),
            camera: Duration::from_secs(3),
            report: Duration::from_secs(2),
            pneumatic: Duration::from_secs(1),
            sync: Duration::from_secs(1),
        }
    }
}

/// Shared switch that closes the store to polling results.
#[derive(Debug, Clone, Default)]
pub struct TeardownGuard {
    torn_down: Arc<parking_lot::RwLock<bool>>,
}

impl TeardownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !*self.torn_down.read()
    }

    /// Runs `write` unless teardown has happened. Teardown waits for any
    /// write already in progress.
    pub fn apply<R>(&self, write: impl FnOnce() -> R) -> Option<R> {
        let torn_down = self.torn_down.read();
        if *torn_down {
            return None;
        }
        Some(write())
    }

    pub fn tear_down(&self) {
        *self.torn_down.write() = true;
    }
}

/// Owns one polling task. Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn new(name: &'static str, task: JoinHandle<()>) -> Self {
        Self {
            name,
            task: Some(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(target = "rig.poll", name = self.name, "poll loop cancelled");
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Spawns a loop calling `tick` every `period`, starting immediately.
pub fn spawn_loop<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> PollHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            trace!(target = "rig.poll", name, "tick");
            tick().await;
        }
    });
    PollHandle::new(name, task)
}

fn record_poll(name: &'static str, fresh: bool) {
    let outcome = if fresh { "fresh" } else { "degraded" };
    counter!("rig_console_polls_total", 1, "loop" => name, "outcome" => outcome);
}

/// The set of loops feeding one context's store.
pub struct PollScheduler {
    guard: TeardownGuard,
    handles: Vec<PollHandle>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            guard: TeardownGuard::new(),
            handles: Vec::new(),
        }
    }

    /// Starts the status, camera, report and pneumatic loops.
    pub fn start(client: RigClient, store: Arc<ConsoleStore>, cadence: PollCadence) -> Self {
        let mut scheduler = Self::new();
        scheduler.push(status_loop(
            client.clone(),
            store.clone(),
            scheduler.guard(),
            cadence.status,
        ));
        scheduler.push(camera_loop(
            client.clone(),
            store.clone(),
            scheduler.guard(),
            cadence.camera,
        ));
        scheduler.push(report_loop(
            client.clone(),
            store.clone(),
            scheduler.guard(),
            cadence.report,
        ));
        scheduler.push(pneumatic_loop(client, store, scheduler.guard(), cadence.pneumatic));
        scheduler
    }

    pub fn guard(&self) -> TeardownGuard {
        self.guard.clone()
    }

    pub fn push(&mut self, handle: PollHandle) {
        self.handles.push(handle);
    }

    pub fn loop_names(&self) -> Vec<&'static str> {
        self.handles.iter().map(PollHandle::name).collect()
    }

    pub fn is_torn_down(&self) -> bool {
        !self.guard.is_active()
    }

    /// Closes the store to late results, then aborts every loop.
    pub fn teardown(&mut self) {
        self.guard.tear_down();
        for handle in &mut self.handles {
            handle.cancel();
        }
        self.handles.clear();
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub fn status_loop(
    client: RigClient,
    store: Arc<ConsoleStore>,
    guard: TeardownGuard,
    period: Duration,
) -> PollHandle {
    spawn_loop("status", period, move || {
        let client = client.clone();
        let store = store.clone();
        let guard = guard.clone();
        async move {
            let outcome = client.poll_status().await;
            record_poll("status", outcome.is_fresh());
            let status = match outcome.reason() {
                None => ServerStatus::Online,
                Some(reason) => {
                    debug!(target = "rig.poll", reason = %reason, "backend unreachable");
                    ServerStatus::Offline
                }
            };
            guard.apply(|| store.set_server_status(status));
        }
    })
}

pub fn camera_loop(
    client: RigClient,
    store: Arc<ConsoleStore>,
    guard: TeardownGuard,
    period: Duration,
) -> PollHandle {
    spawn_loop("camera", period, move || {
        let client = client.clone();
        let store = store.clone();
        let guard = guard.clone();
        async move {
            for camera in CameraId::all() {
                match client.camera_status(camera).await {
                    Ok(link) => {
                        record_poll("camera", true);
                        if guard.apply(|| store.set_camera_link(camera, link)).is_none() {
                            return;
                        }
                    }
                    Err(err) => {
                        record_poll("camera", false);
                        debug!(target = "rig.poll", %camera, error = %err, "camera probe failed");
                        if err.is_unreachable() {
                            mark_offline(&store, &guard);
                        }
                    }
                }
            }
        }
    })
}

pub fn report_loop(
    client: RigClient,
    store: Arc<ConsoleStore>,
    guard: TeardownGuard,
    period: Duration,
) -> PollHandle {
    spawn_loop("report", period, move || {
        let client = client.clone();
        let store = store.clone();
        let guard = guard.clone();
        async move {
            let outcome = client.poll_report().await;
            record_poll("report", outcome.is_fresh());
            match outcome {
                PollOutcome::Fresh(report) => {
                    guard.apply(|| store.set_report(report));
                }
                PollOutcome::Unreachable(_) => mark_offline(&store, &guard),
                PollOutcome::Degraded(_) => {}
            }
        }
    })
}

pub fn pneumatic_loop(
    client: RigClient,
    store: Arc<ConsoleStore>,
    guard: TeardownGuard,
    period: Duration,
) -> PollHandle {
    spawn_loop("pneumatic", period, move || {
        let client = client.clone();
        let store = store.clone();
        let guard = guard.clone();
        async move {
            let outcome = client.poll_pneumatic_message().await;
            record_poll("pneumatic", outcome.is_fresh());
            if outcome.is_unreachable() {
                mark_offline(&store, &guard);
            }
            let Some(pneumatic) = outcome.fresh() else {
                return;
            };
            let Some(text) = pneumatic.message.as_deref().map(str::trim) else {
                return;
            };
            if text.is_empty() {
                return;
            }
            let message = if pneumatic.is_start() {
                SessionMessage::progress("Pneumatic trigger fired, test starting")
            } else {
                SessionMessage::info(text)
            };
            guard.apply(|| store.set_message(message));
        }
    })
}

/// A failed poll of any loop may only ever touch the server status.
fn mark_offline(store: &ConsoleStore, guard: &TeardownGuard) {
    guard.apply(|| store.set_server_status(ServerStatus::Offline));
}
