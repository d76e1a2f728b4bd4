//! Countdown task for the current poll.
//!
//! The session only stores the seconds remaining. [`PollTimer`] owns the
//! tokio task that ticks it down and announces the end of the poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::session::PollSession;
use crate::websocket::{EventBroadcaster, ServerEvent};

/// Periodic tick source for the current poll.
#[derive(Debug)]
pub struct PollTimer {
    tick_interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollTimer {
    /// Creates a stopped timer that ticks every `tick_interval` once started.
    #[must_use]
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            handle: Mutex::new(None),
        }
    }

    /// Starts counting down `poll_id`, replacing any running countdown.
    ///
    /// Each tick decrements the session timer and broadcasts `timer_tick`.
    /// When the timer reaches zero the poll is archived and `poll_ended` is
    /// broadcast, unless it was already archived. The task exits on its own
    /// as soon as `poll_id` is no longer the current poll.
    pub async fn start(
        &self,
        poll_id: Uuid,
        session: Arc<Mutex<PollSession>>,
        broadcaster: EventBroadcaster,
    ) {
        let mut handle = self.handle.lock().await;
        if let Some(previous) = handle.take() {
            previous.abort();
        }

        let tick_interval = self.tick_interval;
        *handle = Some(tokio::spawn(async move {
            run_countdown(poll_id, tick_interval, session, broadcaster).await;
        }));
        debug!(poll_id = %poll_id, "Poll timer started");
    }

    /// Stops the running countdown, if any.
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            debug!("Poll timer stopped");
        }
    }

    /// Returns `true` while a countdown task is alive.
    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for PollTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

async fn run_countdown(
    poll_id: Uuid,
    tick_interval: Duration,
    session: Arc<Mutex<PollSession>>,
    broadcaster: EventBroadcaster,
) {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let mut session = session.lock().await;
        if session.current_poll().map(|p| p.id) != Some(poll_id) {
            debug!(poll_id = %poll_id, "Poll replaced, countdown exits");
            return;
        }

        let remaining = session.decrement_timer();
        broadcaster.send(ServerEvent::timer_tick(remaining));

        if remaining == 0 {
            if !session.is_archived() {
                if let Some(completed) = session.complete_poll() {
                    info!(poll_id = %poll_id, answered = completed.results.answered_count, "Poll time is up");
                    broadcaster.send(ServerEvent::poll_ended(completed.results, completed.history));
                }
            }
            return;
        }
    }
}
