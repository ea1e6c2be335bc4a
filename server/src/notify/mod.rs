//! Polling loop that turns presence changes into events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::{
    coral::CoralApi,
    errors::{NxapiError, NxapiResult},
    presence::{diff, PresenceSnapshot, TransitionEvent},
    state::NxapiConfig,
    traits::Clock,
};

/// Where the loop gets its snapshots from
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn fetch(&self) -> NxapiResult<PresenceSnapshot>;
}

pub struct CoralPresenceSource {
    api: Arc<dyn CoralApi>,
    clock: Arc<dyn Clock>,
}

impl CoralPresenceSource {
    pub fn new(api: Arc<dyn CoralApi>, clock: Arc<dyn Clock>) -> Self {
        Self { api, clock }
    }
}

#[async_trait]
impl PresenceSource for CoralPresenceSource {
    async fn fetch(&self) -> NxapiResult<PresenceSnapshot> {
        let (user, friends) = futures::try_join!(self.api.current_user(), self.api.friends())?;

        Ok(PresenceSnapshot::new(&user, &friends, self.clock.now_ms()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub interval: Duration,
    pub min_interval: Duration,
}

impl LoopConfig {
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(self.min_interval)
    }
}

impl From<&NxapiConfig> for LoopConfig {
    fn from(config: &NxapiConfig) -> Self {
        Self {
            interval: config.update_interval,
            min_interval: config.min_update_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No baseline snapshot yet
    Idle,
    Polling,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollFailure {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&NxapiError> for PollFailure {
    fn from(err: &NxapiError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Transition(TransitionEvent),
    PollFailed(PollFailure),
}

#[derive(Debug, Default)]
struct Control {
    stop: AtomicBool,
    skip: AtomicBool,
    wake: Notify,
}

/// Controls a running loop from other tasks
#[derive(Debug, Clone)]
pub struct LoopHandle {
    control: Arc<Control>,
}

impl LoopHandle {
    /// The loop stops after the iteration in progress
    pub fn stop(&self) {
        self.control.stop.store(true, Ordering::SeqCst);
        self.control.wake.notify_one();
    }

    /// Fetch now instead of waiting for the rest of the interval, once
    pub fn skip_interval(&self) {
        self.control.skip.store(true, Ordering::SeqCst);
        self.control.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.control.stop.load(Ordering::SeqCst)
    }
}

pub struct NotificationLoop<S> {
    source: S,
    config: LoopConfig,
    events: mpsc::Sender<LoopEvent>,
    control: Arc<Control>,
    state: LoopState,
    snapshot: Option<PresenceSnapshot>,
    last_fetch: Option<Instant>,
}

impl<S: PresenceSource> NotificationLoop<S> {
    pub fn new(source: S, config: LoopConfig, events: mpsc::Sender<LoopEvent>) -> (Self, LoopHandle) {
        let control = Arc::new(Control::default());
        let handle = LoopHandle {
            control: control.clone(),
        };

        let notification_loop = Self {
            source,
            config,
            events,
            control,
            state: LoopState::Idle,
            snapshot: None,
            last_fetch: None,
        };

        (notification_loop, handle)
    }

    /// Start from a snapshot fetched elsewhere instead of calling [`Self::init`]
    pub fn with_baseline(mut self, snapshot: PresenceSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self.last_fetch = Some(Instant::now());
        self.state = LoopState::Polling;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn snapshot(&self) -> Option<&PresenceSnapshot> {
        self.snapshot.as_ref()
    }

    /// Fetch the baseline snapshot. No events are sent for it.
    pub async fn init(&mut self) -> NxapiResult<()> {
        self.last_fetch = Some(Instant::now());
        let snapshot = self.source.fetch().await?;

        debug!(friends = snapshot.friends.len(), "Fetched initial presence");
        self.snapshot = Some(snapshot);
        if self.state == LoopState::Idle {
            self.state = LoopState::Polling;
        }

        Ok(())
    }

    /// Wait for the next deadline, then fetch and send any transitions
    pub async fn run_once(&mut self) -> LoopState {
        if self.stop_requested() {
            return self.state;
        }

        self.wait().await;
        if self.stop_requested() {
            return self.state;
        }

        match self.state {
            LoopState::Idle => {
                if let Err(err) = self.init().await {
                    warn!(error = %err, "Failed to fetch initial presence");
                    self.report(&err).await;
                }
            }
            LoopState::Polling => self.poll().await,
            LoopState::Stopped => {}
        }

        self.stop_requested();
        self.state
    }

    /// Poll until stopped or the event receiver is dropped
    pub async fn run(mut self) -> LoopState {
        if self.state == LoopState::Idle && self.last_fetch.is_none() && !self.stop_requested() {
            if let Err(err) = self.init().await {
                warn!(error = %err, "Failed to fetch initial presence");
                self.report(&err).await;
            }
        }

        while self.state != LoopState::Stopped {
            self.run_once().await;
        }

        info!("Notification loop stopped");
        self.state
    }

    fn stop_requested(&mut self) -> bool {
        if self.control.stop.load(Ordering::SeqCst) {
            self.state = LoopState::Stopped;
        }
        self.state == LoopState::Stopped
    }

    async fn wait(&self) {
        let Some(last_fetch) = self.last_fetch else {
            return;
        };
        let deadline = last_fetch + self.config.effective_interval();

        loop {
            if self.control.skip.swap(false, Ordering::SeqCst) {
                debug!("Skipping the rest of the update interval");
                return;
            }
            if self.control.stop.load(Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                _ = sleep_until(deadline) => return,
                _ = self.control.wake.notified() => {}
            }
        }
    }

    async fn poll(&mut self) {
        self.last_fetch = Some(Instant::now());

        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "Failed to fetch presence");
                if !err.is_retryable() {
                    // Start again from a new baseline once this is resolved
                    self.snapshot = None;
                    self.state = LoopState::Idle;
                }
                self.report(&err).await;
                return;
            }
        };

        let events = diff(self.snapshot.as_ref(), &snapshot);
        debug!(events = events.len(), "Fetched presence");

        for event in events {
            if self.events.send(LoopEvent::Transition(event)).await.is_err() {
                debug!("Event receiver dropped");
                self.state = LoopState::Stopped;
                break;
            }
        }

        self.snapshot = Some(snapshot);
    }

    async fn report(&mut self, err: &NxapiError) {
        let failure = PollFailure::from(err);
        if self.events.send(LoopEvent::PollFailed(failure)).await.is_err() {
            debug!("Event receiver dropped");
            self.state = LoopState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;
    use crate::coral::types::{Presence, PresenceState};
    use crate::presence::FriendPresence;

    #[derive(Default, Clone)]
    struct ScriptedSource {
        responses: Arc<Mutex<VecDeque<NxapiResult<PresenceSnapshot>>>>,
        fetches: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn push(&self, response: NxapiResult<PresenceSnapshot>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PresenceSource for ScriptedSource {
        async fn fetch(&self) -> NxapiResult<PresenceSnapshot> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(NxapiError::NotFound("no scripted response".into())))
        }
    }

    fn snapshot(friend_state: PresenceState) -> PresenceSnapshot {
        let presence = |state| Presence {
            state,
            updated_at: 0,
            logout_at: 0,
            game: None,
        };

        PresenceSnapshot {
            user: FriendPresence {
                nsa_id: "self".to_string(),
                name: "Me".to_string(),
                image_uri: String::new(),
                presence: presence(PresenceState::Offline),
            },
            friends: vec![FriendPresence {
                nsa_id: "a".to_string(),
                name: "Friend".to_string(),
                image_uri: String::new(),
                presence: presence(friend_state),
            }],
            captured_at: 0,
        }
    }

    fn config() -> LoopConfig {
        LoopConfig {
            interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(10),
        }
    }

    fn upstream_error() -> NxapiError {
        NxapiError::Upstream {
            service: "coral",
            status: 9500,
            message: "maintenance".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_sends_no_events() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Online)));
        let (tx, mut rx) = mpsc::channel(16);

        let (mut notification_loop, _handle) = NotificationLoop::new(source, config(), tx);
        notification_loop.init().await.unwrap();

        assert_eq!(notification_loop.state(), LoopState::Polling);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_failure_stays_idle() {
        let source = ScriptedSource::default();
        source.push(Err(upstream_error()));
        let (tx, _rx) = mpsc::channel(16);

        let (mut notification_loop, _handle) = NotificationLoop::new(source, config(), tx);
        assert!(notification_loop.init().await.is_err());
        assert_eq!(notification_loop.state(), LoopState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_waits_for_interval_and_sends_transitions() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Offline)));
        source.push(Ok(snapshot(PresenceState::Online)));
        let (tx, mut rx) = mpsc::channel(16);

        let (mut notification_loop, _handle) = NotificationLoop::new(source, config(), tx);
        notification_loop.init().await.unwrap();

        let start = Instant::now();
        assert_eq!(notification_loop.run_once().await, LoopState::Polling);
        assert!(start.elapsed() >= Duration::from_secs(30));

        match rx.try_recv().unwrap() {
            LoopEvent::Transition(TransitionEvent::FriendOnline(transition)) => {
                assert_eq!(transition.subject.nsa_id(), "a");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_at_least_the_minimum() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Offline)));
        source.push(Ok(snapshot(PresenceState::Offline)));
        let (tx, _rx) = mpsc::channel(16);
        let config = LoopConfig {
            interval: Duration::from_secs(1),
            min_interval: Duration::from_secs(10),
        };

        let (mut notification_loop, _handle) = NotificationLoop::new(source, config, tx);
        notification_loop.init().await.unwrap();

        let start = Instant::now();
        notification_loop.run_once().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_reported_and_loop_continues() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Offline)));
        source.push(Err(upstream_error()));
        source.push(Ok(snapshot(PresenceState::Online)));
        let (tx, mut rx) = mpsc::channel(16);

        let (mut notification_loop, _handle) = NotificationLoop::new(source, config(), tx);
        notification_loop.init().await.unwrap();

        assert_eq!(notification_loop.run_once().await, LoopState::Polling);
        match rx.try_recv().unwrap() {
            LoopEvent::PollFailed(failure) => {
                assert_eq!(failure.code, "upstream_error");
                assert!(failure.retryable);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Diffed against the snapshot from before the failure
        assert_eq!(notification_loop.run_once().await, LoopState::Polling);
        assert!(matches!(
            rx.try_recv().unwrap(),
            LoopEvent::Transition(TransitionEvent::FriendOnline(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_drops_baseline() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Offline)));
        source.push(Err(NxapiError::MembershipRequired));
        source.push(Ok(snapshot(PresenceState::Online)));
        let (tx, mut rx) = mpsc::channel(16);

        let (mut notification_loop, _handle) = NotificationLoop::new(source, config(), tx);
        notification_loop.init().await.unwrap();

        assert_eq!(notification_loop.run_once().await, LoopState::Idle);
        assert!(matches!(rx.try_recv().unwrap(), LoopEvent::PollFailed(_)));

        // The next fetch is a new baseline
        assert_eq!(notification_loop.run_once().await, LoopState::Polling);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_from_seeded_baseline_replaces_snapshot() {
        let source = ScriptedSource::default();
        source.push(Ok(PresenceSnapshot {
            captured_at: 2,
            ..snapshot(PresenceState::Offline)
        }));
        let (tx, mut rx) = mpsc::channel(16);

        let baseline = PresenceSnapshot {
            captured_at: 1,
            ..snapshot(PresenceState::Online)
        };
        let (notification_loop, handle) = NotificationLoop::new(source.clone(), config(), tx);
        let mut notification_loop = notification_loop.with_baseline(baseline);
        assert_eq!(notification_loop.state(), LoopState::Polling);

        handle.skip_interval();
        assert_eq!(notification_loop.run_once().await, LoopState::Polling);

        match rx.try_recv().unwrap() {
            LoopEvent::Transition(TransitionEvent::FriendOffline(transition)) => {
                assert_eq!(transition.subject.nsa_id(), "a");
                assert_eq!(
                    transition.previous.map(|presence| presence.state),
                    Some(PresenceState::Online)
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(source.fetches(), 1);
        assert_eq!(notification_loop.snapshot().unwrap().captured_at, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_interval_fetches_immediately() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Offline)));
        source.push(Ok(snapshot(PresenceState::Offline)));
        let (tx, _rx) = mpsc::channel(16);

        let (mut notification_loop, handle) =
            NotificationLoop::new(source.clone(), config(), tx);
        notification_loop.init().await.unwrap();

        handle.skip_interval();
        let start = Instant::now();
        notification_loop.run_once().await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_wakes_sleep_without_fetching() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Offline)));
        let (tx, _rx) = mpsc::channel(16);

        let (notification_loop, handle) = NotificationLoop::new(source.clone(), config(), tx);
        let task = tokio::spawn(notification_loop.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.stop();

        assert_eq!(task.await.unwrap(), LoopState::Stopped);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_receiver_stops_loop() {
        let source = ScriptedSource::default();
        source.push(Ok(snapshot(PresenceState::Offline)));
        source.push(Ok(snapshot(PresenceState::Online)));
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let (notification_loop, _handle) = NotificationLoop::new(source, config(), tx);

        assert_eq!(notification_loop.run().await, LoopState::Stopped);
    }
}
