use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::{
    errors::ServerResult,
    notify::{CoralPresenceSource, LoopConfig, LoopEvent, LoopHandle, NotificationLoop},
    policy::Capability,
    presence::{Subject, TransitionEvent},
};

use super::{ProxyState, ZncAuth};

/// One notification loop per session token, shared by every subscriber
#[derive(Default)]
pub(super) struct PresenceHubs {
    hubs: Mutex<HashMap<String, Hub>>,
}

#[derive(Clone)]
struct Hub {
    id: uuid::Uuid,
    sender: broadcast::Sender<LoopEvent>,
    handle: LoopHandle,
    subscribers: Arc<AtomicUsize>,
}

/// Stops the hub's loop when the last subscriber goes away
struct Subscription {
    handle: LoopHandle,
    subscribers: Arc<AtomicUsize>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.subscribers.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("Last presence subscriber left");
            self.handle.stop();
        }
    }
}

impl PresenceHubs {
    async fn subscribe(
        &self,
        state: &ProxyState,
        auth: &ZncAuth,
    ) -> ServerResult<(broadcast::Receiver<LoopEvent>, Subscription)> {
        let session_token = auth.session_token();

        if let Some(subscribed) = self.join(session_token).await {
            return Ok(subscribed);
        }

        // Getting a Coral session may run a full exchange, so the map is not
        // locked while it happens
        let pending = PendingHub::prepare(state, session_token).await?;

        let mut hubs = self.hubs.lock().await;
        let hub = match hubs.get(session_token) {
            Some(hub) if !hub.handle.is_stopped() => {
                debug!("Another subscriber started the hub first");
                hub.clone()
            }
            _ => {
                let hub = pending.start(state, session_token);
                hubs.insert(session_token.to_string(), hub.clone());
                hub
            }
        };

        Ok(hub.subscribe())
    }

    /// Subscribe to a running hub, if there is one
    async fn join(
        &self,
        session_token: &str,
    ) -> Option<(broadcast::Receiver<LoopEvent>, Subscription)> {
        let hubs = self.hubs.lock().await;
        hubs.get(session_token)
            .filter(|hub| !hub.handle.is_stopped())
            .map(Hub::subscribe)
    }

    async fn remove(&self, session_token: &str, id: uuid::Uuid) {
        let mut hubs = self.hubs.lock().await;
        if hubs.get(session_token).is_some_and(|hub| hub.id == id) {
            hubs.remove(session_token);
        }
    }
}

impl Hub {
    fn subscribe(&self) -> (broadcast::Receiver<LoopEvent>, Subscription) {
        self.subscribers.fetch_add(1, Ordering::SeqCst);

        (
            self.sender.subscribe(),
            Subscription {
                handle: self.handle.clone(),
                subscribers: self.subscribers.clone(),
            },
        )
    }
}

/// A loop that has its Coral session but has not been spawned yet
struct PendingHub {
    notification_loop: NotificationLoop<CoralPresenceSource>,
    handle: LoopHandle,
    rx: mpsc::Receiver<LoopEvent>,
}

impl PendingHub {
    async fn prepare(state: &ProxyState, session_token: &str) -> ServerResult<Self> {
        let coral = state.app.sessions.coral(session_token).await?;
        let source = CoralPresenceSource::new(Arc::new(coral), state.app.clock.clone());

        let (tx, rx) = mpsc::channel(64);
        let (notification_loop, handle) =
            NotificationLoop::new(source, LoopConfig::from(state.app.config.as_ref()), tx);

        Ok(Self {
            notification_loop,
            handle,
            rx,
        })
    }

    fn start(self, state: &ProxyState, session_token: &str) -> Hub {
        let PendingHub {
            notification_loop,
            handle,
            mut rx,
        } = self;
        let (sender, _) = broadcast::channel(64);

        let hub = Hub {
            id: uuid::Uuid::new_v4(),
            sender: sender.clone(),
            handle,
            subscribers: Arc::new(AtomicUsize::new(0)),
        };

        tokio::spawn(notification_loop.run());

        let hubs = state.hubs.clone();
        let session_token = session_token.to_string();
        let id = hub.id;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // No receivers only means nobody is connected right now
                let _ = sender.send(event);
            }
            hubs.remove(&session_token, id).await;
            info!("Presence event hub closed");
        });

        info!("Started presence event hub");
        hub
    }
}

/// Whether the proxy token may see this event
fn visible(auth: &ZncAuth, event: &LoopEvent) -> bool {
    let LoopEvent::Transition(event) = event else {
        return true;
    };

    match &event.transition().subject {
        Subject::CurrentUser { .. } => auth.allows(Capability::CurrentUserPresence),
        Subject::Friend { nsa_id, .. } => auth.allows_friend(nsa_id),
    }
}

fn sse_event(event: &LoopEvent) -> Event {
    let result = match event {
        LoopEvent::Transition(event) => Event::default()
            .event(event.code().to_string())
            .json_data(event),
        LoopEvent::PollFailed(failure) => Event::default().event("error").json_data(failure),
    };

    result.unwrap_or_else(|err| {
        error!(error = %err, "Failed to serialize presence event");
        Event::default().event("error").data(err.to_string())
    })
}

fn event_type(event: &TransitionEvent) -> &'static str {
    match event {
        TransitionEvent::FriendOnline(_) => "friend_online",
        TransitionEvent::FriendOffline(_) => "friend_offline",
        TransitionEvent::TitleChange(_) => "title_change",
        TransitionEvent::TitleStateChange(_) => "title_state_change",
    }
}

pub(super) async fn presence_events(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    auth.require(Capability::ListFriendsPresence)?;
    let (receiver, subscription) = state.hubs.subscribe(&state, &auth).await?;

    let stream = futures::stream::unfold(
        (receiver, subscription, auth),
        |(mut receiver, subscription, auth)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if visible(&auth, &event) => {
                        if let LoopEvent::Transition(transition) = &event {
                            debug!(event = event_type(transition), "Sending presence event");
                        }
                        return Some((
                            Ok::<_, Infallible>(sse_event(&event)),
                            (receiver, subscription, auth),
                        ));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Presence subscriber fell behind");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
