//! Presence snapshots and the transitions between two of them

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::coral::types::{CurrentUser, Friend, Game, Partition, Presence};

/// Presence of the authenticated user or one of their friends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendPresence {
    pub nsa_id: String,
    pub name: String,
    #[serde(default)]
    pub image_uri: String,
    pub presence: Presence,
}

impl From<&Friend> for FriendPresence {
    fn from(friend: &Friend) -> Self {
        Self {
            nsa_id: friend.nsa_id.clone(),
            name: friend.name.clone(),
            image_uri: friend.image_uri.clone(),
            presence: friend.presence.clone(),
        }
    }
}

impl From<&CurrentUser> for FriendPresence {
    fn from(user: &CurrentUser) -> Self {
        Self {
            nsa_id: user.user.nsa_id.clone(),
            name: user.user.name.clone(),
            image_uri: user.user.image_uri.clone(),
            presence: user.presence.clone(),
        }
    }
}

/// Everything fetched in one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user: FriendPresence,
    /// In the order Coral returned them
    pub friends: Vec<FriendPresence>,
    /// Milliseconds since the epoch
    pub captured_at: i64,
}

impl PresenceSnapshot {
    pub fn new(user: &CurrentUser, friends: &[Friend], captured_at: i64) -> Self {
        Self {
            user: user.into(),
            friends: friends.iter().map(FriendPresence::from).collect(),
            captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    /// The authenticated user
    CurrentUser { nsa_id: String, name: String },
    Friend { nsa_id: String, name: String },
}

impl Subject {
    pub fn nsa_id(&self) -> &str {
        match self {
            Subject::CurrentUser { nsa_id, .. } | Subject::Friend { nsa_id, .. } => nsa_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Subject::CurrentUser { name, .. } | Subject::Friend { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub subject: Subject,
    pub presence: Presence,
    pub previous: Option<Presence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionEvent {
    FriendOnline(Transition),
    FriendOffline(Transition),
    TitleChange(Transition),
    TitleStateChange(Transition),
}

impl TransitionEvent {
    /// Numeric event code used on the proxy event stream
    pub fn code(&self) -> u8 {
        match self {
            TransitionEvent::FriendOnline(_) => 0,
            TransitionEvent::FriendOffline(_) => 1,
            TransitionEvent::TitleChange(_) => 2,
            TransitionEvent::TitleStateChange(_) => 3,
        }
    }

    pub fn transition(&self) -> &Transition {
        match self {
            TransitionEvent::FriendOnline(t)
            | TransitionEvent::FriendOffline(t)
            | TransitionEvent::TitleChange(t)
            | TransitionEvent::TitleStateChange(t) => t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Online,
    Offline,
    Title,
    TitleState,
}

fn title_id(game: Option<&Game>) -> Option<&str> {
    game.map(Game::title_id)
}

/// At most one change, in order of precedence
fn classify(previous: &Presence, current: &Presence) -> Option<Change> {
    match (previous.state.partition(), current.state.partition()) {
        (Partition::OfflineLike, Partition::OnlineLike) => Some(Change::Online),
        (Partition::OnlineLike, Partition::OfflineLike) => Some(Change::Offline),
        (Partition::OfflineLike, Partition::OfflineLike) => None,
        (Partition::OnlineLike, Partition::OnlineLike) => {
            let (previous_game, current_game) = (previous.game.as_ref(), current.game.as_ref());

            if title_id(previous_game) != title_id(current_game) {
                Some(Change::Title)
            } else if previous_game.map(|g| &g.sys_description)
                != current_game.map(|g| &g.sys_description)
            {
                Some(Change::TitleState)
            } else {
                None
            }
        }
    }
}

fn event(subject: Subject, previous: &Presence, current: &Presence) -> Option<TransitionEvent> {
    let change = classify(previous, current)?;
    let transition = Transition {
        subject,
        presence: current.clone(),
        previous: Some(previous.clone()),
    };

    Some(match change {
        Change::Online => TransitionEvent::FriendOnline(transition),
        Change::Offline => TransitionEvent::FriendOffline(transition),
        Change::Title => TransitionEvent::TitleChange(transition),
        Change::TitleState => TransitionEvent::TitleStateChange(transition),
    })
}

/// Transitions from `previous` to `current`.
///
/// The authenticated user comes first, then friends in `current` order.
/// Friends not in `previous` produce nothing.
pub fn diff(previous: Option<&PresenceSnapshot>, current: &PresenceSnapshot) -> Vec<TransitionEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut events = Vec::new();

    let subject = Subject::CurrentUser {
        nsa_id: current.user.nsa_id.clone(),
        name: current.user.name.clone(),
    };
    events.extend(event(
        subject,
        &previous.user.presence,
        &current.user.presence,
    ));

    let known: HashMap<&str, &FriendPresence> = previous
        .friends
        .iter()
        .map(|friend| (friend.nsa_id.as_str(), friend))
        .collect();

    for friend in &current.friends {
        let Some(before) = known.get(friend.nsa_id.as_str()) else {
            continue;
        };

        let subject = Subject::Friend {
            nsa_id: friend.nsa_id.clone(),
            name: friend.name.clone(),
        };
        events.extend(event(subject, &before.presence, &friend.presence));
    }

    events
}
