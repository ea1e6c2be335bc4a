use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::{
    coral::{
        proxy::{
            ActiveEventResponse, AnnouncementsResponse, WebServiceTokenResponse,
            WebServicesResponse,
        },
        types::{Friend, Presence},
        CoralApi,
    },
    errors::{NxapiError, ServerResult},
    policy::Capability,
};

use super::{FriendsBody, ProxyState, ZncAuth};

fn without_presence<T: serde::Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut value {
        map.remove("presence");
    }
    Ok(value)
}

async fn find_friend(
    state: &ProxyState,
    auth: &ZncAuth,
    nsa_id: &str,
) -> ServerResult<(Friend, i64)> {
    if !auth.allows_friend(nsa_id) {
        return Err(NxapiError::PolicyDenied(format!("token does not allow friend {}", nsa_id)).into());
    }

    let (friends, updated) = state.friends(auth).await?;
    let friend = friends
        .into_iter()
        .find(|friend| friend.nsa_id == nsa_id)
        .ok_or_else(|| NxapiError::NotFound(format!("friend {}", nsa_id)))?;

    Ok((friend, updated))
}

pub(super) async fn announcements(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Json<AnnouncementsResponse>> {
    auth.require(Capability::Announcements)?;
    let announcements = state.coral(&auth).await?.announcements().await?;

    Ok(Json(AnnouncementsResponse {
        announcements,
        updated: state.now_ms(),
    }))
}

pub(super) async fn friends(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Json<FriendsBody>> {
    auth.require(Capability::ListFriends)?;
    let with_presence = auth.allows(Capability::ListFriendsPresence);

    let (friends, updated) = state.friends(&auth).await?;
    let friends = friends
        .iter()
        .filter(|friend| auth.allows_friend(&friend.nsa_id))
        .map(|friend| {
            if with_presence {
                serde_json::to_value(friend)
            } else {
                without_presence(friend)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(FriendsBody { friends, updated }))
}

pub(super) async fn friend(
    State(state): State<ProxyState>,
    auth: ZncAuth,
    Path(nsa_id): Path<String>,
) -> ServerResult<Json<Value>> {
    auth.require(Capability::Friend)?;
    let (friend, updated) = find_friend(&state, &auth, &nsa_id).await?;

    let friend = if auth.allows(Capability::FriendPresence) {
        serde_json::to_value(&friend)?
    } else {
        without_presence(&friend)?
    };

    Ok(Json(serde_json::json!({ "friend": friend, "updated": updated })))
}

pub(super) async fn friend_presence(
    State(state): State<ProxyState>,
    auth: ZncAuth,
    Path(nsa_id): Path<String>,
) -> ServerResult<Json<Presence>> {
    auth.require(Capability::FriendPresence)?;
    let (friend, _) = find_friend(&state, &auth, &nsa_id).await?;

    Ok(Json(friend.presence))
}

pub(super) async fn web_services(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Json<WebServicesResponse>> {
    auth.require(Capability::WebServices)?;
    let webservices = state.coral(&auth).await?.web_services().await?;

    Ok(Json(WebServicesResponse {
        webservices,
        updated: state.now_ms(),
    }))
}

pub(super) async fn web_service_token(
    State(state): State<ProxyState>,
    auth: ZncAuth,
    Path(id): Path<u64>,
) -> ServerResult<Json<WebServiceTokenResponse>> {
    auth.require_session_token()?;
    let token = state.coral(&auth).await?.web_service_token(id).await?;

    Ok(Json(WebServiceTokenResponse {
        token,
        updated: state.now_ms(),
    }))
}

pub(super) async fn active_event(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Json<ActiveEventResponse>> {
    auth.require(Capability::ActiveEvent)?;
    let activeevent = state.coral(&auth).await?.active_event().await?;

    Ok(Json(ActiveEventResponse {
        activeevent,
        updated: state.now_ms(),
    }))
}

pub(super) async fn user(State(state): State<ProxyState>, auth: ZncAuth) -> ServerResult<Json<Value>> {
    auth.require(Capability::CurrentUser)?;
    let user = state.coral(&auth).await?.current_user().await?;

    let user = if auth.allows(Capability::CurrentUserPresence) {
        serde_json::to_value(&user)?
    } else {
        without_presence(&user)?
    };

    Ok(Json(serde_json::json!({ "user": user, "updated": state.now_ms() })))
}

pub(super) async fn user_presence(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Json<Presence>> {
    auth.require(Capability::CurrentUserPresence)?;
    let user = state.coral(&auth).await?.current_user().await?;

    Ok(Json(user.presence))
}
