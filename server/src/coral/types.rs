use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{NxapiError, NxapiResult};

/// Coral `status` values
pub mod status {
    pub const OK: i64 = 0;
    pub const BAD_REQUEST: i64 = 9400;
    pub const INVALID_TOKEN: i64 = 9403;
    pub const TOKEN_EXPIRED: i64 = 9404;
    pub const UNAUTHORISED: i64 = 9406;
    pub const UPGRADE_REQUIRED: i64 = 9427;
    pub const MEMBERSHIP_REQUIRED: i64 = 9450;
    pub const THROTTLED: i64 = 9460;
    pub const SERVICE_MAINTENANCE: i64 = 9500;
}

/// Envelope every Coral response is wrapped in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoralResponse<T> {
    pub status: i64,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl<T> CoralResponse<T> {
    pub fn into_result(self) -> NxapiResult<T> {
        match self.status {
            status::OK => self.result.ok_or_else(|| NxapiError::Upstream {
                service: "coral",
                status: status::OK,
                message: "response has no result".to_string(),
            }),
            status::TOKEN_EXPIRED => Err(NxapiError::TokenExpired),
            status::INVALID_TOKEN | status::UNAUTHORISED => Err(NxapiError::InvalidToken(
                self.error_message
                    .unwrap_or_else(|| "coral rejected the credential".to_string()),
            )),
            status::MEMBERSHIP_REQUIRED => Err(NxapiError::MembershipRequired),
            status => Err(NxapiError::Upstream {
                service: "coral",
                status,
                message: self
                    .error_message
                    .unwrap_or_else(|| describe_status(status).to_string()),
            }),
        }
    }
}

fn describe_status(status: i64) -> &'static str {
    match status {
        status::BAD_REQUEST => "bad request",
        status::UPGRADE_REQUIRED => "app version no longer accepted, raise NXAPI_CORAL_VERSION",
        status::THROTTLED => "rate limited",
        status::SERVICE_MAINTENANCE => "service under maintenance",
        _ => "unknown error",
    }
}

/// Whether a presence state counts as online for change detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    OnlineLike,
    OfflineLike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceState {
    Online,
    Playing,
    Inactive,
    Offline,
    /// Any state Coral adds later
    #[serde(other)]
    Unknown,
}

impl PresenceState {
    /// New states have to be classified here before transitions involving
    /// them are detected
    pub fn partition(self) -> Partition {
        match self {
            PresenceState::Online | PresenceState::Playing => Partition::OnlineLike,
            PresenceState::Inactive | PresenceState::Offline | PresenceState::Unknown => {
                Partition::OfflineLike
            }
        }
    }

    pub fn is_online(self) -> bool {
        self.partition() == Partition::OnlineLike
    }
}

/// The title a user is playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub name: String,
    #[serde(default)]
    pub image_uri: String,
    #[serde(default)]
    pub shop_uri: String,
    #[serde(default)]
    pub total_play_time: i64,
    #[serde(default)]
    pub first_played_at: i64,
    /// In-game status text
    #[serde(default)]
    pub sys_description: String,
}

impl Game {
    /// The 16 digit title id from the eShop URI, or the name when there isn't one
    pub fn title_id(&self) -> &str {
        self.shop_uri
            .split_once("/titles/")
            .map(|(_, rest)| rest)
            .and_then(|rest| rest.get(..16))
            .filter(|id| id.chars().all(|c| c.is_ascii_hexdigit()))
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub state: PresenceState,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub logout_at: i64,
    /// Coral sends `{}` when the user isn't playing anything
    #[serde(
        default,
        serialize_with = "serialize_game",
        deserialize_with = "deserialize_game"
    )]
    pub game: Option<Game>,
}

fn serialize_game<S: Serializer>(game: &Option<Game>, serializer: S) -> Result<S::Ok, S::Error> {
    match game {
        Some(game) => game.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

fn deserialize_game<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Game>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub id: i64,
    pub nsa_id: String,
    #[serde(default)]
    pub image_uri: String,
    pub name: String,
    #[serde(default)]
    pub is_favorite_friend: bool,
    #[serde(default)]
    pub is_server_friend: bool,
    #[serde(default)]
    pub friend_created_at: i64,
    pub presence: Presence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendList {
    pub friends: Vec<Friend>,
}

/// Coral account as returned by login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoralUser {
    pub id: i64,
    pub nsa_id: String,
    #[serde(default)]
    pub image_uri: String,
    pub name: String,
    #[serde(default)]
    pub support_id: String,
    #[serde(default)]
    pub is_child_restricted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(flatten)]
    pub user: CoralUser,
    pub presence: Presence,
    #[serde(default)]
    pub links: serde_json::Value,
    #[serde(default)]
    pub permissions: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebApiServerCredential {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLogin {
    pub user: CoralUser,
    pub web_api_server_credential: WebApiServerCredential,
    #[serde(default)]
    pub firebase_credential: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebService {
    pub id: u64,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub image_uri: String,
    #[serde(default)]
    pub white_list: Vec<String>,
    #[serde(default)]
    pub custom_attributes: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebServiceToken {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub announcement_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub distribution_date: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEvent {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_presence_with_empty_game() {
        let presence: Presence = serde_json::from_value(json!({
            "state": "OFFLINE",
            "updatedAt": 1700000000,
            "logoutAt": 1700000000,
            "game": {}
        }))
        .unwrap();

        assert_eq!(presence.state, PresenceState::Offline);
        assert_eq!(presence.game, None);
        assert_eq!(serde_json::to_value(&presence).unwrap()["game"], json!({}));
    }

    #[test]
    fn test_unknown_presence_state_is_offline_like() {
        let presence: Presence = serde_json::from_value(json!({
            "state": "AWAY",
            "game": {}
        }))
        .unwrap();

        assert_eq!(presence.state, PresenceState::Unknown);
        assert_eq!(presence.state.partition(), Partition::OfflineLike);
    }

    #[test]
    fn test_title_id_from_shop_uri() {
        let game = Game {
            name: "Splatoon 3".to_string(),
            image_uri: String::new(),
            shop_uri: "https://ec.nintendo.com/apps/0100c2500fc20000/GB".to_string(),
            total_play_time: 0,
            first_played_at: 0,
            sys_description: String::new(),
        };
        // Not a /titles/ URI
        assert_eq!(game.title_id(), "Splatoon 3");

        let game = Game {
            shop_uri: "https://ec.nintendo.com/apps/titles/0100c2500fc20000?region=GB".to_string(),
            ..game
        };
        assert_eq!(game.title_id(), "0100c2500fc20000");
    }

    #[test]
    fn test_coral_status_mapping() {
        let response: CoralResponse<FriendList> = serde_json::from_value(json!({
            "status": 9450,
            "errorMessage": "Membership required",
            "correlationId": "abc"
        }))
        .unwrap();
        assert!(matches!(
            response.into_result(),
            Err(NxapiError::MembershipRequired)
        ));

        let response: CoralResponse<FriendList> = serde_json::from_value(json!({
            "status": 9404,
            "correlationId": "abc"
        }))
        .unwrap();
        assert!(matches!(response.into_result(), Err(NxapiError::TokenExpired)));
    }

    #[test]
    fn test_throttled_status_without_message_is_described() {
        let response: CoralResponse<FriendList> = serde_json::from_value(json!({
            "status": 9460,
            "correlationId": "abc"
        }))
        .unwrap();

        match response.into_result() {
            Err(err @ NxapiError::Upstream { status: 9460, .. }) => {
                assert!(err.is_retryable());
                assert!(err.to_string().contains("rate limited"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_current_user_flattens_coral_user() {
        let user: CurrentUser = serde_json::from_value(json!({
            "id": 1234,
            "nsaId": "0123456789abcdef",
            "imageUri": "https://cdn/mii.png",
            "name": "Player",
            "supportId": "0000-0000-0000",
            "isChildRestricted": false,
            "presence": { "state": "ONLINE", "updatedAt": 1, "logoutAt": 0, "game": {} }
        }))
        .unwrap();

        assert_eq!(user.user.nsa_id, "0123456789abcdef");
        assert!(user.presence.state.is_online());
    }
}
