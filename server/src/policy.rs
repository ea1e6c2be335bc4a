//! Capability scoped tokens issued by the znc proxy

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    errors::{NxapiError, NxapiResult},
    store::{keys, Storage, StorageExt},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Announcements,
    ListFriends,
    ListFriendsPresence,
    Friend,
    FriendPresence,
    WebServices,
    ActiveEvent,
    CurrentUser,
    CurrentUserPresence,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::Announcements => "announcements",
            Capability::ListFriends => "list_friends",
            Capability::ListFriendsPresence => "list_friends_presence",
            Capability::Friend => "friend",
            Capability::FriendPresence => "friend_presence",
            Capability::WebServices => "webservices",
            Capability::ActiveEvent => "activeevent",
            Capability::CurrentUser => "current_user",
            Capability::CurrentUserPresence => "current_user_presence",
        }
    }
}

/// What a proxy token may be used for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFlags {
    #[serde(default)]
    pub announcements: bool,
    #[serde(default)]
    pub list_friends: bool,
    #[serde(default)]
    pub list_friends_presence: bool,
    #[serde(default)]
    pub friend: bool,
    #[serde(default)]
    pub friend_presence: bool,
    #[serde(default)]
    pub webservices: bool,
    #[serde(default)]
    pub activeevent: bool,
    #[serde(default)]
    pub current_user: bool,
    #[serde(default)]
    pub current_user_presence: bool,
    /// Friend nsa ids the token may see. All friends when unset.
    #[serde(default)]
    pub friends: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPolicy {
    /// Nintendo Account id the token acts as
    pub user_id: String,
    #[serde(flatten)]
    pub flags: PolicyFlags,
    pub created_at: i64,
}

impl AuthPolicy {
    pub fn allows(&self, capability: Capability) -> bool {
        let flags = &self.flags;
        match capability {
            Capability::Announcements => flags.announcements,
            Capability::ListFriends => flags.list_friends,
            Capability::ListFriendsPresence => flags.list_friends_presence,
            Capability::Friend => flags.friend,
            Capability::FriendPresence => flags.friend_presence,
            Capability::WebServices => flags.webservices,
            Capability::ActiveEvent => flags.activeevent,
            Capability::CurrentUser => flags.current_user,
            Capability::CurrentUserPresence => flags.current_user_presence,
        }
    }

    pub fn require(&self, capability: Capability) -> NxapiResult<()> {
        if self.allows(capability) {
            Ok(())
        } else {
            Err(NxapiError::PolicyDenied(format!(
                "token does not allow {}",
                capability.name()
            )))
        }
    }

    /// Whether the allowlist includes a friend
    pub fn allows_friend(&self, nsa_id: &str) -> bool {
        self.flags
            .friends
            .as_ref()
            .map_or(true, |friends| friends.iter().any(|id| id == nsa_id))
    }
}

/// A proxy token as listed to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyToken {
    pub token: String,
    pub policy: AuthPolicy,
}

#[derive(Clone)]
pub struct PolicyStore {
    store: Arc<dyn Storage>,
}

impl PolicyStore {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        user_id: &str,
        flags: PolicyFlags,
        now_ms: i64,
    ) -> NxapiResult<ProxyToken> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let policy = AuthPolicy {
            user_id: user_id.to_string(),
            flags,
            created_at: now_ms,
        };

        self.store
            .set(&keys::proxy_auth_policy(&token), &policy)
            .await?;

        let mut tokens = self.tokens_for(user_id).await?;
        tokens.push(token.clone());
        self.store
            .set(&keys::proxy_auth_policies(user_id), &tokens)
            .await?;

        info!(user_id, "Created proxy token");
        Ok(ProxyToken { token, policy })
    }

    pub async fn get(&self, token: &str) -> NxapiResult<Option<AuthPolicy>> {
        self.store.get(&keys::proxy_auth_policy(token)).await
    }

    pub async fn revoke(&self, token: &str) -> NxapiResult<()> {
        let Some(policy) = self.get(token).await? else {
            return Err(NxapiError::NotFound("proxy token".to_string()));
        };

        self.store.remove_item(&keys::proxy_auth_policy(token)).await?;

        let tokens: Vec<String> = self
            .tokens_for(&policy.user_id)
            .await?
            .into_iter()
            .filter(|t| t != token)
            .collect();
        self.store
            .set(&keys::proxy_auth_policies(&policy.user_id), &tokens)
            .await?;

        info!(user_id = %policy.user_id, "Revoked proxy token");
        Ok(())
    }

    pub async fn list(&self, user_id: &str) -> NxapiResult<Vec<ProxyToken>> {
        let mut tokens = Vec::new();
        for token in self.tokens_for(user_id).await? {
            if let Some(policy) = self.get(&token).await? {
                tokens.push(ProxyToken { token, policy });
            }
        }

        Ok(tokens)
    }

    async fn tokens_for(&self, user_id: &str) -> NxapiResult<Vec<String>> {
        Ok(self
            .store
            .get(&keys::proxy_auth_policies(user_id))
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn policies() -> PolicyStore {
        PolicyStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let policies = policies();
        let flags = PolicyFlags {
            list_friends: true,
            ..Default::default()
        };

        let created = policies.create("na1", flags.clone(), 1_000).await.unwrap();
        let policy = policies.get(&created.token).await.unwrap().unwrap();
        assert_eq!(policy.flags, flags);
        assert_eq!(policy.user_id, "na1");

        let listed = policies.list("na1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].token, created.token);
        assert!(policies.list("na2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke() {
        let policies = policies();
        let created = policies
            .create("na1", PolicyFlags::default(), 1_000)
            .await
            .unwrap();

        policies.revoke(&created.token).await.unwrap();

        assert!(policies.get(&created.token).await.unwrap().is_none());
        assert!(policies.list("na1").await.unwrap().is_empty());
        assert!(matches!(
            policies.revoke(&created.token).await,
            Err(NxapiError::NotFound(_))
        ));
    }

    #[test]
    fn test_capabilities_and_allowlist() {
        let policy = AuthPolicy {
            user_id: "na1".to_string(),
            flags: PolicyFlags {
                friend: true,
                friends: Some(vec!["abc".to_string()]),
                ..Default::default()
            },
            created_at: 0,
        };

        assert!(policy.require(Capability::Friend).is_ok());
        assert!(matches!(
            policy.require(Capability::ListFriends),
            Err(NxapiError::PolicyDenied(_))
        ));
        assert!(policy.allows_friend("abc"));
        assert!(!policy.allows_friend("def"));
    }

    #[test]
    fn test_policy_json_is_flat() {
        let policy: AuthPolicy = serde_json::from_value(serde_json::json!({
            "user_id": "na1",
            "announcements": true,
            "created_at": 5
        }))
        .unwrap();

        assert!(policy.allows(Capability::Announcements));
        assert!(!policy.allows(Capability::WebServices));
        assert!(policy.allows_friend("anyone"));
    }
}
