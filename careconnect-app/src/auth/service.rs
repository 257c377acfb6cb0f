//! Session store: login, registration, logout and profile updates

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use super::state::{AuthState, SessionHandle};
use super::storage::{SessionStorage, TOKEN_KEY, USER_KEY};
use crate::api::{ApiClient, ApiError, ApiEvent};
use crate::models::{ProfileEnvelope, ProfileUpdate, RegisterRequest, UserProfile};

/// How much to trust a cached profile on startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RehydrationPolicy {
    /// Use the cached profile as-is when one exists
    #[default]
    TrustCache,
    /// Always fetch the profile to validate the stored token
    Revalidate,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend refused; `message` is its explanation or a generic one
    #[error("{message}")]
    Rejected { message: String, source: ApiError },
    #[error("not signed in")]
    NotAuthenticated,
    #[error("session storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SessionError {
    fn rejected(source: ApiError, fallback: &str) -> Self {
        let message = source
            .message()
            .map(str::to_owned)
            .unwrap_or_else(|| fallback.to_string());
        SessionError::Rejected { message, source }
    }

    /// Normalised failure behind this error, if it came from the backend
    pub fn kind(&self) -> Option<&ApiError> {
        match self {
            SessionError::Rejected { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Login / register response
#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    user: UserProfile,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// Owner of the session lifecycle
#[derive(Clone)]
pub struct SessionStore {
    client: ApiClient,
    handle: SessionHandle,
}

impl SessionStore {
    /// Create the store and subscribe it to the client's 401 events
    ///
    /// A 401 during startup rehydration is left to `initialize`, so the
    /// handle stays `Loading` until rehydration has settled.
    pub fn new(client: ApiClient, handle: SessionHandle) -> Self {
        let listener_handle = handle.clone();
        client.subscribe(Arc::new(move |event: &ApiEvent| match event {
            ApiEvent::Unauthorized { path } => {
                if listener_handle.state() == AuthState::Loading {
                    tracing::debug!("Stored session rejected on {} during startup", path);
                    return;
                }
                tracing::info!("Session rejected by backend on {}, signing out", path);
                listener_handle.transition(AuthState::Anonymous);
            }
        }));
        Self { client, handle }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    fn storage(&self) -> &Arc<dyn SessionStorage> {
        self.client.storage()
    }

    /// Initialize auth - load the persisted session
    pub async fn initialize(&self, policy: RehydrationPolicy) -> AuthState {
        self.handle.transition(AuthState::Loading);

        let next = match self.rehydrate(policy).await {
            Ok(Some((user, token))) => AuthState::Authenticated {
                user,
                token: Arc::from(token),
            },
            Ok(None) => AuthState::Anonymous,
            Err(e) => {
                tracing::warn!("Discarding persisted session: {}", e);
                self.discard_local();
                AuthState::Anonymous
            }
        };

        self.handle.transition(next.clone());
        next
    }

    async fn rehydrate(
        &self,
        policy: RehydrationPolicy,
    ) -> Result<Option<(UserProfile, String)>, SessionError> {
        let Some(token) = self.storage().get(TOKEN_KEY)? else {
            return Ok(None);
        };
        self.client.set_default_token(&token);

        if policy == RehydrationPolicy::TrustCache {
            if let Some(cached) = self.storage().get(USER_KEY)? {
                match serde_json::from_str::<UserProfile>(&cached) {
                    Ok(user) => return Ok(Some((user, token))),
                    Err(e) => tracing::warn!("Ignoring unreadable cached profile: {}", e),
                }
            }
        }

        let envelope: ProfileEnvelope = self
            .client
            .get("/user/profile")
            .await
            .map_err(|e| SessionError::rejected(e, "Session validation failed"))?;
        let user = envelope.into_profile();
        self.persist_user(&user)?;
        Ok(Some((user, token)))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        let response: AuthResponse = self
            .client
            .post("/auth/login", &json!({ "email": email, "password": password }))
            .await
            .map_err(|e| SessionError::rejected(e, "Login failed"))?;
        self.establish(response)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, SessionError> {
        let response: AuthResponse = self
            .client
            .post("/auth/register", request)
            .await
            .map_err(|e| SessionError::rejected(e, "Registration failed"))?;
        self.establish(response)
    }

    pub async fn register_caregiver(
        &self,
        request: &RegisterRequest,
    ) -> Result<UserProfile, SessionError> {
        let response: AuthResponse = self
            .client
            .post("/auth/register/caregiver", request)
            .await
            .map_err(|e| SessionError::rejected(e, "Caregiver registration failed"))?;
        self.establish(response)
    }

    fn establish(&self, response: AuthResponse) -> Result<UserProfile, SessionError> {
        let AuthResponse { token, user } = response;
        self.storage().set(TOKEN_KEY, &token)?;
        self.persist_user(&user)?;
        self.client.set_default_token(&token);

        tracing::info!("Signed in as {} ({})", user.email, user.role);
        self.handle.transition(AuthState::Authenticated {
            user: user.clone(),
            token: Arc::from(token),
        });
        Ok(user)
    }

    /// Sign out locally; the server is told on a best-effort basis
    pub async fn logout(&self) -> Result<(), SessionError> {
        if self.current_token().is_some() {
            if let Err(e) = self.client.post_value("/auth/logout", &json!({})).await {
                tracing::debug!("Server-side logout failed, continuing: {}", e);
            }
        }
        let cleared = self.storage().clear_session();
        self.client.clear_default_token();
        self.handle.transition(AuthState::Anonymous);
        cleared.map_err(SessionError::from)
    }

    /// Send a partial update; the server's copy replaces the local profile
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, SessionError> {
        let token = self.current_token().ok_or(SessionError::NotAuthenticated)?;
        let envelope: ProfileEnvelope = self
            .client
            .put("/user/profile", update)
            .await
            .map_err(|e| SessionError::rejected(e, "Profile update failed"))?;
        let user = envelope.into_profile();
        self.replace_user(user.clone(), token)?;
        Ok(user)
    }

    /// Replace the local profile without a network call
    pub fn update_user(&self, user: UserProfile) -> Result<(), SessionError> {
        let token = self.current_token().ok_or(SessionError::NotAuthenticated)?;
        self.replace_user(user, token)
    }

    pub async fn refresh_token(&self) -> Result<(), SessionError> {
        let response: RefreshResponse = self
            .client
            .post("/auth/refresh", &json!({}))
            .await
            .map_err(|e| SessionError::rejected(e, "Token refresh failed"))?;
        self.storage().set(TOKEN_KEY, &response.token)?;
        self.client.set_default_token(&response.token);
        if let Some(user) = self.handle.identity() {
            self.handle.transition(AuthState::Authenticated {
                user,
                token: Arc::from(response.token),
            });
        }
        Ok(())
    }

    /// Delete the account on the server, then drop the local session
    pub async fn delete_account(&self) -> Result<(), SessionError> {
        self.client
            .delete_value("/user/account")
            .await
            .map_err(|e| SessionError::rejected(e, "Failed to delete account"))?;
        self.discard_local();
        self.handle.transition(AuthState::Anonymous);
        Ok(())
    }

    fn current_token(&self) -> Option<String> {
        self.handle
            .token()
            .map(|t| t.to_string())
            .or_else(|| self.storage().get(TOKEN_KEY).ok().flatten())
    }

    fn replace_user(&self, user: UserProfile, token: String) -> Result<(), SessionError> {
        self.persist_user(&user)?;
        self.handle.transition(AuthState::Authenticated {
            user,
            token: Arc::from(token),
        });
        Ok(())
    }

    fn persist_user(&self, user: &UserProfile) -> Result<(), SessionError> {
        let serialized = serde_json::to_string(user).map_err(anyhow::Error::from)?;
        self.storage().set(USER_KEY, &serialized)?;
        Ok(())
    }

    fn discard_local(&self) {
        if let Err(e) = self.storage().clear_session() {
            tracing::error!("Failed to clear persisted session: {:?}", e);
        }
        self.client.clear_default_token();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::auth::storage::MemoryStorage;
    use crate::config::ApiConfig;
    use crate::test_support::StubBackend;

    fn user_json(location: &str) -> Value {
        json!({
            "_id": "687e8009655057cea853fae5",
            "name": "Kwame Addo",
            "email": "a@b.com",
            "role": "senior",
            "location": location
        })
    }

    fn store_for(backend: &StubBackend) -> (SessionStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        let config = ApiConfig::with_base_url(&backend.base_url()).unwrap();
        let client = ApiClient::new(config, storage.clone()).unwrap();
        (SessionStore::new(client, SessionHandle::new()), storage)
    }

    async fn logged_in(backend: &StubBackend) -> (SessionStore, Arc<MemoryStorage>) {
        backend.respond(
            "POST",
            "/auth/login",
            200,
            json!({ "token": "T", "user": user_json("Accra") }),
        );
        let (store, storage) = store_for(backend);
        store.login("a@b.com", "secret").await.unwrap();
        (store, storage)
    }

    #[tokio::test]
    async fn test_login_then_requests_carry_token() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;

        let login = backend.last_request().unwrap();
        assert_eq!(login.json(), json!({"email": "a@b.com", "password": "secret"}));

        assert!(store.handle().is_authenticated());
        assert_eq!(store.handle().identity().unwrap().email, "a@b.com");
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("T"));
        assert!(storage.get(USER_KEY).unwrap().is_some());

        backend.respond("GET", "/notifications", 200, json!({"notifications": []}));
        store.client().get_value("/notifications").await.unwrap();
        assert_eq!(
            backend.last_request().unwrap().authorization.as_deref(),
            Some("Bearer T")
        );
    }

    #[tokio::test]
    async fn test_login_failure_carries_backend_message() {
        let backend = StubBackend::start().await;
        backend.respond("POST", "/auth/login", 400, json!({"message": "Invalid credentials"}));
        let (store, storage) = store_for(&backend);

        let err = store.login("a@b.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(err.kind().unwrap().status(), Some(400));
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert!(!store.handle().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_failure_without_message_uses_fallback() {
        let backend = StubBackend::start().await;
        backend.respond("POST", "/auth/login", 500, json!({}));
        let (store, _storage) = store_for(&backend);

        let err = store.login("a@b.com", "secret").await.unwrap_err();
        assert_eq!(err.to_string(), "Login failed");
        assert_eq!(err.kind().unwrap().code(), "SERVER_ERROR");
    }

    #[tokio::test]
    async fn test_register_establishes_session() {
        let backend = StubBackend::start().await;
        backend.respond(
            "POST",
            "/auth/register",
            201,
            json!({ "token": "R", "user": user_json("Lagos") }),
        );
        let (store, storage) = store_for(&backend);

        let request = RegisterRequest::new("Kwame Addo", "a@b.com", "secret", crate::models::Role::Senior)
            .with_location("Lagos");
        let user = store.register(&request).await.unwrap();

        assert_eq!(user.location.as_deref(), Some("Lagos"));
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("R"));
        let sent = backend.last_request().unwrap().json();
        assert_eq!(sent["role"], "senior");
        assert_eq!(sent["location"], "Lagos");
        assert!(sent.get("healthNeeds").is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_storage_when_server_call_succeeds() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;
        backend.respond("POST", "/auth/logout", 200, json!({"message": "ok"}));

        store.logout().await.unwrap();

        assert_eq!(backend.last_request().unwrap().path, "/api/auth/logout");
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(USER_KEY).unwrap(), None);
        assert_eq!(store.client().bearer_token(), None);
        assert_eq!(store.handle().state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_logout_clears_storage_when_server_call_fails() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;
        backend.respond("POST", "/auth/logout", 500, json!({}));

        store.logout().await.unwrap();

        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.client().bearer_token(), None);
        assert_eq!(store.handle().state(), AuthState::Anonymous);
    }

    /// Loses the profile entry: it can never be removed
    #[derive(Default)]
    struct StuckProfileStorage {
        inner: MemoryStorage,
    }

    impl SessionStorage for StuckProfileStorage {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            if key == USER_KEY {
                anyhow::bail!("disk is read-only");
            }
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_logout_signs_out_even_if_storage_fails() {
        let backend = StubBackend::start().await;
        backend.respond(
            "POST",
            "/auth/login",
            200,
            json!({ "token": "T", "user": user_json("Accra") }),
        );
        backend.respond("POST", "/auth/logout", 200, json!({}));
        let storage = Arc::new(StuckProfileStorage::default());
        let config = ApiConfig::with_base_url(&backend.base_url()).unwrap();
        let client = ApiClient::new(config, storage.clone()).unwrap();
        let store = SessionStore::new(client, SessionHandle::new());
        store.login("a@b.com", "pw").await.unwrap();

        let err = store.logout().await.unwrap_err();

        assert!(matches!(err, SessionError::Storage(_)));
        assert_eq!(store.handle().state(), AuthState::Anonymous);
        assert_eq!(store.handle().identity(), None);
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.client().bearer_token(), None);
    }

    #[tokio::test]
    async fn test_repeated_logout_is_noop() {
        let backend = StubBackend::start().await;
        let (store, _storage) = store_for(&backend);
        store.initialize(RehydrationPolicy::TrustCache).await;
        let rx = store.handle().subscribe();

        store.logout().await.unwrap();
        store.logout().await.unwrap();

        assert_eq!(store.handle().state(), AuthState::Anonymous);
        assert!(rx.try_recv().is_err());
        // nothing to invalidate, so no request went out
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_anywhere_signs_out() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;
        let screen = store.handle().clone();
        let rx = screen.subscribe();
        backend.respond("GET", "/session", 401, json!({"message": "Token expired"}));

        let err = store.client().get_value("/session?seniorId=x").await.unwrap_err();

        assert_eq!(err.code(), "UNAUTHORIZED");
        assert!(screen.identity().is_none());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(seen, vec![AuthState::Anonymous]);
    }

    #[tokio::test]
    async fn test_not_found_keeps_session() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;
        let before = store.handle().state();

        let err = store.client().get_value("/session/unknown").await.unwrap_err();

        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(store.handle().state(), before);
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_update_profile_uses_server_copy() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;
        // server normalises the value it stores
        backend.respond(
            "PUT",
            "/user/profile",
            200,
            json!({ "user": user_json("Lagos, Nigeria") }),
        );

        let update = ProfileUpdate {
            location: Some("Lagos".to_string()),
            ..ProfileUpdate::default()
        };
        let user = store.update_profile(&update).await.unwrap();

        assert_eq!(backend.last_request().unwrap().json(), json!({"location": "Lagos"}));
        assert_eq!(user.location.as_deref(), Some("Lagos, Nigeria"));
        assert_eq!(
            store.handle().identity().unwrap().location.as_deref(),
            Some("Lagos, Nigeria")
        );
        let cached: UserProfile =
            serde_json::from_str(&storage.get(USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(cached.location.as_deref(), Some("Lagos, Nigeria"));
    }

    #[tokio::test]
    async fn test_update_profile_requires_session() {
        let backend = StubBackend::start().await;
        let (store, _storage) = store_for(&backend);
        let err = store
            .update_profile(&ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAuthenticated));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_without_token() {
        let backend = StubBackend::start().await;
        let (store, _storage) = store_for(&backend);
        assert!(store.handle().is_loading());

        let state = store.initialize(RehydrationPolicy::Revalidate).await;
        assert_eq!(state, AuthState::Anonymous);
        assert!(!store.handle().is_loading());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_trusts_cached_profile() {
        let backend = StubBackend::start().await;
        let (store, storage) = store_for(&backend);
        storage.set(TOKEN_KEY, "T").unwrap();
        storage.set(USER_KEY, &user_json("Accra").to_string()).unwrap();

        let state = store.initialize(RehydrationPolicy::TrustCache).await;

        assert!(matches!(state, AuthState::Authenticated { .. }));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_revalidates() {
        let backend = StubBackend::start().await;
        backend.respond("GET", "/user/profile", 200, json!({ "user": user_json("Kigali") }));
        let (store, storage) = store_for(&backend);
        storage.set(TOKEN_KEY, "T").unwrap();
        storage.set(USER_KEY, &user_json("Accra").to_string()).unwrap();

        store.initialize(RehydrationPolicy::Revalidate).await;

        let request = backend.last_request().unwrap();
        assert_eq!(request.path, "/api/user/profile");
        assert_eq!(request.authorization.as_deref(), Some("Bearer T"));
        assert_eq!(
            store.handle().identity().unwrap().location.as_deref(),
            Some("Kigali")
        );
    }

    #[tokio::test]
    async fn test_initialize_with_rejected_token() {
        let backend = StubBackend::start().await;
        backend.respond("GET", "/user/profile", 401, json!({}));
        let (store, storage) = store_for(&backend);
        storage.set(TOKEN_KEY, "stale").unwrap();

        let loading_at_rejection = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = loading_at_rejection.clone();
        let handle = store.handle().clone();
        store
            .client()
            .subscribe(Arc::new(move |_: &ApiEvent| seen.lock().push(handle.is_loading())));
        let rx = store.handle().subscribe();

        let state = store.initialize(RehydrationPolicy::TrustCache).await;

        assert_eq!(state, AuthState::Anonymous);
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.client().bearer_token(), None);
        assert_eq!(*loading_at_rejection.lock(), vec![true]);
        let transitions: Vec<_> = rx.try_iter().collect();
        assert_eq!(transitions, vec![AuthState::Loading, AuthState::Anonymous]);
    }

    #[tokio::test]
    async fn test_delete_account() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;
        backend.respond("DELETE", "/user/account", 200, json!({"message": "deleted"}));

        store.delete_account().await.unwrap();

        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.handle().state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_refresh_token() {
        let backend = StubBackend::start().await;
        let (store, storage) = logged_in(&backend).await;
        backend.respond("POST", "/auth/refresh", 200, json!({"token": "T2"}));

        store.refresh_token().await.unwrap();

        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("T2"));
        assert_eq!(store.handle().token().as_deref(), Some("T2"));
    }
}
