//! Shared request pipeline
//!
//! Attaches the bearer credential to every outgoing request, normalises every
//! failure, and on a 401 clears the persisted session before telling the
//! registered listeners about it.

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{normalize, ApiError, RawFailure};
use crate::auth::storage::{SessionStorage, TOKEN_KEY};
use crate::config::ApiConfig;

/// Side effects the pipeline reports to the rest of the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiEvent {
    /// The backend rejected the credential; the local session is gone
    Unauthorized { path: String },
}

pub type Listener = Arc<dyn Fn(&ApiEvent) + Send + Sync>;

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    config: ApiConfig,
    storage: Arc<dyn SessionStorage>,
    /// Credential installed by login, used when storage holds none
    default_token: RwLock<Option<String>>,
    listeners: RwLock<Vec<Listener>>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, storage: Arc<dyn SessionStorage>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(careconnect_core::meta::user_agent())
            .timeout(config.timeout)
            .cookie_store(config.with_credentials)
            .build()?;

        tracing::debug!(
            "[API] {} client for {}",
            config.environment,
            config.base_url
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                config,
                storage,
                default_token: RwLock::new(None),
                listeners: RwLock::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.inner.storage
    }

    /// Register a listener for pipeline events
    pub fn subscribe(&self, listener: Listener) {
        self.inner.listeners.write().push(listener);
    }

    pub fn set_default_token(&self, token: &str) {
        *self.inner.default_token.write() = Some(token.to_string());
    }

    pub fn clear_default_token(&self) {
        *self.inner.default_token.write() = None;
    }

    /// Credential the next request will carry
    pub fn bearer_token(&self) -> Option<String> {
        match self.inner.storage.get(TOKEN_KEY) {
            Ok(Some(token)) => return Some(token),
            Ok(None) => {}
            Err(e) => tracing::warn!("[API] Failed to read stored token: {:?}", e),
        }
        self.inner.default_token.read().clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        decode(self.get_value(path).await?)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        decode(self.post_value(path, body).await?)
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        decode(self.put_value(path, body).await?)
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        decode(self.delete_value(path).await?)
    }

    pub async fn get_value(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(Method::GET, path, |req| req).await
    }

    pub async fn post_value<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        self.execute(Method::POST, path, |req| req.json(body)).await
    }

    pub async fn put_value<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        self.execute(Method::PUT, path, |req| req.json(body)).await
    }

    pub async fn delete_value(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(Method::DELETE, path, |req| req).await
    }

    /// Upload a multipart form (file uploads)
    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<Value, ApiError> {
        self.execute(Method::POST, path, |req| req.multipart(form)).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Value, ApiError> {
        let url = self.inner.config.endpoint(path);
        let mut request = build(self.inner.http.request(method.clone(), &url));
        if let Some(token) = self.bearer_token() {
            request = request.bearer_auth(token);
        }

        tracing::debug!("[API] {} {}", method, path);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(&method, path, RawFailure::from_transport(&e))),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Err(self.fail(&method, path, RawFailure::from_transport(&e))),
        };

        if !status.is_success() {
            return Err(self.fail(&method, path, RawFailure::from_status(status, &body)));
        }

        tracing::debug!("[API] {} {} -> {}", method, path, status.as_u16());

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(ApiError::invalid_body)
    }

    fn fail(&self, method: &Method, path: &str, failure: RawFailure) -> ApiError {
        let error = normalize(&failure);
        tracing::warn!("[API] {} {} failed: {} ({})", method, path, error, failure.text);
        if error.is_unauthorized() {
            self.force_logout(path);
        }
        error
    }

    fn force_logout(&self, path: &str) {
        if let Err(e) = self.inner.storage.clear_session() {
            tracing::error!("[API] Failed to clear session after 401: {:?}", e);
        }
        self.clear_default_token();

        let event = ApiEvent::Unauthorized {
            path: path.to_string(),
        };
        // snapshot: a listener may call subscribe()
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            listener(&event);
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(ApiError::invalid_body)
}
