//! Authenticated HTTP gateway.
//!
//! Every outbound call goes through `Gateway::send`, which attaches the
//! current bearer token and recovers from one authorization failure per
//! request by refreshing the session and replaying the request. Terminal
//! authentication failures all end in the same forced-logout path.
//!
//! Refresh exchanges are coalesced: while one is in flight, every other
//! request that needs a refresh awaits the same shared future instead of
//! spending the refresh token a second time.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result as AnyResult;
use chrono::Utc;
use futures::future::FutureExt;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::refresh::{RefreshError, RefreshFailure, RefreshOutcome, Renewed};
use crate::auth::{
    AuthResponse, CredentialBundle, ProactiveRefresh, RefreshContext, SessionEvent, SessionStore,
};
use crate::routes::LoginRedirect;

use super::error::{ApiError, Result};

/// Refresh-token exchange endpoint
pub const REFRESH_PATH: &str = "/api/auth/refresh-token";

/// Which view issued a request; used to resume navigation after a forced
/// logout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub origin: Option<String>,
}

impl RequestContext {
    pub fn from_origin(path: impl Into<String>) -> Self {
        Self {
            origin: Some(path.into()),
        }
    }
}

/// What a 401 means for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedPolicy {
    /// Session expired: refresh and replay once, then force logout.
    Refresh,
    /// Bad credentials (login and the like): surface as a server error.
    Surface,
}

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub context: RequestContext,
    pub on_unauthorized: UnauthorizedPolicy,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            context: RequestContext::default(),
            on_unauthorized: UnauthorizedPolicy::Refresh,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn context(mut self, context: &RequestContext) -> Self {
        self.context = context.clone();
        self
    }

    /// Treat a 401 as a plain error instead of an expired session.
    pub fn surface_unauthorized(mut self) -> Self {
        self.on_unauthorized = UnauthorizedPolicy::Surface;
        self
    }
}

/// Position of a request in its retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Replay,
}

struct Inner {
    http: Client,
    base_url: String,
    store: Arc<SessionStore>,
}

/// HTTP gateway shared by every API wrapper.
/// Clone is cheap - all clones share the connection pool. Refresh state
/// lives in the session store, so separate gateways over one store still
/// share a single exchange.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(base_url: &str, timeout: Duration, store: Arc<SessionStore>) -> AnyResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url, store))
    }

    /// Build a gateway over an existing client, registering it as a
    /// proactive refresh hook on the store.
    pub fn with_client(http: Client, base_url: &str, store: Arc<SessionStore>) -> Self {
        let inner = Arc::new(Inner {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
        });
        inner.store.add_refresh_hook(Arc::new(ProactiveHandle {
            inner: Arc::downgrade(&inner),
        }));
        Self { inner }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Send a request, recovering from one authorization failure.
    ///
    /// 2xx bodies are returned as JSON (`null` for an empty body). A 401 is
    /// never returned for `UnauthorizedPolicy::Refresh` requests: the caller
    /// sees either the replayed request's outcome or `LoginRequired`.
    pub async fn send(&self, spec: &RequestSpec) -> Result<Value> {
        let (mut token, mut generation) = self.inner.store.token_snapshot();
        let mut attempt = Attempt::Initial;

        loop {
            let outcome = self.inner.dispatch(spec, token.as_deref()).await;
            let recoverable = spec.on_unauthorized == UnauthorizedPolicy::Refresh;

            match outcome {
                Err(ApiError::Unauthorized) if recoverable && attempt == Attempt::Initial => {
                    attempt = Attempt::Replay;
                    debug!(path = %spec.path, "Unauthorized, refreshing session");
                    match self.inner.renew(token.as_deref()).await {
                        Ok(renewed) => {
                            token = Some(renewed.token);
                            generation = renewed.generation;
                        }
                        Err(e) => {
                            warn!(path = %spec.path, reason = %e.reason, "Token refresh failed");
                            return Err(self.inner.force_logout(&spec.context, e.generation));
                        }
                    }
                }
                Err(ApiError::Unauthorized) if recoverable => {
                    info!(path = %spec.path, "Unauthorized after refresh");
                    return Err(self.inner.force_logout(&spec.context, generation));
                }
                other => return other,
            }
        }
    }

    pub async fn send_as<T: DeserializeOwned>(&self, spec: &RequestSpec) -> Result<T> {
        let value = self.send(spec).await?;
        serde_json::from_value(value).map_err(|e| {
            ApiError::InvalidResponse(format!("Unexpected response shape from {}: {}", spec.path, e))
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, context: &RequestContext) -> Result<T> {
        self.send_as(&RequestSpec::get(path).context(context)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Vec<(String, String)>,
        context: &RequestContext,
    ) -> Result<T> {
        self.send_as(&RequestSpec::get(path).query(query).context(context))
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        context: &RequestContext,
    ) -> Result<T> {
        self.send_as(&RequestSpec::post(path).json(body)?.context(context))
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        context: &RequestContext,
    ) -> Result<T> {
        self.send_as(&RequestSpec::put(path).json(body)?.context(context))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str, context: &RequestContext) -> Result<T> {
        self.send_as(&RequestSpec::delete(path).context(context)).await
    }

    /// Refresh the session now, coalescing with any refresh in flight.
    /// Returns true if the store holds a renewed token afterwards.
    pub async fn refresh_now(&self) -> bool {
        let token = self.inner.store.access_token();
        match self.inner.renew(token.as_deref()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(reason = %e.reason, "Token refresh failed");
                false
            }
        }
    }
}

impl Inner {
    async fn dispatch(&self, spec: &RequestSpec, token: Option<&str>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, spec.path);

        let mut request = self.http.request(spec.method.clone(), &url);
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(ref body) = spec.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            let error = ApiError::from_transport(&e);
            match error {
                ApiError::InvalidRequest(_) => warn!(url = %url, error = %e, "Could not build request"),
                _ => warn!(url = %url, error = %e, "No response from server"),
            }
            error
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to read response body from {}: {}", url, e))
        })?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
            })
        } else if status == StatusCode::UNAUTHORIZED && spec.on_unauthorized == UnauthorizedPolicy::Surface {
            Err(ApiError::ServerError {
                status,
                message: ApiError::server_message(&body),
            })
        } else {
            debug!(url = %url, status = status.as_u16(), "Request failed");
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Obtain a token to replay a request that was rejected while carrying
    /// `sent_with`.
    async fn renew(self: &Arc<Self>, sent_with: Option<&str>) -> RefreshOutcome {
        let Some(ctx) = self.store.refresh_context() else {
            return Err(RefreshError {
                reason: RefreshFailure::NoSession,
                generation: self.store.generation(),
            });
        };

        // Someone else already replaced the token this request was sent with
        if sent_with != Some(ctx.access_token.as_str()) {
            debug!("Session changed while request was in flight, replaying with current token");
            return Ok(Renewed {
                token: ctx.access_token,
                generation: ctx.generation,
            });
        }

        let generation = ctx.generation;
        let coordinator = self.store.refresh_coordinator();
        let inner = Arc::clone(self);
        let outcome = coordinator
            .join_or_start(generation, move || Self::exchange(inner, ctx).boxed())
            .await;
        coordinator.finish(generation, &outcome);

        match outcome {
            Err(RefreshError {
                reason: RefreshFailure::Superseded,
                ..
            }) => {
                // A newer login may have landed while we were refreshing
                match self.store.token_snapshot() {
                    (Some(token), generation) => Ok(Renewed { token, generation }),
                    (None, generation) => Err(RefreshError {
                        reason: RefreshFailure::Superseded,
                        generation,
                    }),
                }
            }
            other => other,
        }
    }

    /// One refresh-token exchange. Runs at most once per session generation.
    async fn exchange(inner: Arc<Self>, ctx: RefreshContext) -> RefreshOutcome {
        let fail = |reason| RefreshError {
            reason,
            generation: ctx.generation,
        };

        let Some(ref refresh_token) = ctx.refresh_token else {
            return Err(fail(RefreshFailure::NoRefreshToken));
        };
        if ctx.refresh_expires_at.is_some_and(|at| Utc::now() >= at) {
            return Err(fail(RefreshFailure::RefreshExpired));
        }

        debug!(remember_me = ctx.remember_me, "Exchanging refresh token");
        let spec = RequestSpec::post(REFRESH_PATH).surface_unauthorized();
        let spec = RequestSpec {
            body: Some(json!({
                "refresh_token": refresh_token,
                "remember_me": ctx.remember_me,
            })),
            ..spec
        };

        let value = inner
            .dispatch(&spec, None)
            .await
            .map_err(|e| fail(RefreshFailure::Rejected(e.to_string())))?;
        let response: AuthResponse = serde_json::from_value(value)
            .map_err(|e| fail(RefreshFailure::Rejected(format!("invalid refresh response: {}", e))))?;

        let bundle = CredentialBundle::from_response(response, ctx.remember_me);
        let token = bundle.access_token.clone();
        match inner.store.save_if_current(bundle, ctx.generation) {
            Some(generation) => {
                info!("Session token refreshed");
                inner.store.publish(SessionEvent::Refreshed);
                Ok(Renewed { token, generation })
            }
            None => Err(fail(RefreshFailure::Superseded)),
        }
    }

    /// End the session observed at `generation` and build the error the
    /// caller sees. A newer session is left alone.
    fn force_logout(&self, context: &RequestContext, generation: u64) -> ApiError {
        let redirect = LoginRedirect::new(context.origin.clone());
        if self.store.clear_if_current(generation) {
            info!(return_to = ?redirect.return_to, "Session ended, login required");
            self.store.publish(SessionEvent::LoggedOut {
                redirect: redirect.clone(),
            });
        }
        ApiError::LoginRequired(redirect)
    }
}

/// Store-side handle for proactive refresh. Weak so the store does not keep
/// the gateway alive.
struct ProactiveHandle {
    inner: Weak<Inner>,
}

impl ProactiveRefresh for ProactiveHandle {
    fn trigger(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, skipping proactive refresh");
            return;
        };
        let Some(ctx) = inner.store.refresh_context() else {
            return;
        };
        if ctx.refresh_token.is_none() || !inner.store.refresh_coordinator().begin_proactive() {
            return;
        }

        runtime.spawn(async move {
            if let Err(e) = inner.renew(Some(ctx.access_token.as_str())).await {
                warn!(reason = %e.reason, "Proactive token refresh failed");
                // A spent or rejected refresh token is never exchanged twice
                if e.reason.ends_session() {
                    inner.force_logout(&RequestContext::default(), e.generation);
                }
            }
            inner.store.refresh_coordinator().end_proactive();
        });
    }

    fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}
