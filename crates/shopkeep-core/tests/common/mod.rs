//! In-process stand-in for the retail backend.
//!
//! Counts refresh exchanges and records the `Authorization` header of every
//! domain request so tests can assert on what went over the wire.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use shopkeep_core::auth::{CredentialBundle, UserProfile};
use shopkeep_core::storage::MemoryStore;
use shopkeep_core::{Gateway, SessionStore};

pub const FAR_FUTURE: &str = "2099-01-01T00:00:00Z";

#[derive(Default)]
pub struct Backend {
    valid_tokens: Mutex<HashSet<String>>,
    refresh_calls: AtomicUsize,
    refresh_bodies: Mutex<Vec<Value>>,
    seen_auth: Mutex<Vec<Option<String>>>,
    refresh_delay: Mutex<Duration>,
    /// Delay before the product list checks its caller's token
    list_delay: Mutex<Duration>,
    /// Refresh answers 401 instead of issuing tokens
    reject_refresh: Mutex<bool>,
    /// Tokens issued by refresh are rejected by domain endpoints
    refuse_refreshed: Mutex<bool>,
}

impl Backend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept_token(&self, token: &str) {
        self.valid_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn reject_refresh(&self) {
        *self.reject_refresh.lock().unwrap() = true;
    }

    pub fn refuse_refreshed_tokens(&self) {
        *self.refuse_refreshed.lock().unwrap() = true;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_bodies(&self) -> Vec<Value> {
        self.refresh_bodies.lock().unwrap().clone()
    }

    pub fn seen_auth(&self) -> Vec<Option<String>> {
        self.seen_auth.lock().unwrap().clone()
    }

    fn is_valid(&self, headers: &HeaderMap) -> bool {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen_auth.lock().unwrap().push(auth.clone());
        match auth.as_deref().and_then(|a| a.strip_prefix("Bearer ")) {
            Some(token) => self.valid_tokens.lock().unwrap().contains(token),
            None => false,
        }
    }
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"})))
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["username"] == "alice" && body["password"] == "secret123" {
        backend.accept_token("T1");
        (
            StatusCode::OK,
            Json(json!({
                "token": "T1",
                "refresh_token": "R1",
                "expires_at": FAR_FUTURE,
                "user": {"id": 1, "name": "Alice"},
            })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid username or password", "details": "Check your password"})),
        )
    }
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let n = backend.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    backend.refresh_bodies.lock().unwrap().push(body);

    let delay = *backend.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if *backend.reject_refresh.lock().unwrap() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid refresh token", "details": "expired or missing"})),
        );
    }

    let token = format!("T{}", n + 1);
    if !*backend.refuse_refreshed.lock().unwrap() {
        backend.accept_token(&token);
    }
    (
        StatusCode::OK,
        Json(json!({
            "token": token,
            "refresh_token": format!("R{}", n + 1),
            "expires_at": FAR_FUTURE,
            "user": {"id": 1, "name": "Alice"},
        })),
    )
}

async fn list_products(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let delay = *backend.list_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if !backend.is_valid(&headers) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Json(json!({"total": 1, "items": [{"id": 1, "name": "Widget"}]})),
    )
}

async fn get_product(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !backend.is_valid(&headers) {
        return unauthorized();
    }
    if id == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "Product not found"})));
    }
    (StatusCode::OK, Json(json!({"id": id, "name": "Widget"})))
}

/// Serve `backend` on an ephemeral local port and return its base URL.
pub async fn spawn(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh-token", post(refresh))
        .route("/api/products", get(list_products))
        .route("/api/products/:id", get(get_product))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn empty_store() -> Arc<SessionStore> {
    Arc::new(SessionStore::new(Box::new(MemoryStore::default())))
}

pub fn bundle(token: &str, refresh: Option<&str>, expires_at: DateTime<Utc>) -> CredentialBundle {
    CredentialBundle {
        access_token: token.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_at,
        user: UserProfile {
            id: 1,
            name: "Alice".to_string(),
            ..Default::default()
        },
        remember_me: true,
        refresh_expires_at: None,
    }
}

pub fn gateway(base_url: &str, store: Arc<SessionStore>) -> Gateway {
    Gateway::new(base_url, Duration::from_secs(5), store).unwrap()
}
