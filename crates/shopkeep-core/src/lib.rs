//! Core library for shopkeep.
//!
//! Provides the session lifecycle for the retail-management admin client:
//! a durable session store, an HTTP gateway that refreshes expired tokens
//! and replays requests, the account and domain endpoints, and the route
//! guard that sends anonymous users to the login page.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod routes;
pub mod storage;

pub use api::{ApiError, AuthApi, Gateway, RequestContext};
pub use auth::{CredentialBundle, SessionEvent, SessionStore, UserProfile};
pub use config::Config;
