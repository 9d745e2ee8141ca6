//! REST API client module for the retail-management backend.
//!
//! This module provides the `Gateway` through which every request is sent,
//! plus typed wrappers for the account endpoints (`AuthApi`) and the domain
//! collections (`Resource`, `Operations`).
//!
//! Requests use bearer token authentication; an expired token is refreshed
//! transparently once per request.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod resources;

pub use auth::AuthApi;
pub use error::ApiError;
pub use gateway::{Gateway, RequestContext, RequestSpec, UnauthorizedPolicy, REFRESH_PATH};
pub use resources::{Operations, Resource, ResourceKind};
