//! Session state: the credential bundle and the store that owns it.
//!
//! This module provides:
//! - `CredentialBundle`: tokens, expiry, user profile and remember-me flag
//!   treated as one unit
//! - `SessionStore`: the process-wide holder of the current bundle, backed
//!   by durable storage
//!
//! Tokens are renewed eagerly when read within 5 minutes of expiry.

pub mod bundle;
pub(crate) mod refresh;
pub mod store;

pub use bundle::{AuthResponse, CredentialBundle, UserProfile, TOKEN_REFRESH_BUFFER_MINUTES};
pub use store::{ProactiveRefresh, RefreshContext, SessionEvent, SessionStore};
