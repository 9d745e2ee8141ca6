//! The credential bundle: everything a logged-in session consists of.
//!
//! A bundle is only ever built from a login or refresh response and is
//! replaced wholesale; there is no API for editing a single field of a live
//! session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{keys, StoredFields};

/// Buffer before expiry inside which a valid token is renewed eagerly.
pub const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Denormalized profile snapshot cached for display.
///
/// The backend serializes its user model without JSON tags, so both the
/// Go-style (`ID`, `Name`) and snake_case field names are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    #[serde(alias = "ID")]
    pub id: u64,
    #[serde(alias = "Name", default)]
    pub name: String,
    #[serde(alias = "Role", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(alias = "Username", default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(alias = "Email", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(alias = "Phone", default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(alias = "StoreID", default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<u64>,
}

impl UserProfile {
    /// Name to show in a header bar, falling back to the login name.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            self.username.as_deref().unwrap_or("")
        }
    }
}

/// Wire shape shared by `/api/auth/login` and `/api/auth/refresh-token`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    #[serde(default)]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CredentialBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub remember_me: bool,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl CredentialBundle {
    /// Build a bundle from a login or refresh response.
    ///
    /// `remember_me` is the flag the request was made with; the server does
    /// not echo it back.
    pub fn from_response(response: AuthResponse, remember_me: bool) -> Self {
        Self {
            access_token: response.token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            expires_at: response.expires_at,
            user: response.user,
            remember_me,
            refresh_expires_at: response.refresh_token_expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if the token is still valid but close enough to expiry to renew
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        let refresh_at = self.expires_at - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES);
        !self.is_expired_at(now) && now >= refresh_at
    }

    /// Whether the refresh token is known to be unusable at `now`.
    pub fn refresh_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at.is_some_and(|at| now >= at)
    }

    pub fn time_until_expiry_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry_at(Utc::now()).num_minutes().max(0)
    }

    /// Flatten into the scalar fields kept in durable storage.
    pub fn to_fields(&self) -> StoredFields {
        let mut fields = StoredFields::new();
        fields.insert(keys::TOKEN.to_string(), self.access_token.clone());
        if let Some(ref refresh) = self.refresh_token {
            fields.insert(keys::REFRESH_TOKEN.to_string(), refresh.clone());
        }
        fields.insert(keys::TOKEN_EXPIRES.to_string(), self.expires_at.to_rfc3339());
        // UserProfile only holds plain scalars, serialization cannot fail
        fields.insert(
            keys::USER.to_string(),
            serde_json::to_string(&self.user).unwrap_or_else(|_| "{}".to_string()),
        );
        fields.insert(keys::REMEMBER_ME.to_string(), self.remember_me.to_string());
        if let Some(at) = self.refresh_expires_at {
            fields.insert(keys::REFRESH_TOKEN_EXPIRES.to_string(), at.to_rfc3339());
        }
        fields
    }

    /// Rebuild a bundle from stored fields.
    ///
    /// Returns `None` unless the required fields are all present and
    /// parseable; a token without an expiry is not a session.
    pub fn from_fields(fields: &StoredFields) -> Option<Self> {
        let access_token = fields.get(keys::TOKEN).filter(|t| !t.is_empty())?.clone();
        let expires_at = DateTime::parse_from_rfc3339(fields.get(keys::TOKEN_EXPIRES)?)
            .ok()?
            .with_timezone(&Utc);
        let user: UserProfile = serde_json::from_str(fields.get(keys::USER)?).ok()?;
        let remember_me = fields
            .get(keys::REMEMBER_ME)
            .map(|v| v == "true")
            .unwrap_or(false);
        let refresh_token = fields
            .get(keys::REFRESH_TOKEN)
            .filter(|t| !t.is_empty())
            .cloned();
        let refresh_expires_at = match fields.get(keys::REFRESH_TOKEN_EXPIRES) {
            Some(raw) => Some(DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc)),
            None => None,
        };

        Some(Self {
            access_token,
            refresh_token,
            expires_at,
            user,
            remember_me,
            refresh_expires_at,
        })
    }
}
