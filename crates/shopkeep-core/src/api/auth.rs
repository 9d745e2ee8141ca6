//! Account endpoints: login, registration, password flows and profile.

use serde_json::json;
use tracing::{debug, info};

use crate::auth::{AuthResponse, CredentialBundle, SessionEvent, UserProfile};
use crate::models::{MessageResponse, ProfileUpdate, RegisterRequest};
use crate::routes::LoginRedirect;

use super::error::Result;
use super::gateway::{Gateway, RequestContext, RequestSpec};

const LOGIN_PATH: &str = "/api/auth/login";
const REGISTER_PATH: &str = "/api/auth/register";
const FORGOT_PASSWORD_PATH: &str = "/api/auth/forgot-password";
const RESET_PASSWORD_PATH: &str = "/api/auth/reset-password";
const PROFILE_PATH: &str = "/api/profile";
const CHANGE_PASSWORD_PATH: &str = "/api/change-password";

#[derive(Clone)]
pub struct AuthApi {
    gateway: Gateway,
}

impl AuthApi {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Authenticate and start a new session.
    ///
    /// Bad credentials come back as a `ServerError` carrying the server's
    /// message; they never trigger the refresh path.
    pub async fn login(&self, username: &str, password: &str, remember_me: bool) -> Result<CredentialBundle> {
        let spec = RequestSpec::post(LOGIN_PATH)
            .json(&json!({
                "username": username,
                "password": password,
                "remember_me": remember_me,
            }))?
            .surface_unauthorized();
        let response: AuthResponse = self.gateway.send_as(&spec).await?;

        let bundle = CredentialBundle::from_response(response, remember_me);
        let store = self.gateway.store();
        store.save(bundle.clone());
        store.publish(SessionEvent::LoggedIn);
        info!(user_id = bundle.user.id, remember_me, "Login successful");
        Ok(bundle)
    }

    /// Create an account. Does not log the new user in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<UserProfile> {
        let spec = RequestSpec::post(REGISTER_PATH).json(request)?.surface_unauthorized();
        self.gateway.send_as(&spec).await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse> {
        let spec = RequestSpec::post(FORGOT_PASSWORD_PATH)
            .json(&json!({ "email": email }))?
            .surface_unauthorized();
        self.gateway.send_as(&spec).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<MessageResponse> {
        let spec = RequestSpec::post(RESET_PASSWORD_PATH)
            .json(&json!({ "token": token, "new_password": new_password }))?
            .surface_unauthorized();
        self.gateway.send_as(&spec).await
    }

    pub async fn profile(&self, context: &RequestContext) -> Result<UserProfile> {
        self.gateway.get(PROFILE_PATH, context).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate, context: &RequestContext) -> Result<UserProfile> {
        self.gateway.put(PROFILE_PATH, update, context).await
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        context: &RequestContext,
    ) -> Result<MessageResponse> {
        let body = json!({ "old_password": old_password, "new_password": new_password });
        self.gateway.put(CHANGE_PASSWORD_PATH, &body, context).await
    }

    /// End the session locally. The server keeps no session state to revoke.
    pub fn logout(&self) -> LoginRedirect {
        let store = self.gateway.store();
        let redirect = LoginRedirect::default();
        if store.clear_if_current(store.generation()) {
            info!("Logged out");
            store.publish(SessionEvent::LoggedOut {
                redirect: redirect.clone(),
            });
        } else {
            debug!("Logout requested without a session");
        }
        redirect
    }
}
