//! Application routes and the authentication guard in front of them.
//!
//! Protected routes send unauthenticated visitors to the login page with the
//! originally requested path in a `redirect` query parameter, so navigation
//! can resume once the user has signed in again.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::SessionStore;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/dashboard";

/// Name of the query parameter carrying the resumption path
pub const REDIRECT_PARAM: &str = "redirect";

/// Placeholder origin so app paths can go through `Url` for encoding.
/// Only the path and query of the result are ever used.
const LOCATION_BASE: &str = "http://shopkeep.invalid";

/// Where to send the user after a forced logout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LoginRedirect {
    /// The path the user was on, resumed after re-authentication
    pub return_to: Option<String>,
}

impl LoginRedirect {
    pub fn new(return_to: Option<String>) -> Self {
        // Never bounce back to the login page itself
        let return_to = return_to.filter(|p| !p.is_empty() && !is_login_path(p));
        Self { return_to }
    }

    /// Login location, e.g. `/login?redirect=%2Fproducts`.
    pub fn location(&self) -> String {
        let Some(ref path) = self.return_to else {
            return LOGIN_PATH.to_string();
        };
        match Url::parse_with_params(&format!("{}{}", LOCATION_BASE, LOGIN_PATH), &[(REDIRECT_PARAM, path)]) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            Err(e) => {
                debug!(error = %e, "Could not encode login redirect");
                LOGIN_PATH.to_string()
            }
        }
    }

    /// Recover the resumption path from a login location.
    pub fn from_location(location: &str) -> Self {
        let return_to = Url::parse(&format!("{}{}", LOCATION_BASE, location))
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == REDIRECT_PARAM)
                    .map(|(_, value)| value.into_owned())
            });
        Self::new(return_to)
    }
}

fn is_login_path(path: &str) -> bool {
    path == LOGIN_PATH || path.starts_with("/login?")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Dashboard,
    Products,
    Inventory,
    Members,
    Purchases,
    PurchaseCreate,
    PurchaseDetail(u64),
    Suppliers,
    SupplierDetail(u64),
    NotFound(String),
}

impl Route {
    /// Parse an app path. `/` resolves to the dashboard; query strings are ignored.
    pub fn parse(path: &str) -> Self {
        let path = path.split('?').next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] | ["dashboard"] => Route::Dashboard,
            ["login"] => Route::Login,
            ["products"] => Route::Products,
            ["inventory"] => Route::Inventory,
            ["members"] => Route::Members,
            ["purchases"] => Route::Purchases,
            ["purchases", "create"] => Route::PurchaseCreate,
            ["purchases", id] => match id.parse() {
                Ok(id) => Route::PurchaseDetail(id),
                Err(_) => Route::NotFound(path.to_string()),
            },
            ["suppliers"] => Route::Suppliers,
            ["suppliers", id] => match id.parse() {
                Ok(id) => Route::SupplierDetail(id),
                Err(_) => Route::NotFound(path.to_string()),
            },
            _ => Route::NotFound(path.to_string()),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Login => LOGIN_PATH.to_string(),
            Route::Dashboard => HOME_PATH.to_string(),
            Route::Products => "/products".to_string(),
            Route::Inventory => "/inventory".to_string(),
            Route::Members => "/members".to_string(),
            Route::Purchases => "/purchases".to_string(),
            Route::PurchaseCreate => "/purchases/create".to_string(),
            Route::PurchaseDetail(id) => format!("/purchases/{}", id),
            Route::Suppliers => "/suppliers".to_string(),
            Route::SupplierDetail(id) => format!("/suppliers/{}", id),
            Route::NotFound(path) => path.clone(),
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::Login | Route::NotFound(_))
    }
}

/// Outcome of guarding a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Allow(Route),
    Redirect(String),
}

/// Decide whether the user may open `path`.
///
/// `path` may carry a query string; for `/login` its `redirect` parameter is
/// where an already authenticated user is sent.
pub fn guard(path: &str, session: &SessionStore) -> Navigation {
    let route = Route::parse(path);
    let authenticated = session.is_authenticated();

    match route {
        Route::Login if authenticated => {
            let target = LoginRedirect::from_location(path)
                .return_to
                .unwrap_or_else(|| HOME_PATH.to_string());
            Navigation::Redirect(target)
        }
        ref r if r.requires_auth() && !authenticated => {
            Navigation::Redirect(LoginRedirect::new(Some(r.path())).location())
        }
        r => Navigation::Allow(r),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::auth::{CredentialBundle, UserProfile};
    use crate::storage::MemoryStore;

    fn logged_in_store() -> SessionStore {
        let store = SessionStore::new(Box::new(MemoryStore::default()));
        store.save(CredentialBundle {
            access_token: "T1".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            user: UserProfile::default(),
            remember_me: false,
            refresh_expires_at: None,
        });
        store
    }

    #[test]
    fn test_parse_routes() {
        assert_eq!(Route::parse("/"), Route::Dashboard);
        assert_eq!(Route::parse("/products"), Route::Products);
        assert_eq!(Route::parse("/purchases/create"), Route::PurchaseCreate);
        assert_eq!(Route::parse("/purchases/42"), Route::PurchaseDetail(42));
        assert_eq!(Route::parse("/suppliers/7/"), Route::SupplierDetail(7));
        assert_eq!(Route::parse("/login?redirect=%2Fproducts"), Route::Login);
        assert_eq!(Route::parse("/suppliers/abc"), Route::NotFound("/suppliers/abc".to_string()));
        assert_eq!(Route::parse("/nowhere"), Route::NotFound("/nowhere".to_string()));
    }

    #[test]
    fn test_route_paths_parse_back() {
        for route in [Route::Inventory, Route::Members, Route::PurchaseDetail(3), Route::SupplierDetail(9)] {
            assert_eq!(Route::parse(&route.path()), route);
        }
    }

    #[test]
    fn test_login_location_encodes_path() {
        let redirect = LoginRedirect::new(Some("/purchases/42".to_string()));
        assert_eq!(redirect.location(), "/login?redirect=%2Fpurchases%2F42");
        assert_eq!(LoginRedirect::from_location(&redirect.location()), redirect);
    }

    #[test]
    fn test_login_location_never_targets_login() {
        assert_eq!(LoginRedirect::new(Some("/login".to_string())).location(), "/login");
        assert_eq!(LoginRedirect::new(None).location(), "/login");
        assert_eq!(LoginRedirect::new(Some(String::new())).return_to, None);
    }

    #[test]
    fn test_guard_redirects_anonymous_user() {
        let store = SessionStore::new(Box::new(MemoryStore::default()));
        assert_eq!(
            guard("/suppliers/7", &store),
            Navigation::Redirect("/login?redirect=%2Fsuppliers%2F7".to_string())
        );
        assert_eq!(guard("/login", &store), Navigation::Allow(Route::Login));
    }

    #[test]
    fn test_guard_allows_authenticated_user() {
        let store = logged_in_store();
        assert_eq!(guard("/products", &store), Navigation::Allow(Route::Products));
        assert_eq!(
            guard("/login?redirect=%2Fproducts", &store),
            Navigation::Redirect("/products".to_string())
        );
        assert_eq!(guard("/login", &store), Navigation::Redirect(HOME_PATH.to_string()));
    }
}
