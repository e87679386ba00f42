//! Route classification and the navigation guard.

use serde::Serialize;
use std::sync::Mutex;

use super::SessionState;

/// Where unauthenticated users are sent.
pub const LOGIN_ROUTE: &str = "/auth/login";
pub const SIGNUP_ROUTE: &str = "/auth/signup";
/// Where a successful sign-in lands.
pub const HOME_ROUTE: &str = "/dashboard/home";

/// Routes whose purpose is collecting credentials; never force-redirected.
pub const AUTH_ENTRY_ROUTES: [&str; 2] = [LOGIN_ROUTE, SIGNUP_ROUTE];

/// A dashboard path, normalized without query, fragment or trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Route(String);

impl Route {
    pub fn new(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default().trim();
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return Self("/".to_string());
        }
        if path.starts_with('/') {
            Self(path.to_string())
        } else {
            Self(format!("/{}", path))
        }
    }

    pub fn login() -> Self {
        Self::new(LOGIN_ROUTE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_auth_entry(&self) -> bool {
        AUTH_ENTRY_ROUTES.contains(&self.0.as_str())
    }
}

impl From<&str> for Route {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    Render,
    RedirectToLogin,
    RenderLoading,
}

/// Decide what to show for `route` given settled (or pending) session state.
pub fn evaluate(state: &SessionState, route: &Route) -> GuardAction {
    match state {
        SessionState::Pending => GuardAction::RenderLoading,
        SessionState::Authenticated(_) => GuardAction::Render,
        SessionState::Unauthenticated if route.is_auth_entry() => GuardAction::Render,
        SessionState::Unauthenticated => GuardAction::RedirectToLogin,
    }
}

/// Receives redirects issued by the session layer.
pub trait Navigator: Send + Sync {
    fn redirect(&self, to: &Route);
}

/// Navigator that only remembers redirects; the shell drains and follows them.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirects issued since the last call, oldest first.
    pub fn take(&self) -> Vec<Route> {
        match self.redirects.lock() {
            Ok(mut redirects) => std::mem::take(&mut *redirects),
            Err(_) => Vec::new(),
        }
    }

    /// Most recent redirect since the last drain, if any.
    pub fn take_last(&self) -> Option<Route> {
        self.take().pop()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, to: &Route) {
        tracing::info!("Redirecting to {}", to);
        if let Ok(mut redirects) = self.redirects.lock() {
            redirects.push(to.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserIdentity;

    fn authenticated() -> SessionState {
        SessionState::Authenticated(UserIdentity {
            id: "1".to_string(),
            name: "An".to_string(),
            email: "an@example.com".to_string(),
            avatar_url: None,
        })
    }

    #[test]
    fn test_route_normalization() {
        assert_eq!(Route::new("/dashboard/").as_str(), "/dashboard");
        assert_eq!(Route::new("auth/login?next=/x").as_str(), "/auth/login");
        assert_eq!(Route::new("/auth/signup#form").as_str(), "/auth/signup");
        assert_eq!(Route::new("").as_str(), "/");
    }

    #[test]
    fn test_auth_entry_allow_list() {
        assert!(Route::new("/auth/login").is_auth_entry());
        assert!(Route::new("/auth/signup/").is_auth_entry());
        assert!(!Route::new("/auth/forgot-password").is_auth_entry());
        assert!(!Route::new("/dashboard").is_auth_entry());
        assert!(!Route::new("/").is_auth_entry());
    }

    #[test]
    fn test_pending_renders_loading_everywhere() {
        for path in ["/dashboard", "/auth/login"] {
            assert_eq!(evaluate(&SessionState::Pending, &Route::new(path)), GuardAction::RenderLoading);
        }
    }

    #[test]
    fn test_unauthenticated_protected_redirects() {
        assert_eq!(
            evaluate(&SessionState::Unauthenticated, &Route::new("/dashboard/courses")),
            GuardAction::RedirectToLogin
        );
    }

    #[test]
    fn test_unauthenticated_auth_entry_renders() {
        assert_eq!(
            evaluate(&SessionState::Unauthenticated, &Route::new("/auth/signup")),
            GuardAction::Render
        );
    }

    #[test]
    fn test_authenticated_renders_everywhere() {
        for path in ["/dashboard", "/auth/login"] {
            assert_eq!(evaluate(&authenticated(), &Route::new(path)), GuardAction::Render);
        }
    }

    #[test]
    fn test_recording_navigator_drains() {
        let nav = RecordingNavigator::new();
        nav.redirect(&Route::login());
        assert_eq!(nav.take(), vec![Route::login()]);
        assert!(nav.take().is_empty());
    }

    #[test]
    fn test_take_last_keeps_newest_and_drains() {
        let nav = RecordingNavigator::new();
        assert_eq!(nav.take_last(), None);

        nav.redirect(&Route::login());
        nav.redirect(&Route::new(SIGNUP_ROUTE));

        assert_eq!(nav.take_last(), Some(Route::new(SIGNUP_ROUTE)));
        assert!(nav.take().is_empty());
    }
}
