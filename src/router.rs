//! Site routes and the admin gate in front of them.
//!
//! Admin pages consult the session mirror: while it is still loading the
//! decision is deferred, a settled non-admin is sent home.

use crate::session::MirrorSnapshot;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Blog,
    BlogPost { slug: String },
    Auth,
    Contact,
    Dashboard,
    AdminBlog,
    /// New post when `id` is absent
    BlogEditor { id: Option<String> },
    AdminRegistrations,
    NotFound { path: String },
}

/// Outcome of navigating to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Render(Route),
    /// Admin route requested before the session is known
    Pending(Route),
    Redirect(String),
    /// Admin route requested after the start-up probe failed
    SessionUnknown(Route),
}

/// Reduce hash-router and browser forms to a bare path: `#/blog/?x=1` -> `/blog`.
pub fn normalize(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_prefix('#').unwrap_or(path);
    let path = path.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

impl Route {
    pub fn resolve(path: &str) -> Route {
        let path = normalize(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Route::Home,
            ["blog"] => Route::Blog,
            ["blog", slug] => Route::BlogPost {
                slug: slug.to_string(),
            },
            ["auth"] => Route::Auth,
            ["contact"] => Route::Contact,
            ["dashboard"] => Route::Dashboard,
            ["admin", "blog"] => Route::AdminBlog,
            ["admin", "blog", "editor"] => Route::BlogEditor { id: None },
            ["admin", "blog", "editor", id] => Route::BlogEditor {
                id: Some(id.to_string()),
            },
            ["admin", "registrations"] => Route::AdminRegistrations,
            _ => Route::NotFound { path },
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Route::AdminBlog | Route::BlogEditor { .. } | Route::AdminRegistrations
        )
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Blog => "/blog".to_string(),
            Route::BlogPost { slug } => format!("/blog/{}", slug),
            Route::Auth => "/auth".to_string(),
            Route::Contact => "/contact".to_string(),
            Route::Dashboard => "/dashboard".to_string(),
            Route::AdminBlog => "/admin/blog".to_string(),
            Route::BlogEditor { id: None } => "/admin/blog/editor".to_string(),
            Route::BlogEditor { id: Some(id) } => format!("/admin/blog/editor/{}", id),
            Route::AdminRegistrations => "/admin/registrations".to_string(),
            Route::NotFound { path } => path.clone(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Gate `route` on the mirror state.
pub fn gate(route: Route, snapshot: &MirrorSnapshot) -> Navigation {
    if !route.requires_admin() {
        return Navigation::Render(route);
    }
    if snapshot.is_loading() {
        return Navigation::Pending(route);
    }
    if snapshot.is_admin {
        return Navigation::Render(route);
    }
    if snapshot.probe_failed() {
        return Navigation::SessionUnknown(route);
    }
    tracing::debug!(route = %route, "non-admin sent home");
    Navigation::Redirect("/".to_string())
}

pub fn navigate(path: &str, snapshot: &MirrorSnapshot) -> Navigation {
    gate(Route::resolve(path), snapshot)
}
