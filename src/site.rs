//! Site preview server.
//!
//! Serves the public pages, the registration endpoint and the admin pages.
//! Admin pages are gated on the process-wide session mirror: 503 while the
//! session is still being looked up, a redirect home for anyone but the admin.

use crate::blog::{format_date, BlogError, BlogService};
use crate::config::SiteConfig;
use crate::leads::{short_date, LeadError, LeadKind, LeadService, Registration, CONTACT_DETAILS};
use crate::records::RecordStore;
use crate::router::{self, Navigation, Route};
use crate::session::SessionMirror;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;

/// Shared state for the site
pub struct SiteState {
    pub mirror: Arc<SessionMirror>,
    pub blog: BlogService,
    pub leads: LeadService,
}

impl SiteState {
    pub fn new(mirror: Arc<SessionMirror>, records: Arc<dyn RecordStore>) -> Arc<Self> {
        Arc::new(Self {
            mirror,
            blog: BlogService::new(records.clone()),
            leads: LeadService::new(records),
        })
    }
}

pub fn router(state: Arc<SiteState>) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/blog", get(blog_handler))
        .route("/blog/{slug}", get(post_handler))
        .route("/contact", get(contact_handler))
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/admin/blog", get(admin_blog_handler))
        .route("/admin/registrations", get(admin_registrations_handler))
        .route("/admin/registrations/{file}", get(export_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

/// Run the site server
pub async fn run(config: &SiteConfig, state: Arc<SiteState>) -> anyhow::Result<()> {
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "site preview listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title} | Nexus Compliance</title>
    <style>
        body {{ font-family: system-ui, sans-serif; max-width: 800px; margin: 2rem auto; padding: 1rem; }}
        nav a {{ margin-right: 1rem; }}
        table {{ border-collapse: collapse; width: 100%; }}
        td, th {{ border-bottom: 1px solid #ddd; padding: 0.4rem; text-align: left; }}
    </style>
</head>
<body>
    <nav><a href="/">Home</a><a href="/blog">Blog</a><a href="/contact">Contact</a></nav>
    <h1>{title}</h1>
{body}
</body>
</html>"#,
        title = escape(title),
        body = body,
    ))
}

fn error_page(status: StatusCode, title: &str, message: &str) -> Response {
    (status, page(title, &format!("<p>{}</p>", escape(message)))).into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::warn!(error = %err, "page failed");
    error_page(StatusCode::INTERNAL_SERVER_ERROR, "Error", "Something went wrong")
}

impl IntoResponse for BlogError {
    fn into_response(self) -> Response {
        match self {
            BlogError::NotFound => error_page(StatusCode::NOT_FOUND, "Not found", "Post not found"),
            other => internal_error(other),
        }
    }
}

impl IntoResponse for LeadError {
    fn into_response(self) -> Response {
        match self {
            LeadError::Invalid(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "errors": errors }))).into_response()
            }
            other => internal_error(other),
        }
    }
}

/// Admin gate for a page handler.
fn admit(state: &SiteState, route: Route) -> Result<(), Response> {
    let snapshot = state.mirror.snapshot();
    match router::gate(route, &snapshot) {
        Navigation::Render(_) => Ok(()),
        Navigation::Pending(_) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            page("Loading", "<p>Loading...</p>"),
        )
            .into_response()),
        Navigation::Redirect(to) => Err(Redirect::to(&to).into_response()),
        Navigation::SessionUnknown(_) => {
            let reason = snapshot.probe_error.as_deref().unwrap_or("unknown error");
            Err(error_page(
                StatusCode::SERVICE_UNAVAILABLE,
                "Session unknown",
                &format!("Could not determine who is signed in: {}", reason),
            ))
        }
    }
}

async fn home_handler() -> Html<String> {
    page(
        "Regulatory Compliance",
        r#"    <p>Leading Compliance Solutions Provider</p>
    <p><a href="/blog">Read our insights</a> or <a href="/contact">register for services</a>.</p>"#,
    )
}

async fn blog_handler(State(state): State<Arc<SiteState>>) -> Result<Html<String>, BlogError> {
    let posts = state.blog.published_posts().await?;
    let mut body = String::new();
    if posts.is_empty() {
        body.push_str("    <p>No posts published yet.</p>\n    <p>Check back later for updates</p>\n");
    }
    for post in posts {
        let _ = writeln!(
            body,
            r#"    <article><h2><a href="/blog/{slug}">{title}</a></h2><p>{date}</p><p>{excerpt}</p></article>"#,
            slug = escape(&post.slug),
            title = escape(&post.title),
            date = format_date(&post.created_at),
            excerpt = escape(post.excerpt.as_deref().unwrap_or("")),
        );
    }
    Ok(page("Blog", &body))
}

async fn post_handler(
    State(state): State<Arc<SiteState>>,
    Path(slug): Path<String>,
) -> Result<Response, BlogError> {
    let post = match state.blog.published_post(&slug).await {
        Ok(post) => post,
        // missing or unpublished posts send the reader back to the listing
        Err(BlogError::NotFound) => return Ok(Redirect::to("/blog").into_response()),
        Err(e) => return Err(e),
    };
    let paragraphs: String = post
        .content
        .split("\n\n")
        .map(|p| format!("    <p>{}</p>\n", escape(p)))
        .collect();
    let body = format!(
        "    <p>{} &middot; By {}</p>\n{}",
        format_date(&post.created_at),
        escape(&post.author_name()),
        paragraphs
    );
    Ok(page(&post.title, &body).into_response())
}

async fn contact_handler() -> Html<String> {
    let mut body = String::from("    <address>\n");
    for line in CONTACT_DETAILS {
        let _ = writeln!(body, "        {}<br>", escape(line));
    }
    body.push_str("    </address>\n    <p>Send a registration as JSON to <code>POST /register</code>.</p>");
    page("Contact", &body)
}

async fn health_handler(State(state): State<Arc<SiteState>>) -> impl IntoResponse {
    let snapshot = state.mirror.snapshot();
    Json(json!({
        "status": "ok",
        "session": snapshot.phase.to_string(),
        "admin": snapshot.is_admin,
    }))
}

async fn register_handler(
    State(state): State<Arc<SiteState>>,
    Json(form): Json<Registration>,
) -> Result<Response, LeadError> {
    let kind = state.leads.submit(&form).await?;
    Ok((StatusCode::CREATED, Json(json!({ "kind": kind.as_str() }))).into_response())
}

async fn admin_blog_handler(State(state): State<Arc<SiteState>>) -> Response {
    if let Err(response) = admit(&state, Route::AdminBlog) {
        return response;
    }
    let posts = match state.blog.all_posts().await {
        Ok(posts) => posts,
        Err(e) => return e.into_response(),
    };

    let mut body = String::from("    <table>\n        <tr><th>Title</th><th>Status</th><th>Created</th><th>Slug</th></tr>\n");
    for post in posts {
        let _ = writeln!(
            body,
            "        <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&post.title),
            if post.is_published { "Published" } else { "Draft" },
            format_date(&post.created_at),
            escape(&post.slug),
        );
    }
    body.push_str("    </table>");
    page("Manage Blog Posts", &body).into_response()
}

async fn admin_registrations_handler(State(state): State<Arc<SiteState>>) -> Response {
    if let Err(response) = admit(&state, Route::AdminRegistrations) {
        return response;
    }
    let (demos, subs) = match tokio::try_join!(
        state.leads.demo_requests(),
        state.leads.newsletter_subscriptions()
    ) {
        Ok(lists) => lists,
        Err(e) => return e.into_response(),
    };

    let mut body = format!(
        "    <h2>Demo Requests ({})</h2> <a href=\"/admin/registrations/demo.csv\">Export CSV</a>\n    <table>\n",
        demos.len()
    );
    for row in &demos {
        let _ = writeln!(
            body,
            "        <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&row.name),
            escape(&row.email),
            escape(row.company_name.as_deref().unwrap_or("")),
            escape(&row.service_interest),
            short_date(&row.created_at),
        );
    }
    let _ = write!(
        body,
        "    </table>\n    <h2>Newsletter Subscriptions ({})</h2> <a href=\"/admin/registrations/newsletter.csv\">Export CSV</a>\n    <table>\n",
        subs.len()
    );
    for row in &subs {
        let _ = writeln!(
            body,
            "        <tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(row.name.as_deref().unwrap_or("")),
            escape(&row.email),
            short_date(&row.created_at),
        );
    }
    body.push_str("    </table>");
    page("Registrations", &body).into_response()
}

async fn export_handler(
    State(state): State<Arc<SiteState>>,
    Path(file): Path<String>,
) -> Response {
    let Some(kind) = file.strip_suffix(".csv").and_then(LeadKind::parse) else {
        return not_found_handler().await.into_response();
    };
    if let Err(response) = admit(&state, Route::AdminRegistrations) {
        return response;
    }
    match state.leads.export_csv(kind).await {
        Ok(csv) => (
            [
                (header::CONTENT_TYPE, "text/csv;charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", kind.file_name()),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn not_found_handler() -> (StatusCode, Html<String>) {
    (
        StatusCode::NOT_FOUND,
        page("404", "    <p>Oops! Page not found</p>\n    <p><a href=\"/\">Return to Home</a></p>"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::serve;
    use crate::records::{MemoryRecordStore, Table};
    use crate::session::AdminPolicy;
    use crate::test_utils::{admin_session, user_session, MockSessionStore};

    struct Fixture {
        url: String,
        client: reqwest::Client,
        records: Arc<MemoryRecordStore>,
        _gate: Option<Arc<tokio::sync::Notify>>,
    }

    async fn start(store: MockSessionStore, gate: Option<Arc<tokio::sync::Notify>>) -> Fixture {
        let records = Arc::new(MemoryRecordStore::new());
        let mirror = SessionMirror::start(Arc::new(store), AdminPolicy::default());
        if gate.is_none() {
            mirror.settled().await;
        }
        let url = serve(router(SiteState::new(mirror, records.clone()))).await;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        Fixture {
            url,
            client,
            records,
            _gate: gate,
        }
    }

    impl Fixture {
        async fn get(&self, path: &str) -> reqwest::Response {
            self.client
                .get(format!("{}{}", self.url, path))
                .send()
                .await
                .unwrap()
        }

        async fn seed_post(&self, slug: &str, published: bool) {
            self.records
                .insert(
                    Table::BlogPosts,
                    json!({
                        "title": format!("Title {}", slug),
                        "slug": slug,
                        "content": "First paragraph.\n\nSecond <b>paragraph</b>.",
                        "is_published": published,
                    }),
                )
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[tokio::test]
    async fn test_public_pages() {
        let fx = start(MockSessionStore::new(), None).await;
        fx.seed_post("aml-basics", true).await;
        fx.seed_post("secret-draft", false).await;

        let resp = fx.get("/").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = fx.get("/blog").await.text().await.unwrap();
        assert!(body.contains("/blog/aml-basics"));
        assert!(!body.contains("secret-draft"));

        let resp = fx.get("/blog/aml-basics").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.text().await.unwrap();
        assert!(body.contains("Title aml-basics"));
        assert!(body.contains("Second &lt;b&gt;paragraph&lt;/b&gt;."));
        assert!(body.contains("By CompliancePro Team"));

        let resp = fx.get("/blog/secret-draft").await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/blog");
        let resp = fx.get("/blog/never-written").await;
        assert_eq!(resp.headers()[header::LOCATION], "/blog");
        assert_eq!(fx.get("/no/such/page").await.status(), StatusCode::NOT_FOUND);

        let body = fx.get("/contact").await.text().await.unwrap();
        assert!(body.contains("123 Compliance Way"));
    }

    #[tokio::test]
    async fn test_post_page_shows_author() {
        let fx = start(MockSessionStore::new(), None).await;
        fx.records
            .insert(
                Table::Profiles,
                json!({"id": "u-ada", "first_name": "Ada", "last_name": "Lovelace"}),
            )
            .await
            .unwrap();
        fx.records
            .insert(
                Table::BlogPosts,
                json!({
                    "title": "Engines",
                    "slug": "engines",
                    "content": "Analytical engines need auditing too.",
                    "is_published": true,
                    "author_id": "u-ada",
                }),
            )
            .await
            .unwrap();

        let body = fx.get("/blog/engines").await.text().await.unwrap();
        assert!(body.contains("By Ada Lovelace"), "{}", body);
    }

    #[tokio::test]
    async fn test_empty_blog() {
        let fx = start(MockSessionStore::new(), None).await;
        let body = fx.get("/blog").await.text().await.unwrap();
        assert!(body.contains("Check back later for updates"));
    }

    #[tokio::test]
    async fn test_health_reports_session() {
        let fx = start(MockSessionStore::new().with_probe_session(admin_session()), None).await;
        let body: serde_json::Value = fx.get("/health").await.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["session"], "admin");
        assert_eq!(body["admin"], true);
    }

    #[tokio::test]
    async fn test_admin_pages_redirect_non_admin() {
        let fx = start(
            MockSessionStore::new().with_probe_session(user_session("someone@example.com")),
            None,
        )
        .await;
        for path in ["/admin/blog", "/admin/registrations", "/admin/registrations/demo.csv"] {
            let resp = fx.get(path).await;
            assert_eq!(resp.status(), StatusCode::SEE_OTHER, "{}", path);
            assert_eq!(resp.headers()[header::LOCATION], "/");
        }
    }

    #[tokio::test]
    async fn test_admin_pages_unavailable_while_loading() {
        let (store, gate) = MockSessionStore::gated();
        let fx = start(store.with_probe_session(admin_session()), Some(gate)).await;
        let resp = fx.get("/admin/blog").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "1");
        // public pages do not wait
        assert_eq!(fx.get("/blog").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_pages_after_probe_failure() {
        let fx = start(MockSessionStore::new().with_probe_error("dns failure"), None).await;
        let resp = fx.get("/admin/registrations").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.text().await.unwrap().contains("dns failure"));
    }

    #[tokio::test]
    async fn test_admin_sees_everything() {
        let fx = start(MockSessionStore::new().with_probe_session(admin_session()), None).await;
        fx.seed_post("published-one", true).await;
        fx.seed_post("draft-one", false).await;

        let body = fx.get("/admin/blog").await.text().await.unwrap();
        assert!(body.contains("published-one"));
        assert!(body.contains("draft-one"));
        assert!(body.contains("Draft"));
    }

    #[tokio::test]
    async fn test_register_and_download_csv() {
        let fx = start(MockSessionStore::new().with_probe_session(admin_session()), None).await;

        let resp = fx
            .client
            .post(format!("{}/register", fx.url))
            .json(&json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@example.com",
                "company": "Analytical",
                "interest": "query",
                "message": "Say \"hello\"",
                "agree_to_terms": true
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "demo");

        let resp = fx
            .client
            .post(format!("{}/register", fx.url))
            .json(&json!({"first_name": "A", "last_name": "B", "email": "x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["errors"][0]["field"], "first_name");

        let body = fx.get("/admin/registrations").await.text().await.unwrap();
        assert!(body.contains("Demo Requests (1)"));

        let resp = fx.get("/admin/registrations/demo.csv").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv;charset=utf-8");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"demo-registrations.csv\""
        );
        let csv = resp.text().await.unwrap();
        assert!(csv.contains(r#""Say ""hello""""#));

        assert_eq!(
            fx.get("/admin/registrations/leads.csv").await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
