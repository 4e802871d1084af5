//! Blog posts: public listing and reading, admin authoring.

use crate::error::{describe_fields, FieldError, RecordError};
use crate::records::{select_as, select_one, Filter, Query, RecordStore, Table};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));
// ASCII word characters only, so the result can satisfy SLUG_PATTERN
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\s]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const MAX_EXCERPT: usize = 200;

/// Byline for posts whose author has no profile name.
pub const DEFAULT_AUTHOR: &str = "CompliancePro Team";

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("invalid post:\n{}", describe_fields(.0))]
    Invalid(Vec<FieldError>),

    #[error("a post with slug '{0}' already exists")]
    SlugTaken(String),

    #[error("post not found")]
    NotFound,

    #[error(transparent)]
    Store(RecordError),
}

impl From<RecordError> for BlogError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::NotFound => BlogError::NotFound,
            other => BlogError::Store(other),
        }
    }
}

/// A full post row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: String,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub author_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Author profile, present when the read embedded it
    #[serde(default, rename = "profiles", skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorProfile>,
}

impl BlogPost {
    pub fn author_name(&self) -> String {
        self.author
            .as_ref()
            .map(AuthorProfile::full_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl AuthorProfile {
    const COLUMNS: &'static [&'static str] = &["first_name", "last_name"];

    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

/// Public listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub slug: String,
}

impl PostSummary {
    const COLUMNS: &'static [&'static str] = &["id", "title", "excerpt", "created_at", "slug"];
}

/// Admin table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminPostRow {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub slug: String,
    #[serde(default)]
    pub is_published: bool,
}

impl AdminPostRow {
    const COLUMNS: &'static [&'static str] =
        &["id", "title", "created_at", "updated_at", "slug", "is_published"];
}

/// Editor form contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlogDraft {
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub content: String,
    pub is_published: bool,
}

impl BlogDraft {
    pub fn from_post(post: &BlogPost) -> Self {
        Self {
            title: post.title.clone(),
            slug: post.slug.clone(),
            excerpt: post.excerpt.clone(),
            content: post.content.clone(),
            is_published: post.is_published,
        }
    }

    /// Derive the slug from the title when none was entered.
    pub fn fill_slug(&mut self) {
        if self.slug.trim().is_empty() && !self.title.trim().is_empty() {
            self.slug = generate_slug(&self.title);
        }
    }

    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.title.chars().count() < 3 {
            errors.push(FieldError::new("title", "Title must be at least 3 characters"));
        }
        if self.slug.chars().count() < 3 {
            errors.push(FieldError::new("slug", "Slug must be at least 3 characters"));
        } else if !SLUG_PATTERN.is_match(&self.slug) {
            errors.push(FieldError::new(
                "slug",
                "Slug can only contain lowercase letters, numbers, and hyphens",
            ));
        }
        if let Some(excerpt) = &self.excerpt {
            if excerpt.chars().count() > MAX_EXCERPT {
                errors.push(FieldError::new("excerpt", "Excerpt cannot exceed 200 characters"));
            }
        }
        if self.content.chars().count() < 10 {
            errors.push(FieldError::new("content", "Content must be at least 10 characters"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn excerpt_value(&self) -> Option<&str> {
        self.excerpt.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Lowercase, strip punctuation, hyphenate whitespace runs.
pub fn generate_slug(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    WHITESPACE.replace_all(&stripped, "-").into_owned()
}

/// `Month D, YYYY`
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%B %-d, %Y").to_string()
}

pub struct BlogService {
    records: Arc<dyn RecordStore>,
}

impl BlogService {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Published posts, newest first.
    pub async fn published_posts(&self) -> Result<Vec<PostSummary>, BlogError> {
        let query = Query::new()
            .columns(PostSummary::COLUMNS)
            .eq("is_published", true)
            .newest_first();
        Ok(select_as(self.records.as_ref(), Table::BlogPosts, &query).await?)
    }

    /// A published post by slug. Drafts read as missing.
    pub async fn published_post(&self, slug: &str) -> Result<BlogPost, BlogError> {
        let query = Query::new()
            .embed("profiles", Table::Profiles, "author_id", AuthorProfile::COLUMNS)
            .eq("slug", slug)
            .eq("is_published", true);
        Ok(select_one(self.records.as_ref(), Table::BlogPosts, query).await?)
    }

    /// Every post including drafts, newest first.
    pub async fn all_posts(&self) -> Result<Vec<AdminPostRow>, BlogError> {
        let query = Query::new().columns(AdminPostRow::COLUMNS).newest_first();
        Ok(select_as(self.records.as_ref(), Table::BlogPosts, &query).await?)
    }

    pub async fn post(&self, id: &str) -> Result<BlogPost, BlogError> {
        Ok(select_one(self.records.as_ref(), Table::BlogPosts, Query::new().eq("id", id)).await?)
    }

    pub async fn create(&self, mut draft: BlogDraft, author_id: &str) -> Result<BlogPost, BlogError> {
        draft.fill_slug();
        draft.validate().map_err(BlogError::Invalid)?;

        let row = json!({
            "title": draft.title,
            "slug": draft.slug,
            "excerpt": draft.excerpt_value(),
            "content": draft.content,
            "is_published": draft.is_published,
            "author_id": author_id,
        });
        let stored = self
            .records
            .insert(Table::BlogPosts, row)
            .await
            .map_err(|e| slug_error(e, &draft.slug))?;
        tracing::info!(slug = %draft.slug, published = draft.is_published, "post created");
        Ok(serde_json::from_value(stored).map_err(RecordError::from)?)
    }

    pub async fn update(&self, id: &str, mut draft: BlogDraft) -> Result<(), BlogError> {
        draft.fill_slug();
        draft.validate().map_err(BlogError::Invalid)?;

        let patch = json!({
            "title": draft.title,
            "slug": draft.slug,
            "excerpt": draft.excerpt_value(),
            "content": draft.content,
            "is_published": draft.is_published,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let touched = self
            .records
            .update(Table::BlogPosts, &[Filter::eq("id", id)], patch)
            .await
            .map_err(|e| slug_error(e, &draft.slug))?;
        if touched == 0 {
            return Err(BlogError::NotFound);
        }
        tracing::info!(id, slug = %draft.slug, "post updated");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), BlogError> {
        let removed = self
            .records
            .delete(Table::BlogPosts, &[Filter::eq("id", id)])
            .await?;
        if removed == 0 {
            return Err(BlogError::NotFound);
        }
        tracing::info!(id, "post deleted");
        Ok(())
    }
}

fn slug_error(err: RecordError, slug: &str) -> BlogError {
    match err {
        RecordError::UniqueViolation(_) => BlogError::SlugTaken(slug.to_string()),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MemoryRecordStore;
    use chrono::TimeZone;

    fn draft(title: &str, published: bool) -> BlogDraft {
        BlogDraft {
            title: title.to_string(),
            slug: String::new(),
            excerpt: Some("Short summary".to_string()),
            content: "Long enough body text for a post.".to_string(),
            is_published: published,
        }
    }

    fn service() -> (BlogService, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        (BlogService::new(store.clone()), store)
    }

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("AML Compliance: 2025 Update!"), "aml-compliance-2025-update");
        assert_eq!(generate_slug("  KYC   basics "), "kyc-basics");
        assert_eq!(generate_slug("What's new?"), "whats-new");
    }

    #[test]
    fn test_generate_slug_drops_non_ascii_letters() {
        assert_eq!(
            generate_slug("Café Regulation Über Alles"),
            "caf-regulation-ber-alles"
        );

        let mut draft = BlogDraft {
            title: "Café Regulation Über Alles".to_string(),
            content: "Ten characters at least.".to_string(),
            ..BlogDraft::default()
        };
        draft.fill_slug();
        assert_eq!(draft.slug, "caf-regulation-ber-alles");
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_field() {
        let bad = BlogDraft {
            title: "Hi".to_string(),
            slug: "Bad Slug".to_string(),
            excerpt: Some("x".repeat(201)),
            content: "short".to_string(),
            is_published: false,
        };
        let fields: Vec<&str> = bad.validate().unwrap_err().iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["title", "slug", "excerpt", "content"]);

        let mut ok = draft("Valid title", false);
        ok.fill_slug();
        assert_eq!(ok.slug, "valid-title");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_slug_pattern() {
        let mut d = draft("Valid title", false);
        for (slug, ok) in [("abc", true), ("a-b-c", true), ("abc-", false), ("a--b", false), ("ABC", false)] {
            d.slug = slug.to_string();
            assert_eq!(d.validate().is_ok(), ok, "slug {}", slug);
        }
    }

    #[test]
    fn test_fill_slug_keeps_entered_slug() {
        let mut d = draft("Some Title", false);
        d.slug = "custom-slug".to_string();
        d.fill_slug();
        assert_eq!(d.slug, "custom-slug");
    }

    #[test]
    fn test_format_date() {
        let date = Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(format_date(&date), "March 7, 2025");
    }

    #[tokio::test]
    async fn test_create_and_read_published() {
        let (blog, _store) = service();
        let post = blog.create(draft("AML Basics", true), "u-admin").await.unwrap();
        assert_eq!(post.slug, "aml-basics");
        assert_eq!(post.author_id.as_deref(), Some("u-admin"));

        let read = blog.published_post("aml-basics").await.unwrap();
        assert_eq!(read.id, post.id);
        let listing = blog.published_posts().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].slug, "aml-basics");
    }

    #[tokio::test]
    async fn test_published_post_carries_author_byline() {
        let (blog, store) = service();
        store
            .insert(
                Table::Profiles,
                json!({"id": "u-grace", "first_name": "Grace", "last_name": "Hopper"}),
            )
            .await
            .unwrap();
        store
            .insert(Table::Profiles, json!({"id": "u-blank", "first_name": null, "last_name": ""}))
            .await
            .unwrap();
        blog.create(draft("By Grace", true), "u-grace").await.unwrap();
        blog.create(draft("No Name", true), "u-blank").await.unwrap();
        blog.create(draft("No Profile", true), "u-missing").await.unwrap();

        let post = blog.published_post("by-grace").await.unwrap();
        assert_eq!(post.author_name(), "Grace Hopper");
        let post = blog.published_post("no-name").await.unwrap();
        assert_eq!(post.author_name(), DEFAULT_AUTHOR);
        let post = blog.published_post("no-profile").await.unwrap();
        assert!(post.author.is_none());
        assert_eq!(post.author_name(), "CompliancePro Team");
    }

    #[test]
    fn test_author_name_with_one_part() {
        let profile = AuthorProfile {
            first_name: None,
            last_name: Some("Lovelace".to_string()),
        };
        assert_eq!(profile.full_name(), "Lovelace");
    }

    #[tokio::test]
    async fn test_drafts_hidden_from_public() {
        let (blog, _store) = service();
        blog.create(draft("Draft Post", false), "u-admin").await.unwrap();
        assert!(blog.published_posts().await.unwrap().is_empty());
        assert!(matches!(
            blog.published_post("draft-post").await,
            Err(BlogError::NotFound)
        ));
        assert_eq!(blog.all_posts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listing_newest_first() {
        let (blog, store) = service();
        for (slug, created) in [("older", "2025-01-01T00:00:00Z"), ("newer", "2025-02-01T00:00:00Z")] {
            store
                .insert(
                    Table::BlogPosts,
                    json!({
                        "title": slug, "slug": slug, "content": "body text here",
                        "is_published": true, "created_at": created
                    }),
                )
                .await
                .unwrap();
        }
        let slugs: Vec<String> = blog
            .published_posts()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.slug)
            .collect();
        assert_eq!(slugs, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn test_duplicate_slug() {
        let (blog, _store) = service();
        blog.create(draft("Same Title", true), "u-admin").await.unwrap();
        let err = blog.create(draft("Same Title", true), "u-admin").await.unwrap_err();
        assert!(matches!(err, BlogError::SlugTaken(ref s) if s == "same-title"));
    }

    #[tokio::test]
    async fn test_update_sets_updated_at() {
        let (blog, _store) = service();
        let post = blog.create(draft("First Title", false), "u-admin").await.unwrap();

        let mut edit = BlogDraft::from_post(&post);
        edit.title = "Second Title".to_string();
        edit.is_published = true;
        blog.update(&post.id, edit).await.unwrap();

        let updated = blog.post(&post.id).await.unwrap();
        assert_eq!(updated.title, "Second Title");
        assert_eq!(updated.slug, "first-title");
        assert!(updated.is_published);
        assert!(updated.updated_at.unwrap() >= post.updated_at.unwrap());

        assert!(matches!(
            blog.update("missing", draft("Whatever", false)).await,
            Err(BlogError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_invalid_draft_not_stored() {
        let (blog, store) = service();
        let err = blog.create(draft("No", false), "u-admin").await.unwrap_err();
        assert!(matches!(err, BlogError::Invalid(_)));
        assert_eq!(store.row_count(Table::BlogPosts), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let (blog, _store) = service();
        let post = blog.create(draft("To Remove", true), "u-admin").await.unwrap();
        blog.delete(&post.id).await.unwrap();
        assert!(matches!(blog.post(&post.id).await, Err(BlogError::NotFound)));
        assert!(matches!(blog.delete(&post.id).await, Err(BlogError::NotFound)));
    }
}
