//! Row storage as consumed by the site's pages.
//!
//! Rows travel as JSON objects; services convert them to typed structs with
//! [`select_as`] and [`select_one`].

pub mod memory;

pub use memory::MemoryRecordStore;

use crate::error::RecordError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Collections used by the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    BlogPosts,
    DemoRequests,
    NewsletterSubscriptions,
    /// Author names, keyed by user id. Read through an [`Embed`].
    Profiles,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::BlogPosts => "blog_posts",
            Table::DemoRequests => "demo_requests",
            Table::NewsletterSubscriptions => "newsletter_subscriptions",
            Table::Profiles => "profiles",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blog_posts" => Some(Table::BlogPosts),
            "demo_requests" => Some(Table::DemoRequests),
            "newsletter_subscriptions" => Some(Table::NewsletterSubscriptions),
            "profiles" => Some(Table::Profiles),
            _ => None,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A related row pulled in through a foreign key, returned under `alias`
/// as an object (or null when nothing matches).
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: String,
    pub table: Table,
    pub foreign_key: String,
    pub columns: Vec<String>,
}

impl Embed {
    /// `alias:foreign_key(col,col)`
    pub fn select_item(&self) -> String {
        format!("{}:{}({})", self.alias, self.foreign_key, self.columns.join(","))
    }
}

/// A select: projected columns (empty = all), embeds, filters, ordering, limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub columns: Vec<String>,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Embed the `table` row whose `id` equals this row's `foreign_key`.
    pub fn embed(mut self, alias: &str, table: Table, foreign_key: &str, columns: &[&str]) -> Self {
        self.embeds.push(Embed {
            alias: alias.to_string(),
            table,
            foreign_key: foreign_key.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// The select list in row API syntax.
    pub fn select_list(&self) -> String {
        let mut items = if self.columns.is_empty() {
            vec!["*".to_string()]
        } else {
            self.columns.clone()
        };
        items.extend(self.embeds.iter().map(Embed::select_item));
        items.join(",")
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn newest_first(self) -> Self {
        self.order_by("created_at", false)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Operations consumed from the hosted row store.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, RecordError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: Table, row: Value) -> Result<Value, RecordError>;

    /// Merge `patch` into every row matching all filters. Returns rows touched.
    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> Result<usize, RecordError>;

    /// Delete every row matching all filters. Returns rows removed.
    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, RecordError>;
}

pub async fn select_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    query: &Query,
) -> Result<Vec<T>, RecordError> {
    store
        .select(table, query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(RecordError::from))
        .collect()
}

/// First row of `query`, or `NotFound`.
pub async fn select_one<T: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    query: Query,
) -> Result<T, RecordError> {
    let query = query.limit(1);
    let row = store
        .select(table, &query)
        .await?
        .into_iter()
        .next()
        .ok_or(RecordError::NotFound)?;
    Ok(serde_json::from_value(row)?)
}

/// Refuse writes that would touch a whole table.
pub(crate) fn require_filters(filters: &[Filter]) -> Result<(), RecordError> {
    if filters.is_empty() {
        return Err(RecordError::Rejected {
            status: 400,
            code: None,
            message: "refusing to modify rows without a filter".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_names_round_trip() {
        for table in [
            Table::BlogPosts,
            Table::DemoRequests,
            Table::NewsletterSubscriptions,
            Table::Profiles,
        ] {
            assert_eq!(Table::parse(table.name()), Some(table));
        }
        assert_eq!(Table::parse("leads"), None);
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new()
            .columns(&["id", "title"])
            .eq("is_published", true)
            .newest_first()
            .limit(5);
        assert_eq!(query.columns, vec!["id", "title"]);
        assert_eq!(query.filters, vec![Filter::eq("is_published", true)]);
        assert_eq!(
            query.order,
            Some(Order {
                column: "created_at".to_string(),
                ascending: false
            })
        );
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_select_list() {
        assert_eq!(Query::new().select_list(), "*");
        assert_eq!(Query::new().columns(&["id", "title"]).select_list(), "id,title");
        let query = Query::new()
            .columns(&["id", "title"])
            .embed("profiles", Table::Profiles, "author_id", &["first_name", "last_name"]);
        assert_eq!(
            query.select_list(),
            "id,title,profiles:author_id(first_name,last_name)"
        );
        let query = Query::new().embed("profiles", Table::Profiles, "author_id", &["first_name"]);
        assert_eq!(query.select_list(), "*,profiles:author_id(first_name)");
    }

    #[test]
    fn test_filter_matches() {
        let row = json!({"slug": "aml-basics", "is_published": true});
        assert!(Filter::eq("slug", "aml-basics").matches(&row));
        assert!(!Filter::eq("slug", "kyc").matches(&row));
        assert!(!Filter::eq("missing", "x").matches(&row));
    }

    #[test]
    fn test_require_filters() {
        assert!(require_filters(&[]).is_err());
        assert!(require_filters(&[Filter::eq("id", "1")]).is_ok());
    }
}
