//! In-process record store.
//!
//! Mirrors the behaviour the site relies on from the hosted store: generated
//! `id` and `created_at`, equality filters, ordering, and the unique slug on
//! blog posts.

use super::{require_filters, Embed, Filter, Query, RecordStore, Table};
use crate::error::RecordError;
use chrono::SecondsFormat;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Columns with a unique constraint, per table.
fn unique_columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::BlogPosts => &["slug"],
        Table::DemoRequests | Table::NewsletterSubscriptions | Table::Profiles => &[],
    }
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: DashMap<Table, Vec<Value>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.tables.get(&table).map(|rows| rows.len()).unwrap_or(0)
    }

    fn check_unique(
        table: Table,
        rows: &[Value],
        candidate: &Value,
        skip: Option<usize>,
    ) -> Result<(), RecordError> {
        for column in unique_columns(table) {
            let Some(value) = candidate.get(*column) else {
                continue;
            };
            let clash = rows
                .iter()
                .enumerate()
                .any(|(i, row)| Some(i) != skip && row.get(*column) == Some(value));
            if clash {
                return Err(RecordError::UniqueViolation(format!(
                    "duplicate key value violates unique constraint \"{}_{}_key\"",
                    table.name(),
                    column
                )));
            }
        }
        Ok(())
    }

    /// The embedded row for `row`, projected, or null.
    fn related(&self, row: &Value, embed: &Embed) -> Value {
        let Some(key) = row.get(&embed.foreign_key).filter(|k| !k.is_null()) else {
            return Value::Null;
        };
        self.tables
            .get(&embed.table)
            .and_then(|rows| {
                rows.iter()
                    .find(|r| r.get("id") == Some(key))
                    .map(|r| project(r, &embed.columns))
            })
            .unwrap_or(Value::Null)
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn project(row: &Value, columns: &[String]) -> Value {
    if columns.is_empty() {
        return row.clone();
    }
    let mut out = Map::new();
    for column in columns {
        if let Some(value) = row.get(column) {
            out.insert(column.clone(), value.clone());
        }
    }
    Value::Object(out)
}

fn expect_object(value: Value) -> Result<Map<String, Value>, RecordError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RecordError::Rejected {
            status: 400,
            code: None,
            message: format!("expected a JSON object, got {}", other),
        }),
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, RecordError> {
        let mut rows: Vec<Value> = self
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows
            .iter()
            .map(|row| {
                let mut out = project(row, &query.columns);
                for embed in &query.embeds {
                    let related = self.related(row, embed);
                    if let Value::Object(map) = &mut out {
                        map.insert(embed.alias.clone(), related);
                    }
                }
                out
            })
            .collect())
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, RecordError> {
        let mut row = expect_object(row)?;
        row.entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        let now = now_timestamp();
        row.entry("created_at")
            .or_insert_with(|| Value::String(now.clone()));
        if table == Table::BlogPosts {
            row.entry("updated_at").or_insert_with(|| Value::String(now));
        }
        let row = Value::Object(row);

        let mut rows = self.tables.entry(table).or_default();
        Self::check_unique(table, &rows, &row, None)?;
        rows.push(row.clone());
        tracing::debug!(table = %table, "row inserted");
        Ok(row)
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> Result<usize, RecordError> {
        require_filters(filters)?;
        let patch = expect_object(patch)?;

        let mut rows = self.tables.entry(table).or_default();
        let targets: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filters.iter().all(|f| f.matches(row)))
            .map(|(i, _)| i)
            .collect();

        let mut updated = Vec::with_capacity(targets.len());
        for &i in &targets {
            let mut row = rows[i].clone();
            if let Value::Object(map) = &mut row {
                for (k, v) in &patch {
                    map.insert(k.clone(), v.clone());
                }
            }
            Self::check_unique(table, &rows, &row, Some(i))?;
            updated.push((i, row));
        }
        for (i, row) in updated {
            rows[i] = row;
        }
        Ok(targets.len())
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, RecordError> {
        require_filters(filters)?;
        let mut rows = self.tables.entry(table).or_default();
        let before = rows.len();
        rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
        Ok(before - rows.len())
    }
}
