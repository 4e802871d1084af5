//! Registrations from the public site: demo requests and newsletter
//! subscriptions, and their admin-side listing and export.

use crate::error::{describe_fields, FieldError, RecordError};
use crate::records::{select_as, Query, RecordStore, Table};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Entries shown per collection in the summary.
const SUMMARY_RECENT: usize = 5;

/// Office details shown next to the contact form.
pub const CONTACT_DETAILS: &[&str] = &[
    "123 Compliance Way",
    "Financial District",
    "New York, NY 10001",
    "Email: info@nexuscompliance.com",
    "Phone: +1 (555) 123-4567",
    "Hours: Monday-Friday, 9AM-5PM EST",
];

#[derive(Debug, Error)]
pub enum LeadError {
    #[error("invalid registration:\n{}", describe_fields(.0))]
    Invalid(Vec<FieldError>),

    #[error(transparent)]
    Store(#[from] RecordError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interest {
    SaasDemo,
    Updates,
    Newsletter,
    Query,
}

impl Interest {
    pub const ALL: [Interest; 4] = [
        Interest::SaasDemo,
        Interest::Updates,
        Interest::Newsletter,
        Interest::Query,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interest::SaasDemo => "saas_demo",
            Interest::Updates => "updates",
            Interest::Newsletter => "newsletter",
            Interest::Query => "query",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Interest::SaasDemo => "SaaS platform demo",
            Interest::Updates => "Regulatory updates",
            Interest::Newsletter => "Newsletter",
            Interest::Query => "General query",
        }
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The registration form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub interest: Option<Interest>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub agree_to_terms: bool,
}

impl Registration {
    /// The newsletter-only variant of the form: interest is fixed.
    pub fn newsletter() -> Self {
        Self {
            interest: Some(Interest::Newsletter),
            ..Self::default()
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }

    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.first_name.trim().chars().count() < 2 {
            errors.push(FieldError::new("first_name", "First name must be at least 2 characters"));
        }
        if self.last_name.trim().chars().count() < 2 {
            errors.push(FieldError::new("last_name", "Last name must be at least 2 characters"));
        }
        if !EMAIL_PATTERN.is_match(self.email.trim()) {
            errors.push(FieldError::new("email", "Please enter a valid email address"));
        }
        if self.interest.is_none() {
            errors.push(FieldError::new("interest", "Please select what you're interested in"));
        }
        if !self.agree_to_terms {
            errors.push(FieldError::new("agree_to_terms", "You must agree to the terms and conditions"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoRequest {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company_name: Option<String>,
    pub service_interest: String,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterSubscription {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Which collection a registration landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadKind {
    Demo,
    Newsletter,
}

impl LeadKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "demo" => Some(LeadKind::Demo),
            "newsletter" => Some(LeadKind::Newsletter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadKind::Demo => "demo",
            LeadKind::Newsletter => "newsletter",
        }
    }

    pub fn table(&self) -> Table {
        match self {
            LeadKind::Demo => Table::DemoRequests,
            LeadKind::Newsletter => Table::NewsletterSubscriptions,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}-registrations.csv", self.as_str())
    }
}

const DEMO_HEADERS: &str = "Name,Email,Company,Interest,Message,Date";
const NEWSLETTER_HEADERS: &str = "Name,Email,Date";

/// Quote a CSV field, doubling inner quotes.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// `M/D/YYYY`
pub fn short_date(date: &DateTime<Utc>) -> String {
    date.format("%-m/%-d/%Y").to_string()
}

pub fn demo_csv(rows: &[DemoRequest]) -> String {
    let mut out = String::from(DEMO_HEADERS);
    out.push('\n');
    for row in rows {
        // an absent message is left as an empty unquoted field
        let message = non_empty(&row.message).map(quote).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            quote(&row.name),
            quote(&row.email),
            quote(row.company_name.as_deref().unwrap_or("")),
            quote(&row.service_interest),
            message,
            quote(&short_date(&row.created_at)),
        ));
    }
    out
}

pub fn newsletter_csv(rows: &[NewsletterSubscription]) -> String {
    let mut out = String::from(NEWSLETTER_HEADERS);
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{},{},{}\n",
            quote(row.name.as_deref().unwrap_or("")),
            quote(&row.email),
            quote(&short_date(&row.created_at)),
        ));
    }
    out
}

/// Counts and most recent entries of both collections.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadSummary {
    pub demo_total: usize,
    pub newsletter_total: usize,
    pub recent_demo: Vec<DemoRequest>,
    pub recent_newsletter: Vec<NewsletterSubscription>,
}

impl LeadSummary {
    pub fn from_rows(demo: &[DemoRequest], newsletter: &[NewsletterSubscription]) -> Self {
        Self {
            demo_total: demo.len(),
            newsletter_total: newsletter.len(),
            recent_demo: demo.iter().take(SUMMARY_RECENT).cloned().collect(),
            recent_newsletter: newsletter.iter().take(SUMMARY_RECENT).cloned().collect(),
        }
    }
}

impl fmt::Display for LeadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Registration summary")?;
        writeln!(f, "Demo requests: {}", self.demo_total)?;
        for row in &self.recent_demo {
            writeln!(
                f,
                "  {}  {} <{}>  {}",
                short_date(&row.created_at),
                row.name,
                row.email,
                row.service_interest
            )?;
        }
        writeln!(f, "Newsletter subscriptions: {}", self.newsletter_total)?;
        for row in &self.recent_newsletter {
            let name = row.name.as_deref().unwrap_or("-");
            writeln!(f, "  {}  {} <{}>", short_date(&row.created_at), name, row.email)?;
        }
        Ok(())
    }
}

pub struct LeadService {
    records: Arc<dyn RecordStore>,
}

impl LeadService {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Validate and store a registration. Newsletter interest goes to the
    /// subscription list, everything else is a demo request.
    pub async fn submit(&self, registration: &Registration) -> Result<LeadKind, LeadError> {
        registration.validate().map_err(LeadError::Invalid)?;
        let email = registration.email.trim();

        let kind = match registration.interest {
            Some(Interest::Newsletter) => {
                let row = json!({
                    "name": registration.full_name(),
                    "email": email,
                });
                self.records.insert(Table::NewsletterSubscriptions, row).await?;
                LeadKind::Newsletter
            }
            interest => {
                let row = json!({
                    "name": registration.full_name(),
                    "email": email,
                    // the column is NOT NULL, an empty company is sent as ""
                    "company_name": non_empty(&registration.company).unwrap_or(""),
                    "service_interest": interest.map(|i| i.as_str()),
                    "message": non_empty(&registration.message),
                });
                self.records.insert(Table::DemoRequests, row).await?;
                LeadKind::Demo
            }
        };
        tracing::info!(kind = kind.as_str(), "registration stored");
        Ok(kind)
    }

    pub async fn demo_requests(&self) -> Result<Vec<DemoRequest>, LeadError> {
        let query = Query::new().newest_first();
        Ok(select_as(self.records.as_ref(), Table::DemoRequests, &query).await?)
    }

    pub async fn newsletter_subscriptions(&self) -> Result<Vec<NewsletterSubscription>, LeadError> {
        let query = Query::new().newest_first();
        Ok(select_as(self.records.as_ref(), Table::NewsletterSubscriptions, &query).await?)
    }

    pub async fn export_csv(&self, kind: LeadKind) -> Result<String, LeadError> {
        Ok(match kind {
            LeadKind::Demo => demo_csv(&self.demo_requests().await?),
            LeadKind::Newsletter => newsletter_csv(&self.newsletter_subscriptions().await?),
        })
    }

    pub async fn summary(&self) -> Result<LeadSummary, LeadError> {
        let demo = self.demo_requests().await?;
        let newsletter = self.newsletter_subscriptions().await?;
        Ok(LeadSummary::from_rows(&demo, &newsletter))
    }
}
