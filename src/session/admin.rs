//! Admin predicate over a session identity.

use super::Session;
use serde::{Deserialize, Serialize};

/// The single address the site has always treated as its administrator.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@compliancehub.com";

/// Decides whether a session belongs to an administrator.
///
/// A session is admin if its email is on the allow-list (exact match), or if
/// a role claim is configured and the session's role equals it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminPolicy {
    #[serde(default = "default_emails")]
    pub emails: Vec<String>,
    #[serde(default)]
    pub role_claim: Option<String>,
}

fn default_emails() -> Vec<String> {
    vec![DEFAULT_ADMIN_EMAIL.to_string()]
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self {
            emails: default_emails(),
            role_claim: None,
        }
    }
}

impl AdminPolicy {
    pub fn allow_list<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            emails: emails.into_iter().map(Into::into).collect(),
            role_claim: None,
        }
    }

    pub fn with_role_claim(mut self, role: impl Into<String>) -> Self {
        self.role_claim = Some(role.into());
        self
    }

    pub fn is_admin(&self, session: Option<&Session>) -> bool {
        let Some(session) = session else {
            return false;
        };

        if let (Some(claim), Some(role)) = (&self.role_claim, &session.user.role) {
            if claim == role {
                return true;
            }
        }

        match session.email() {
            Some(email) => self.emails.iter().any(|allowed| allowed == email),
            None => false,
        }
    }
}
