//! ComplianceHub - content and lead management for a compliance consultancy
//!
//! This library provides the session mirror, the hosted backend clients and
//! the blog and registration services behind the `hub` console and the
//! `hub-site` preview server.

pub mod backend;
pub mod blog;
pub mod config;
pub mod console;
pub mod error;
pub mod leads;
pub mod records;
pub mod router;
pub mod session;
pub mod site;

#[cfg(test)]
pub mod test_utils;

// Re-export Args for the binaries
pub use console::Args;
