//! Output module for console reporting
//!
//! This module handles:
//! - Rendering the summary and changelog of a finished session
//! - Loading and printing record store statistics

pub mod stats;
mod summary;

pub use stats::{load_statistics, print_statistics, StoreStatistics};
pub use summary::{
    format_changelog_entry, format_session_summary, print_changelog, print_session_summary,
};
