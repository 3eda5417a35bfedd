//! Service layer for the lesson tracking application.
//!
//! This module contains the business logic for:
//! - Visitor identity hashing (`VisitorIdentity`)
//! - View recording with dedup (`ViewRecorder`)
//! - Client-side view reporting (`ViewReporter`)
//! - Likes and comments (`EngagementService`)
//! - Sitemap generation (`SitemapBuilder`)
//! - Counter reconciliation (`reconcile`)

mod engagement;
pub mod identity;
pub mod reconcile;
pub mod recorder;
pub mod reporter;
mod sitemap;

pub use engagement::EngagementService;
pub use identity::VisitorIdentity;
pub use reconcile::{Reconciliation, reconcile, reconcile_all, settle_period};
pub use recorder::{ViewRecorder, ViewRequest};
pub use reporter::{
    Environment, FileVisitorStore, HttpTransport, MemoryVisitorStore, ReportOutcome,
    SessionFlags, SessionStore, SkipReason, ViewReporter, ViewTransport, VisitorIdStore,
};
pub use sitemap::{ChangeFreq, SitemapBuilder, SitemapEntry, escape_xml};
