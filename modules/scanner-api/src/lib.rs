//! Client for the scanner's session-authenticated REST surface.
//!
//! Everything here is blocking: one run walks the catalog and drives each
//! export to completion before moving on.

mod catalog;
mod client;
mod export;
mod session;
mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{Catalog, CatalogWalk, Exclusions, WalkFailure, WorkItem};
pub use client::{Call, RetryClient, TokenPlacement, DEFAULT_RETRY_ATTEMPTS};
pub use export::{
    ExportFormat, ExportJob, ExportOptions, ExportPoller, ExportStatus, ReportContents,
    REPORT_CONTENTS,
};
pub use session::{Credentials, Session};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
