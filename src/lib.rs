//! dlink: resolve protected and ad-gated download links into direct URLs
//!
//! Commands:
//! - resolve: Resolve links to direct download URLs
//! - classify: Show which site family a link belongs to
//! - sites: List supported domain substrings

pub mod automation;
pub mod browser;
pub mod cache;
pub mod classify;
pub mod config;
pub mod deadline;
pub mod error;
pub mod extract;
pub mod families;
pub mod fetch;
pub mod generic;
pub mod logging;
pub mod protection;
pub mod resolve_links;
pub mod resolver;
pub mod schema;
pub mod toolkit;

pub use cache::{LinkCache, MemoryCache, YamlCache};
pub use classify::SiteTable;
pub use config::{BrowserTimings, Credentials, EngineConfig};
pub use error::{FailureKind, StageError};
pub use resolver::Resolver;
pub use schema::{ResolutionRequest, ResolutionResult};
