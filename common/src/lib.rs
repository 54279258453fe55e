pub mod agent;
pub mod dag;
pub mod error;
pub mod llm;
pub mod report;
pub mod schema;
pub mod store;
pub mod tracing;

pub use agent::{analyze, ask, AnalysisBundle, AskOptions, QueryResult};
pub use error::{AskJsonError, Result};
pub use store::{Store, StoreOptions};
