//! loanbook-core: a loan-portfolio analytics engine over SQLite.
//!
//! Ingestion populates the base tables (customers, loans, transactions);
//! the feature engine derives one risk row per loan; the aggregation
//! engine rolls the book into summaries and monthly trends; the safe
//! query executor mediates all ad-hoc analyst access, logging every
//! attempt to the query history.

pub mod aggregation;
pub mod config;
pub mod engine;
pub mod error;
pub mod feature_engine;
pub mod ingest;
pub mod query_executor;
pub mod store;
pub mod types;

pub use config::AnalyticsConfig;
pub use engine::PortfolioEngine;
pub use error::{CoreError, CoreResult};
