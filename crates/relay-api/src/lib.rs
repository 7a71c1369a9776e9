//! HTTP boundary of the Sintegre webhook relay.
//!
//! Exposes webhook intake, record queries, metrics, and the manual
//! retry/reprocess actions over the processing engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use handlers::AppState;
pub use server::{create_router, start_server};
