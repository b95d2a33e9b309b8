//! HTTP Front component (spec.md §4.H): listens, routes paths, binds the
//! auth and panic-catching middleware.
//!
//! Router/handler shape grounded on the teacher's `cli/commands/serve.rs`
//! (`axum::Router` + `axum::serve`), trimmed to the four routes this
//! gateway exposes.

pub mod middleware;
pub mod routes;

pub use routes::{build_router, AppState};
