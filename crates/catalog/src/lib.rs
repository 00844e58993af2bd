//! HTTP client for the catalog/file server.
//!
//! The catalog server owns the photo database and original files, and on
//! capable deployments also exposes processing endpoints. This crate wraps
//! the handful of endpoints the client core consumes: capability discovery,
//! one-shot processing, batch job submission/control, and raw file fetch.

pub mod client;
pub mod wire;

pub use client::{CatalogApiError, CatalogClient};
