//! HTTP handlers, one module per resource.

pub mod api_keys;
pub mod enrich;
pub mod entities;
pub mod jobs;
