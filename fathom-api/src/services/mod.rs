//! Service Layer
//!
//! Business logic between the HTTP routes and the storage and cache ports.

mod aggregation_service;

pub use aggregation_service::*;
