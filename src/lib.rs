//! Image Migrator Library
//!
//! Bulk migration of container images from one registry to another. A run
//! selects the images still to migrate, drives the external sync tool for
//! each of them under a concurrency bound, verifies the result against the
//! target registry and records every outcome in an append-only ledger so
//! the next run resumes where this one stopped.

pub mod catalog;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod image;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod selector;
pub mod transfer;

pub use config::{AppConfig, AuthConfig};
pub use error::{MigratorError, Result};
pub use image::ImageRef;
pub use logging::Logger;
