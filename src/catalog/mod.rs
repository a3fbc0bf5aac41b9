//! Image catalog
//!
//! The relational catalog is read once to build the work list and, when
//! enabled, written to as a status sink. [`ImageCatalog`] is the seam; the
//! MySQL implementation lives in [`mysql`].

pub mod mysql;
pub mod types;

pub use mysql::MySqlCatalog;

use crate::error::Result;
use crate::image::ImageRef;
use crate::ledger::MigrationOutcome;
use async_trait::async_trait;

/// Repository flags for images that are always migrated
pub const PUBLISHED: i32 = 1;
pub const OFFICIAL_REPO: i32 = 1;

/// `image_metadata.status` for a published image
pub const METADATA_ONLINE: i32 = 1;
/// `image_metadata.sync_status` for an image synced back to the central site
pub const METADATA_SYNCED: i32 = 3;

#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Distinct image ids referenced by jobs created strictly inside the window
    async fn job_image_ids(&self, start_time: &str, end_time: &str) -> Result<Vec<i64>>;

    /// Ids of normal images in published official repositories
    async fn official_image_ids(&self) -> Result<Vec<i64>>;

    /// Normal images with the given ids, ordered by id
    async fn images_by_ids(&self, ids: &[i64]) -> Result<Vec<ImageRef>>;

    /// Insert a migration-status row for one outcome
    async fn record_outcome(&self, outcome: &MigrationOutcome) -> Result<()>;

    /// Insert an image-metadata row for a migrated image in availability zone `az_id`
    async fn publish_image_metadata(&self, outcome: &MigrationOutcome, az_id: &str) -> Result<()>;
}
