//! Image selector
//!
//! Builds the ordered work list for one run, either from a spreadsheet or
//! from the catalog, then drops every image the success ledger already holds.

pub mod spreadsheet;

use crate::catalog::ImageCatalog;
use crate::error::{MigratorError, Result};
use crate::image::ImageRef;
use crate::ledger::SuccessIndex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Where the candidate images come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionCriteria {
    /// Header-keyed spreadsheet; exclusion matches on name and tag
    Spreadsheet(PathBuf),
    /// Images used by jobs inside the window plus all official images;
    /// exclusion matches on catalog id or on name and tag
    Catalog { start_time: String, end_time: String },
}

/// Work list produced by [`ImageSelector::select`]
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub images: Vec<ImageRef>,
    /// Candidates dropped because the success ledger already has them
    pub already_migrated: usize,
}

impl Selection {
    pub fn count(&self) -> usize {
        self.images.len()
    }
}

pub struct ImageSelector {
    catalog: Option<Arc<dyn ImageCatalog>>,
}

impl ImageSelector {
    pub fn new(catalog: Option<Arc<dyn ImageCatalog>>) -> Self {
        Self { catalog }
    }

    pub async fn select(&self, criteria: &SelectionCriteria, prior: &SuccessIndex) -> Result<Selection> {
        let candidates = match criteria {
            SelectionCriteria::Spreadsheet(path) => spreadsheet::read_spreadsheet(path)?,
            SelectionCriteria::Catalog { start_time, end_time } => {
                self.from_catalog(start_time, end_time).await?
            }
        };

        let candidates = dedup_by_identity(candidates);
        let before = candidates.len();
        let images: Vec<ImageRef> = candidates
            .into_iter()
            .filter(|image| !already_migrated(criteria, prior, image))
            .collect();

        let selection = Selection {
            already_migrated: before - images.len(),
            images,
        };
        tracing::info!(
            candidates = before,
            already_migrated = selection.already_migrated,
            selected = selection.count(),
            "image selection finished"
        );
        Ok(selection)
    }

    async fn from_catalog(&self, start_time: &str, end_time: &str) -> Result<Vec<ImageRef>> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            MigratorError::Selection("catalog selection requested without a catalog".to_string())
        })?;

        let job_ids = catalog
            .job_image_ids(start_time, end_time)
            .await
            .map_err(selection_error)?;
        let official_ids = catalog.official_image_ids().await.map_err(selection_error)?;

        let mut seen = HashSet::new();
        let ids: Vec<i64> = job_ids
            .into_iter()
            .chain(official_ids)
            .filter(|id| seen.insert(*id))
            .collect();
        tracing::debug!(ids = ids.len(), "catalog ids in window or official");

        catalog.images_by_ids(&ids).await.map_err(selection_error)
    }
}

fn selection_error(err: MigratorError) -> MigratorError {
    match err {
        MigratorError::Selection(_) => err,
        other => MigratorError::Selection(other.to_string()),
    }
}

fn already_migrated(criteria: &SelectionCriteria, prior: &SuccessIndex, image: &ImageRef) -> bool {
    match (criteria, image.id) {
        (SelectionCriteria::Catalog { .. }, Some(id)) => {
            prior.contains_id(id) || prior.contains_name_tag(&image.name, &image.tag)
        }
        _ => prior.contains_name_tag(&image.name, &image.tag),
    }
}

/// Keep the first occurrence of each (name, tag); order is preserved
fn dedup_by_identity(images: Vec<ImageRef>) -> Vec<ImageRef> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|image| seen.insert((image.name.clone(), image.tag.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MigrationOutcome;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct FakeCatalog {
        images: BTreeMap<i64, ImageRef>,
        job_ids: Vec<i64>,
        official_ids: Vec<i64>,
        reachable: bool,
    }

    impl FakeCatalog {
        fn new() -> Self {
            let images = [
                (1, ImageRef::new("lib/nginx", "1.25").with_id(1)),
                (2, ImageRef::new("lib/redis", "7").with_id(2)),
                (3, ImageRef::new("ai/pytorch", "2.1").with_id(3)),
                (4, ImageRef::new("ai/tf", "2.15").with_id(4)),
            ]
            .into_iter()
            .collect();
            Self {
                images,
                job_ids: vec![3, 1],
                official_ids: vec![1, 4],
                reachable: true,
            }
        }
    }

    #[async_trait]
    impl ImageCatalog for FakeCatalog {
        async fn job_image_ids(&self, _start: &str, _end: &str) -> Result<Vec<i64>> {
            if !self.reachable {
                return Err(MigratorError::Io(std::io::Error::other("connection refused")));
            }
            Ok(self.job_ids.clone())
        }

        async fn official_image_ids(&self) -> Result<Vec<i64>> {
            Ok(self.official_ids.clone())
        }

        async fn images_by_ids(&self, ids: &[i64]) -> Result<Vec<ImageRef>> {
            let wanted: HashSet<_> = ids.iter().collect();
            Ok(self
                .images
                .iter()
                .filter(|(id, _)| wanted.contains(id))
                .map(|(_, image)| image.clone())
                .collect())
        }

        async fn record_outcome(&self, _outcome: &MigrationOutcome) -> Result<()> {
            Ok(())
        }

        async fn publish_image_metadata(&self, _outcome: &MigrationOutcome, _az: &str) -> Result<()> {
            Ok(())
        }
    }

    fn catalog_criteria() -> SelectionCriteria {
        SelectionCriteria::Catalog {
            start_time: "2023-01-01 00:00:00".to_string(),
            end_time: "2023-06-30 00:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_catalog_union_is_deduplicated() {
        let selector = ImageSelector::new(Some(Arc::new(FakeCatalog::new())));
        let selection = selector
            .select(&catalog_criteria(), &SuccessIndex::default())
            .await
            .unwrap();
        let ids: Vec<_> = selection.images.iter().map(|i| i.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(selection.already_migrated, 0);
    }

    #[tokio::test]
    async fn test_prior_successes_are_excluded_and_selection_shrinks() {
        let selector = ImageSelector::new(Some(Arc::new(FakeCatalog::new())));
        let first = selector.select(&catalog_criteria(), &SuccessIndex::default()).await.unwrap();

        let done = vec![MigrationOutcome::succeeded(&first.images[0], 100)];
        let prior = SuccessIndex::from_outcomes(&done);
        let second = selector.select(&catalog_criteria(), &prior).await.unwrap();

        assert!(second.count() < first.count());
        assert_eq!(second.already_migrated, 1);
        assert!(second.images.iter().all(|i| i.id != first.images[0].id));

        // same ledger, same catalog: same result
        let third = selector.select(&catalog_criteria(), &prior).await.unwrap();
        assert_eq!(second.images, third.images);
    }

    #[tokio::test]
    async fn test_catalog_mode_excludes_success_recorded_without_id() {
        // e.g. written by an earlier spreadsheet run without an image_id column
        let selector = ImageSelector::new(Some(Arc::new(FakeCatalog::new())));
        let prior = SuccessIndex::from_outcomes(&[MigrationOutcome::succeeded(
            &ImageRef::new("lib/nginx", "1.25"),
            100,
        )]);

        let selection = selector.select(&catalog_criteria(), &prior).await.unwrap();
        let ids: Vec<_> = selection.images.iter().map(|i| i.id.unwrap()).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(selection.already_migrated, 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_exclude() {
        let selector = ImageSelector::new(Some(Arc::new(FakeCatalog::new())));
        let failed = MigrationOutcome::failed(&ImageRef::new("lib/nginx", "1.25").with_id(1), "boom");
        let prior = SuccessIndex::from_outcomes(&[failed]);
        let selection = selector.select(&catalog_criteria(), &prior).await.unwrap();
        assert_eq!(selection.count(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_catalog_is_selection_error() {
        let mut catalog = FakeCatalog::new();
        catalog.reachable = false;
        let selector = ImageSelector::new(Some(Arc::new(catalog)));
        let err = selector
            .select(&catalog_criteria(), &SuccessIndex::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigratorError::Selection(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_catalog_mode_without_catalog() {
        let selector = ImageSelector::new(None);
        let err = selector
            .select(&catalog_criteria(), &SuccessIndex::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigratorError::Selection(_)));
    }

    #[test]
    fn test_spreadsheet_mode_matches_name_and_tag() {
        let criteria = SelectionCriteria::Spreadsheet(PathBuf::from("images.xlsx"));
        let prior = SuccessIndex::from_outcomes(&[MigrationOutcome::succeeded(
            &ImageRef::new("lib/nginx", "1.25"),
            1,
        )]);
        assert!(already_migrated(&criteria, &prior, &ImageRef::new("lib/nginx", "1.25").with_id(99)));
        assert!(!already_migrated(&criteria, &prior, &ImageRef::new("lib/nginx", "1.26")));
    }

    #[test]
    fn test_dedup_keeps_first() {
        let images = vec![
            ImageRef::new("a", "1").with_size(1),
            ImageRef::new("b", "1"),
            ImageRef::new("a", "1").with_size(2),
        ];
        let deduped = dedup_by_identity(images);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].size, Some(1));
    }
}
