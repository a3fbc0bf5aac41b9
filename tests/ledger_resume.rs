use image_migrator::image::ImageRef;
use image_migrator::ledger::{Ledger, LedgerMode, MigrationOutcome};
use image_migrator::selector::spreadsheet::rows_to_images;
use image_migrator::selector::{ImageSelector, SelectionCriteria};
use std::path::{Path, PathBuf};

fn rows() -> Vec<Vec<String>> {
    [
        ["image_name", "image_tag", "image_size"],
        ["library/nginx", "1.25", "1048576"],
        ["library/redis", "7", "2097152"],
        ["ai/pytorch", "2.1", ""],
    ]
    .iter()
    .map(|row| row.iter().map(|cell| cell.to_string()).collect())
    .collect()
}

#[tokio::test]
async fn test_restart_reproduces_excluded_set() {
    let dir = tempfile::tempdir().unwrap();
    let images = rows_to_images(&rows()).unwrap();
    assert_eq!(images.len(), 3);

    {
        let ledger = Ledger::open(dir.path(), LedgerMode::Migration).await.unwrap();
        ledger.append(&MigrationOutcome::succeeded(&images[0], 1_000_000)).await;
        ledger.append(&MigrationOutcome::failed(&images[1], "exit status 1")).await;
    }

    // a fresh process sees the same ledger
    let first = Ledger::open(dir.path(), LedgerMode::Migration).await.unwrap();
    let index_a = first.load_prior_successes().await.unwrap();
    drop(first);
    let second = Ledger::open(dir.path(), LedgerMode::Sync).await.unwrap();
    let index_b = second.load_prior_successes().await.unwrap();

    let remaining = |index: &image_migrator::ledger::SuccessIndex| -> Vec<ImageRef> {
        images
            .iter()
            .filter(|image| !index.contains_name_tag(&image.name, &image.tag))
            .cloned()
            .collect()
    };
    assert_eq!(remaining(&index_a), remaining(&index_b));
    assert_eq!(remaining(&index_a).len(), 2);
    assert!(!index_a.contains_name_tag("library/redis", "7"));
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[tokio::test]
async fn test_spreadsheet_selection_skips_migrated_images() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(dir.path(), LedgerMode::Sync).await.unwrap();
    ledger
        .append(&MigrationOutcome::succeeded(&ImageRef::new("library/redis", "7"), 42))
        .await;
    let prior = ledger.load_prior_successes().await.unwrap();

    // two sheets with different column orders; nginx is listed on both
    let selector = ImageSelector::new(None);
    let selection = selector
        .select(&SelectionCriteria::Spreadsheet(fixture("images.xlsx")), &prior)
        .await
        .unwrap();

    let selected: Vec<_> = selection.images.iter().map(ToString::to_string).collect();
    assert_eq!(selected, vec!["library/nginx:1.25", "ai/pytorch:2.1"]);
    assert_eq!(selection.already_migrated, 1);
    assert_eq!(selection.images[0].id, Some(11));
    assert_eq!(selection.images[1].size, Some(2048));
}

#[tokio::test]
async fn test_missing_spreadsheet_is_fatal() {
    let selector = ImageSelector::new(None);
    let err = selector
        .select(&SelectionCriteria::Spreadsheet(fixture("missing.xlsx")), &Default::default())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}
