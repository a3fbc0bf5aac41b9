//! Per-image transfer through the external sync tool

pub mod classifier;
pub mod manifest;
pub mod syncer;

pub use classifier::{Classification, OutputClassifier, OutputEvent, classify};
pub use manifest::SyncManifest;
pub use syncer::{SyncerProcess, TransferTool, TransferVerdict};
