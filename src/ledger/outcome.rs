//! Terminal record written once per attempted image

use crate::image::ImageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
}

impl OutcomeStatus {
    /// Numeric code used by the catalog's status table (1: succeeded, 2: failed)
    pub fn code(self) -> i8 {
        match self {
            OutcomeStatus::Succeeded => 1,
            OutcomeStatus::Failed => 2,
        }
    }
}

/// One line of the success or failure ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<i64>,
    pub image_name: String,
    pub image_tag: String,
    /// Verified size at the destination on success; the catalog's size, if any, on failure
    #[serde(default)]
    pub image_size: Option<u64>,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl MigrationOutcome {
    pub fn succeeded(image: &ImageRef, verified_size: u64) -> Self {
        Self {
            image_id: image.id,
            image_name: image.name.clone(),
            image_tag: image.tag.clone(),
            image_size: Some(verified_size),
            status: OutcomeStatus::Succeeded,
            errmsg: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(image: &ImageRef, cause: impl Into<String>) -> Self {
        Self {
            image_id: image.id,
            image_name: image.name.clone(),
            image_tag: image.tag.clone(),
            image_size: image.size,
            status: OutcomeStatus::Failed,
            errmsg: Some(cause.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    pub fn image_ref(&self) -> ImageRef {
        ImageRef {
            id: self.image_id,
            name: self.image_name.clone(),
            tag: self.image_tag.clone(),
            size: self.image_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_keeps_cause_and_catalog_size() {
        let image = ImageRef::new("lib/redis", "7").with_id(42).with_size(900);
        let outcome = MigrationOutcome::failed(&image, "exit status 1");
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.image_size, Some(900));
        assert_eq!(outcome.errmsg.as_deref(), Some("exit status 1"));
        assert_eq!(outcome.image_ref(), image);
    }

    #[test]
    fn test_json_line_shape() {
        let image = ImageRef::new("lib/redis", "7");
        let outcome = MigrationOutcome::succeeded(&image, 1000);
        let value: serde_json::Value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["image_size"], 1000);
        assert!(value.get("errmsg").is_none());
        assert!(value.get("image_id").is_none());
    }
}
