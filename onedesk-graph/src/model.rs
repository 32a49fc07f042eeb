use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node in a drive: file, folder, or a shortcut to an item shared from
/// another drive.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderFacet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ItemReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_item: Option<RemoteItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ItemReference>,
}

impl DriveItem {
    /// Placeholder item carrying only a name, used to describe a folder that
    /// does not exist yet.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    /// Drive that owns this item. Shared and top-level items carry no parent
    /// reference of their own, so the remote item's parent is consulted.
    pub fn drive_id(&self) -> Option<&str> {
        let parent = match &self.parent_reference {
            Some(parent) => Some(parent),
            None => self
                .remote_item
                .as_ref()
                .and_then(|remote| remote.parent_reference.as_ref()),
        };
        parent.and_then(|parent| parent.drive_id.as_deref())
    }

    pub fn item_ref(&self) -> Option<RemoteItemRef> {
        let item_id = self.id.as_deref()?;
        let drive_id = self.drive_id()?;
        Some(RemoteItemRef::new(drive_id, item_id))
    }
}

/// Resolved `(drive id, item id)` address of a drive item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteItemRef {
    drive_id: String,
    item_id: String,
}

impl RemoteItemRef {
    pub fn new(drive_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            drive_id: drive_id.into(),
            item_id: item_id.into(),
        }
    }

    pub fn drive_id(&self) -> &str {
        &self.drive_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn to_item_reference(&self) -> ItemReference {
        ItemReference {
            drive_id: Some(self.drive_id.clone()),
            id: Some(self.item_id.clone()),
        }
    }
}

impl fmt::Display for RemoteItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.drive_id, self.item_id)
    }
}

/// Result of a copy request: either done on the spot or accepted for
/// background processing with a monitor URL to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Completed,
    Accepted { monitor_url: url::Url },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum CopyJobStatus {
    NotStarted,
    InProgress,
    Waiting,
    Completed,
    Failed,
    Other(String),
}

impl CopyJobStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::NotStarted | Self::InProgress | Self::Waiting)
    }
}

impl From<String> for CopyJobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "notStarted" => Self::NotStarted,
            "inProgress" => Self::InProgress,
            "waiting" => Self::Waiting,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Other(value),
        }
    }
}

impl From<CopyJobStatus> for String {
    fn from(value: CopyJobStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CopyJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "notStarted",
            Self::InProgress => "inProgress",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(other) => other.as_str(),
        };
        f.write_str(name)
    }
}

fn default_job_status() -> CopyJobStatus {
    CopyJobStatus::Completed
}

/// Body returned by a copy monitor URL.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    #[serde(default = "default_job_status")]
    pub status: CopyJobStatus,
    #[serde(default)]
    pub percentage_complete: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl MonitorStatus {
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::String(message) => Some(message.clone()),
            Value::Object(object) => Some(
                object
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(object.clone()).to_string()),
            ),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}
