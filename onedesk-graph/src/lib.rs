mod client;
mod model;

pub use client::{GraphClient, GraphError};
pub use model::{
    CopyJobStatus, CopyOutcome, DriveItem, FolderFacet, ItemReference, MonitorStatus, RemoteItem,
    RemoteItemRef,
};
pub use reqwest::StatusCode;
