use async_trait::async_trait;
use onedesk_graph::{
    CopyOutcome, DriveItem, GraphClient, GraphError, MonitorStatus, RemoteItemRef,
};
use serde_json::{Map, Value};
use url::Url;

/// The remote drive calls the task operations rely on.
#[async_trait]
pub trait RemoteDrive: Send + Sync {
    async fn list_children(&self, parent: &RemoteItemRef) -> Result<Vec<DriveItem>, GraphError>;

    async fn create_child(
        &self,
        parent: &RemoteItemRef,
        name: &str,
        is_folder: bool,
        additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError>;

    async fn copy_item(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        additional_data: &Map<String, Value>,
    ) -> Result<CopyOutcome, GraphError>;

    async fn patch_parent_and_name(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError>;

    async fn delete_item(&self, item: &RemoteItemRef) -> Result<(), GraphError>;

    async fn monitor_status(&self, monitor_url: &Url) -> Result<MonitorStatus, GraphError>;
}

#[async_trait]
impl RemoteDrive for GraphClient {
    async fn list_children(&self, parent: &RemoteItemRef) -> Result<Vec<DriveItem>, GraphError> {
        GraphClient::list_children(self, parent).await
    }

    async fn create_child(
        &self,
        parent: &RemoteItemRef,
        name: &str,
        is_folder: bool,
        additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError> {
        GraphClient::create_child(self, parent, name, is_folder, additional_data).await
    }

    async fn copy_item(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        additional_data: &Map<String, Value>,
    ) -> Result<CopyOutcome, GraphError> {
        GraphClient::copy_item(self, item, destination, name, additional_data).await
    }

    async fn patch_parent_and_name(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError> {
        GraphClient::patch_parent_and_name(self, item, destination, name, additional_data).await
    }

    async fn delete_item(&self, item: &RemoteItemRef) -> Result<(), GraphError> {
        GraphClient::delete_item(self, item).await
    }

    async fn monitor_status(&self, monitor_url: &Url) -> Result<MonitorStatus, GraphError> {
        GraphClient::monitor_status(self, monitor_url).await
    }
}
