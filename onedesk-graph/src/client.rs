use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use url::Url;

use crate::model::{CopyOutcome, DriveItem, MonitorStatus, RemoteItemRef};

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com";
const API_VERSION: &str = "v1.0";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot be a base for item paths")]
    InvalidBaseUrl,
    #[error("api returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("unexpected response status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("copy was accepted but no monitor url was returned")]
    MissingMonitorUrl,
}

impl GraphError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GraphError::Api { status, .. } | GraphError::UnexpectedStatus(status) => Some(*status),
            GraphError::Request(err) => err.status(),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl GraphClient {
    pub fn new(token: impl Into<String>) -> Result<Self, GraphError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, GraphError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(GraphError::InvalidBaseUrl);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        })
    }

    /// Lists every child of `parent`, following `@odata.nextLink` pages.
    pub async fn list_children(&self, parent: &RemoteItemRef) -> Result<Vec<DriveItem>, GraphError> {
        let mut next = Some(self.item_endpoint(parent, Some("children"))?);
        let mut items = Vec::new();
        while let Some(url) = next.take() {
            let response = self.authorized(self.http.get(url)).send().await?;
            let page: ChildrenPage = Self::handle_response(response).await?;
            items.extend(page.value);
            next = page.next_link.map(|link| Url::parse(&link)).transpose()?;
        }
        Ok(items)
    }

    pub async fn create_child(
        &self,
        parent: &RemoteItemRef,
        name: &str,
        is_folder: bool,
        additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError> {
        let url = self.item_endpoint(parent, Some("children"))?;
        let mut body = Map::new();
        body.insert("name".into(), Value::String(name.to_string()));
        let facet = if is_folder { "folder" } else { "file" };
        body.insert(facet.into(), json!({}));
        merge_additional(&mut body, additional_data);
        let response = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Copies `item` into `destination`. A `202 Accepted` answer means the
    /// copy continues server-side and must be tracked through the returned
    /// monitor URL.
    pub async fn copy_item(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        additional_data: &Map<String, Value>,
    ) -> Result<CopyOutcome, GraphError> {
        let url = self.item_endpoint(item, Some("copy"))?;
        let body = transfer_body(destination, name, additional_data);
        let response = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await?;
        match response.status() {
            StatusCode::ACCEPTED => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or(GraphError::MissingMonitorUrl)?;
                let monitor_url = self.base_url.join(location)?;
                Ok(CopyOutcome::Accepted { monitor_url })
            }
            StatusCode::CREATED => Ok(CopyOutcome::Completed),
            status if status.is_success() => Err(GraphError::UnexpectedStatus(status)),
            _ => Err(Self::api_error(response).await),
        }
    }

    /// Re-parents and/or renames `item`. Moving to the current parent with a
    /// new name is a rename.
    pub async fn patch_parent_and_name(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError> {
        let url = self.item_endpoint(item, None)?;
        let body = transfer_body(destination, name, additional_data);
        let response = self
            .authorized(self.http.patch(url))
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_item(&self, item: &RemoteItemRef) -> Result<(), GraphError> {
        let url = self.item_endpoint(item, None)?;
        let response = self.authorized(self.http.delete(url)).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    /// Monitor URLs are pre-authenticated, so no authorization header is sent.
    pub async fn monitor_status(&self, monitor_url: &Url) -> Result<MonitorStatus, GraphError> {
        let response = self.http.get(monitor_url.clone()).send().await?;
        Self::handle_response(response).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    fn item_endpoint(&self, item: &RemoteItemRef, suffix: Option<&str>) -> Result<Url, GraphError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GraphError::InvalidBaseUrl)?;
            segments.pop_if_empty().extend([
                API_VERSION,
                "drives",
                item.drive_id(),
                "items",
                item.item_id(),
            ]);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GraphError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> GraphError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or(body);
        GraphError::Api { status, message }
    }
}

fn transfer_body(
    destination: &RemoteItemRef,
    name: Option<&str>,
    additional_data: &Map<String, Value>,
) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(
        "parentReference".into(),
        json!({
            "driveId": destination.drive_id(),
            "id": destination.item_id(),
        }),
    );
    if let Some(name) = name {
        body.insert("name".into(), Value::String(name.to_string()));
    }
    merge_additional(&mut body, additional_data);
    body
}

fn merge_additional(body: &mut Map<String, Value>, additional_data: &Map<String, Value>) {
    for (key, value) in additional_data {
        body.insert(key.clone(), value.clone());
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}
