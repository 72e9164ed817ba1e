//! The hosted assistants API: objects, requests and an HTTP client.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::services::errors::UnexpectedResponse;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";
const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v1");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantObject {
    pub id: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadObject {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageText {
    pub value: String,
}

/// One part of a thread message. Only text parts are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<MessageText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageObject {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl MessageObject {
    /// The text parts of the message, one per line.
    pub fn text(&self) -> String {
        self.content.iter()
            .filter_map(|c| c.text.as_ref())
            .map(|t| t.value.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunObject {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreation {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDetails {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_creation: Option<MessageCreation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: String,
    pub step_details: StepDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStepList {
    pub data: Vec<RunStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateAssistantRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Endpoints of the assistants API used by [Assistant](crate::assistant::Assistant).
#[async_trait]
pub trait AssistantsApi: Send + Sync {
    async fn create_assistant(&self, request: &CreateAssistantRequest) -> Result<AssistantObject>;

    async fn create_thread(&self) -> Result<ThreadObject>;

    async fn retrieve_thread(&self, thread_id: &str) -> Result<ThreadObject>;

    async fn create_message(&self, thread_id: &str, request: &CreateMessageRequest) -> Result<MessageObject>;

    async fn retrieve_message(&self, thread_id: &str, message_id: &str) -> Result<MessageObject>;

    async fn create_run(&self, thread_id: &str, request: &CreateRunRequest) -> Result<RunObject>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject>;

    /// Steps in the order they were created.
    async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<RunStepList>;
}

/// [AssistantsApi] over HTTP.
#[derive(Clone)]
pub struct OpenAIAssistantsClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl OpenAIAssistantsClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Url::parse(OPENAI_API_BASE)?,
            api_key: api_key.into(),
        })
    }

    /// Another API root, e.g. a proxy. A trailing `/` is added when missing.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };
        self.base_url = base_url;
        Ok(self)
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER.0, BETA_HEADER.1)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UnexpectedResponse {
                status: status.as_u16(),
                body,
            }.into());
        }
        serde_json::from_str(&body).map_err(|_| UnexpectedResponse {
            status: status.as_u16(),
            body,
        }.into())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        debug!("GET {}", url);
        self.send(self.client.get(url)).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path)?;
        debug!("POST {}", url);
        self.send(self.client.post(url).json(body)).await
    }
}

#[async_trait]
impl AssistantsApi for OpenAIAssistantsClient {
    async fn create_assistant(&self, request: &CreateAssistantRequest) -> Result<AssistantObject> {
        self.post("assistants", request).await
    }

    async fn create_thread(&self) -> Result<ThreadObject> {
        self.post("threads", &serde_json::json!({})).await
    }

    async fn retrieve_thread(&self, thread_id: &str) -> Result<ThreadObject> {
        self.get(&format!("threads/{}", thread_id)).await
    }

    async fn create_message(&self, thread_id: &str, request: &CreateMessageRequest) -> Result<MessageObject> {
        self.post(&format!("threads/{}/messages", thread_id), request).await
    }

    async fn retrieve_message(&self, thread_id: &str, message_id: &str) -> Result<MessageObject> {
        self.get(&format!("threads/{}/messages/{}", thread_id, message_id)).await
    }

    async fn create_run(&self, thread_id: &str, request: &CreateRunRequest) -> Result<RunObject> {
        self.post(&format!("threads/{}/runs", thread_id), request).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject> {
        self.get(&format!("threads/{}/runs/{}", thread_id, run_id)).await
    }

    async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<RunStepList> {
        self.get(&format!("threads/{}/runs/{}/steps?order=asc", thread_id, run_id)).await
    }
}
