//! # Services
//! Model backends that turn a [ModelRequest] into a [ModelResult].
//!
//! * [OpenAIChatCompletion](openai::OpenAIChatCompletion): chat completions from OpenAI or Azure OpenAI.
//! * [HuggingFaceService](huggingface::HuggingFaceService): HuggingFace inference tasks.

pub mod huggingface;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ModelRequest;
use crate::function::semantic::ExecutionSettings;
use crate::function::value_to_string;
use crate::utils::JsonMap;

/// What a service can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Chat,
    Summarization,
    TextToImage,
    FillMask,
    QuestionAnswering,
}

/// Output of a service, with extra information such as token usage in `metadata`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResult {
    pub value: Value,
    pub metadata: JsonMap,
}

impl ModelResult {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            metadata: JsonMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
pub trait AIService: Send + Sync {
    /// The model or deployment name.
    fn model_id(&self) -> &str;

    /// Name used to pick this service in execution settings. Defaults to the model id.
    fn service_id(&self) -> &str {
        self.model_id()
    }

    fn capabilities(&self) -> &[Capability];

    async fn complete(&self, request: &ModelRequest, settings: Option<&ExecutionSettings>) -> Result<ModelResult>;

    /// Streams the textual output. Services without streaming yield the whole output as one chunk.
    async fn complete_streaming(&self,
                                request: &ModelRequest,
                                settings: Option<&ExecutionSettings>) -> Result<BoxStream<'static, Result<String>>> {
        let result = self.complete(request, settings).await?;
        let text = value_to_string(&result.value);
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when a service cannot serve a request, e.g. summarizing several messages at once.
    #[derive(Debug, Clone)]
    pub struct UnsupportedRequest {
        pub service: String,
        pub reason: String,
    }

    impl fmt::Display for UnsupportedRequest {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "UnsupportedRequest for {}: {}", self.service, self.reason)
        }
    }

    impl Error for UnsupportedRequest {}

    /// Error when a service answers with a body it does not understand.
    #[derive(Debug, Clone)]
    pub struct UnexpectedResponse {
        pub status: u16,
        pub body: String,
    }

    impl fmt::Display for UnexpectedResponse {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "UnexpectedResponse with status {}: {}", self.status, self.body)
        }
    }

    impl Error for UnexpectedResponse {}

    /// Error when a model answers with no content at all.
    #[derive(Debug, Clone)]
    pub struct EmptyReply {
        pub model: String,
    }

    impl fmt::Display for EmptyReply {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "EmptyReply: model {} returned no content", self.model)
        }
    }

    impl Error for EmptyReply {}
}

/// A chat service answering from a script, for tests.
#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;

    pub(crate) struct ScriptedService {
        model_id: String,
        replies: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedService {
        pub(crate) fn new(model_id: &str, replies: &[&str]) -> Self {
            Self {
                model_id: model_id.to_string(),
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AIService for ScriptedService {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn capabilities(&self) -> &[Capability] {
            &[Capability::Chat]
        }

        async fn complete(&self, request: &ModelRequest, _settings: Option<&ExecutionSettings>) -> Result<ModelResult> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self.replies.lock().unwrap().pop_front()
                .ok_or_else(|| anyhow!("{} has no scripted reply left", self.model_id))?;
            Ok(ModelResult::new(reply))
        }
    }

    #[tokio::test]
    async fn test_default_streaming_is_one_chunk() {
        let service = ScriptedService::new("scripted", &["whole reply"]);
        let chunks: Vec<String> = service.complete_streaming(&ModelRequest::default(), None).await.unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(vec!["whole reply".to_string()], chunks);
        assert_eq!(1, service.requests().len());
    }
}
