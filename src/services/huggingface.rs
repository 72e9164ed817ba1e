//! HuggingFace inference API tasks.
//!
//! Request bodies and response parsing are plain functions of the service, so they can be checked
//! without a network.

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::chat::{ModelRequest, Role};
use crate::function::semantic::ExecutionSettings;
use crate::services::errors::{UnexpectedResponse, UnsupportedRequest};
use crate::services::{AIService, Capability, ModelResult};
use crate::utils::JsonMap;

pub const HUGGING_FACE_BASE_URL: &str = "https://api-inference.huggingface.co/models";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HuggingFaceTask {
    Summarization,
    TextToImage,
    FillMask,
    QuestionAnswering,
}

impl HuggingFaceTask {
    pub fn capability(&self) -> Capability {
        match self {
            HuggingFaceTask::Summarization => Capability::Summarization,
            HuggingFaceTask::TextToImage => Capability::TextToImage,
            HuggingFaceTask::FillMask => Capability::FillMask,
            HuggingFaceTask::QuestionAnswering => Capability::QuestionAnswering,
        }
    }
}

/// One candidate of a fill-mask task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillMaskCandidate {
    pub sequence: String,
    pub score: f64,
    pub token: i64,
    pub token_str: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SummarizationOutput {
    summary_text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct QuestionAnsweringOutput {
    answer: String,
    score: f64,
    start: usize,
    end: usize,
}

#[derive(Clone)]
pub struct HuggingFaceService {
    client: reqwest::Client,
    model_id: String,
    task: HuggingFaceTask,
    api_key: Option<String>,
    endpoint: Option<Url>,
    capabilities: [Capability; 1],
}

impl HuggingFaceService {
    pub fn new(model_id: impl Into<String>, task: HuggingFaceTask) -> Self {
        Self {
            client: reqwest::Client::new(),
            model_id: model_id.into(),
            task,
            api_key: None,
            endpoint: None,
            capabilities: [task.capability()],
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sends requests to `endpoint` instead of the hosted inference API.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.endpoint = Some(Url::parse(endpoint)?);
        Ok(self)
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn task(&self) -> HuggingFaceTask {
        self.task
    }

    /// The explicit endpoint, else `{base}/{model}`.
    pub fn request_uri(&self) -> Result<Url> {
        match &self.endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Ok(Url::parse(&format!("{}/{}", HUGGING_FACE_BASE_URL, self.model_id))?),
        }
    }

    fn unsupported(&self, reason: impl Into<String>) -> UnsupportedRequest {
        UnsupportedRequest {
            service: format!("{} ({:?})", self.model_id, self.task),
            reason: reason.into(),
        }
    }

    fn last_user_text<'r>(&self, request: &'r ModelRequest) -> Result<&'r str> {
        request.last_user_message()
            .map(|m| m.content.as_str())
            .ok_or_else(|| self.unsupported("the request has no user message").into())
    }

    /// The JSON body for `request`. Task parameters are taken from a `parameters` object in the
    /// execution settings.
    pub fn build_body(&self, request: &ModelRequest, settings: Option<&ExecutionSettings>) -> Result<Value> {
        let mut body = match self.task {
            HuggingFaceTask::Summarization => {
                let users: Vec<_> = request.user_messages().collect();
                if users.len() != 1 {
                    return Err(self.unsupported(format!(
                        "summarization takes exactly one user message, got {}", users.len())).into());
                }
                json!({"inputs": users[0].content})
            }
            HuggingFaceTask::TextToImage | HuggingFaceTask::FillMask => {
                json!({"inputs": self.last_user_text(request)?})
            }
            HuggingFaceTask::QuestionAnswering => {
                let context = request.messages.iter()
                    .filter(|m| m.role == Role::System)
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                json!({"inputs": {"question": self.last_user_text(request)?, "context": context}})
            }
        };
        if let Some(parameters) = settings.and_then(|s| s.extra.get("parameters")) {
            body["parameters"] = parameters.clone();
        }
        Ok(body)
    }

    /// Reads a successful response body.
    pub fn parse_response(&self, content_type: Option<&str>, body: &[u8]) -> Result<ModelResult> {
        let unexpected = || UnexpectedResponse {
            status: 200,
            body: String::from_utf8_lossy(body).into_owned(),
        };
        match self.task {
            HuggingFaceTask::Summarization => {
                let outputs: Vec<SummarizationOutput> = serde_json::from_slice(body).map_err(|_| unexpected())?;
                let output = outputs.into_iter().next().ok_or_else(unexpected)?;
                Ok(ModelResult::new(output.summary_text))
            }
            HuggingFaceTask::FillMask => {
                let candidates: Vec<FillMaskCandidate> = serde_json::from_slice(body).map_err(|_| unexpected())?;
                Ok(ModelResult::new(serde_json::to_value(candidates)?))
            }
            HuggingFaceTask::QuestionAnswering => {
                let output: QuestionAnsweringOutput = serde_json::from_slice(body).map_err(|_| unexpected())?;
                let mut metadata = JsonMap::new();
                metadata.insert("score".to_string(), json!(output.score));
                metadata.insert("start".to_string(), json!(output.start));
                metadata.insert("end".to_string(), json!(output.end));
                Ok(ModelResult::new(output.answer).with_metadata(metadata))
            }
            HuggingFaceTask::TextToImage => {
                let mime_type = content_type.unwrap_or("image/jpeg");
                if !mime_type.starts_with("image/") {
                    return Err(unexpected().into());
                }
                Ok(ModelResult::new(json!({
                    "mime_type": mime_type,
                    "data": STANDARD.encode(body),
                })))
            }
        }
    }
}

#[async_trait]
impl AIService for HuggingFaceService {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn complete(&self, request: &ModelRequest, settings: Option<&ExecutionSettings>) -> Result<ModelResult> {
        let body = self.build_body(request, settings)?;
        let mut http_request = self.client.post(self.request_uri()?.as_str()).json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }
        let response = http_request.send().await?;
        let status = response.status();
        let content_type = response.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(UnexpectedResponse {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }.into());
        }
        self.parse_response(content_type.as_deref(), &bytes)
    }
}

#[cfg(test)]
mod test_huggingface {
    use crate::chat::ChatMessage;

    use super::*;

    #[test]
    fn test_request_uri() {
        let service = HuggingFaceService::new("facebook/bart-large-cnn", HuggingFaceTask::Summarization);
        assert_eq!("https://api-inference.huggingface.co/models/facebook/bart-large-cnn", service.request_uri().unwrap().as_str());
        let service = service.with_endpoint("http://localhost:8080/generate").unwrap();
        assert_eq!("http://localhost:8080/generate", service.request_uri().unwrap().as_str());
        assert!(HuggingFaceService::new("m", HuggingFaceTask::FillMask).with_endpoint("not a url").is_err());
    }

    #[test]
    fn test_summarization_needs_one_user_message() {
        let service = HuggingFaceService::new("bart", HuggingFaceTask::Summarization);
        let request = ModelRequest::new(vec![ChatMessage::user("long text")]);
        assert_eq!(json!({"inputs": "long text"}), service.build_body(&request, None).unwrap());

        let request = ModelRequest::new(vec![ChatMessage::user("a"), ChatMessage::user("b")]);
        let error = service.build_body(&request, None).unwrap_err();
        assert!(error.downcast_ref::<UnsupportedRequest>().is_some());

        let result = service.parse_response(Some("application/json"), br#"[{"summary_text": "short"}]"#).unwrap();
        assert_eq!(json!("short"), result.value);
        assert!(service.parse_response(None, br#"{"error": "loading"}"#).is_err());
    }

    #[test]
    fn test_question_answering() {
        let service = HuggingFaceService::new("deepset/roberta-base-squad2", HuggingFaceTask::QuestionAnswering);
        let request = ModelRequest::new(vec![
            ChatMessage::system("Paris is the capital of France."),
            ChatMessage::user("What is the capital of France?"),
        ]);
        let settings: ExecutionSettings = serde_json::from_value(json!({"parameters": {"top_k": 1}})).unwrap();
        let body = service.build_body(&request, Some(&settings)).unwrap();
        assert_eq!(json!({
            "inputs": {"question": "What is the capital of France?", "context": "Paris is the capital of France."},
            "parameters": {"top_k": 1},
        }), body);

        let result = service.parse_response(None, br#"{"answer": "Paris", "score": 0.9, "start": 0, "end": 5}"#).unwrap();
        assert_eq!(json!("Paris"), result.value);
        assert_eq!(json!(5), result.metadata["end"]);
    }

    #[test]
    fn test_fill_mask() {
        let service = HuggingFaceService::new("bert-base-uncased", HuggingFaceTask::FillMask);
        let body = br#"[{"sequence": "paris is nice", "score": 0.5, "token": 3000, "token_str": "paris"}]"#;
        let result = service.parse_response(None, body).unwrap();
        let candidates: Vec<FillMaskCandidate> = serde_json::from_value(result.value).unwrap();
        assert_eq!("paris", candidates[0].token_str);
    }

    #[test]
    fn test_text_to_image() {
        let service = HuggingFaceService::new("stable-diffusion", HuggingFaceTask::TextToImage);
        let result = service.parse_response(Some("image/png"), &[1, 2, 3]).unwrap();
        assert_eq!(json!({"mime_type": "image/png", "data": "AQID"}), result.value);
        assert!(service.parse_response(Some("application/json"), b"{}").is_err());
        assert_eq!(&[Capability::TextToImage], service.capabilities());
    }
}
