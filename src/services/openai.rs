use anyhow::Result;
use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestFunctionMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use crate::chat::{ChatMessage, ModelRequest, Role};
use crate::function::semantic::ExecutionSettings;
use crate::services::errors::EmptyReply;
use crate::services::{AIService, Capability, ModelResult};
use crate::utils::JsonMap;
use crate::utils::token::tiktoken::Tiktoken;

/// Chat completions through the OpenAI API or an Azure OpenAI deployment.
#[derive(Clone)]
pub struct OpenAIChatCompletion<C: Config> {
    client: Client<C>,
    model_id: String,
    service_id: String,
    /// Drops the oldest messages to fit the context window when set.
    counter: Option<Tiktoken>,
}

impl OpenAIChatCompletion<OpenAIConfig> {
    pub fn openai(model_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self::with_client(Client::with_config(config), model_id)
    }
}

impl OpenAIChatCompletion<AzureConfig> {
    /// `deployment_id` doubles as the model id.
    pub fn azure(deployment_id: impl Into<String>,
                 endpoint: impl Into<String>,
                 api_key: impl Into<String>,
                 api_version: impl Into<String>) -> Self {
        let deployment_id = deployment_id.into();
        let config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_key(api_key)
            .with_api_version(api_version)
            .with_deployment_id(deployment_id.as_str());
        Self::with_client(Client::with_config(config), deployment_id)
    }
}

impl<C: Config> OpenAIChatCompletion<C> {
    pub fn with_client(client: Client<C>, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            client,
            service_id: model_id.clone(),
            model_id,
            counter: None,
        }
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    /// Truncate long conversations to the context window of the model. Fails for models without
    /// a known tokenizer.
    pub fn with_history_truncation(mut self) -> Result<Self> {
        self.counter = Some(Tiktoken::new(self.model_id.as_str())?);
        Ok(self)
    }

    pub fn client(&self) -> &Client<C> {
        &self.client
    }

    /// Message names are only sent for function messages, the other request messages have no name.
    fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let content = message.content.as_str();
        let request_message: ChatCompletionRequestMessage = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            Role::Function | Role::Tool => ChatCompletionRequestFunctionMessageArgs::default()
                .name(message.name.as_deref().unwrap_or(message.role.as_str()))
                .content(content)
                .build()?
                .into(),
        };
        Ok(request_message)
    }

    /// Builds the API request, truncating the history first if enabled.
    pub fn build_request(&self,
                         request: &ModelRequest,
                         settings: Option<&ExecutionSettings>) -> Result<CreateChatCompletionRequest> {
        let messages = match &self.counter {
            Some(counter) => {
                let system = request.system_messages().next().cloned();
                counter.truncate_messages(&request.messages, system)?
            }
            None => request.messages.clone(),
        };
        let messages = messages.iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>>>()?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model_id.as_str()).messages(messages);
        if let Some(settings) = settings {
            if let Some(temperature) = settings.temperature() {
                args.temperature(temperature);
            }
            if let Some(top_p) = settings.top_p() {
                args.top_p(top_p);
            }
            if let Some(max_tokens) = settings.max_tokens() {
                args.max_tokens(u16::try_from(max_tokens).unwrap_or(u16::MAX));
            }
        }
        Ok(args.build()?)
    }
}

#[async_trait]
impl<C: Config + Send + Sync + 'static> AIService for OpenAIChatCompletion<C> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Chat]
    }

    async fn complete(&self, request: &ModelRequest, settings: Option<&ExecutionSettings>) -> Result<ModelResult> {
        let api_request = self.build_request(request, settings)?;
        let response = self.client.chat().create(api_request).await?;
        let content = response.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| EmptyReply { model: self.model_id.clone() })?;
        let mut metadata = JsonMap::new();
        metadata.insert("model".to_string(), Value::String(response.model));
        if let Some(usage) = response.usage {
            metadata.insert("prompt_tokens".to_string(), Value::from(usage.prompt_tokens));
            metadata.insert("completion_tokens".to_string(), Value::from(usage.completion_tokens));
            metadata.insert("total_tokens".to_string(), Value::from(usage.total_tokens));
        }
        Ok(ModelResult::new(content).with_metadata(metadata))
    }

    async fn complete_streaming(&self,
                                request: &ModelRequest,
                                settings: Option<&ExecutionSettings>) -> Result<BoxStream<'static, Result<String>>> {
        let api_request = self.build_request(request, settings)?;
        let stream = self.client.chat().create_stream(api_request).await?;
        let chunks = stream.filter_map(|chunk| async move {
            match chunk {
                Ok(response) => {
                    let text: String = response.choices
                        .into_iter()
                        .filter_map(|choice| choice.delta.content)
                        .collect();
                    if text.is_empty() { None } else { Some(Ok(text)) }
                }
                Err(e) => Some(Err(anyhow::Error::from(e))),
            }
        });
        Ok(chunks.boxed())
    }
}

#[cfg(test)]
mod test_openai {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_build_request() {
        let service = OpenAIChatCompletion::openai("gpt-4", "sk-test");
        let request = ModelRequest::new(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi").with_name("ada"),
            ChatMessage::assistant("hello"),
        ]);
        let settings: ExecutionSettings = serde_json::from_value(json!({"temperature": 0.5, "max_tokens": 100000})).unwrap();
        let api_request = service.build_request(&request, Some(&settings)).unwrap();
        assert_eq!("gpt-4", api_request.model);
        assert_eq!(3, api_request.messages.len());
        assert!(matches!(api_request.messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(api_request.messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(api_request.messages[2], ChatCompletionRequestMessage::Assistant(_)));
        assert_eq!(Some(0.5), api_request.temperature);
        assert_eq!(Some(u16::MAX), api_request.max_tokens);
        assert_eq!(None, api_request.top_p);
    }

    #[test]
    fn test_function_message_keeps_name() {
        let message = ChatMessage::new(Role::Function, "42").with_name("Math_Add");
        let request_message = OpenAIChatCompletion::<OpenAIConfig>::to_request_message(&message).unwrap();
        match request_message {
            ChatCompletionRequestMessage::Function(function) => assert_eq!("Math_Add", function.name),
            other => panic!("expected a function message, got {:?}", other),
        }
    }

    #[test]
    fn test_truncation() {
        let service = OpenAIChatCompletion::openai("gpt-4", "sk-test").with_history_truncation().unwrap();
        let mut messages = vec![ChatMessage::system("be brief")];
        let filler = "word ".repeat(1000);
        for _ in 0..20 {
            messages.push(ChatMessage::user(filler.as_str()));
        }
        let api_request = service.build_request(&ModelRequest::new(messages), None).unwrap();
        assert!(api_request.messages.len() < 21);
        assert!(matches!(api_request.messages[0], ChatCompletionRequestMessage::System(_)));

        assert!(OpenAIChatCompletion::openai("llama", "sk-test").with_history_truncation().is_err());
    }

    #[test]
    fn test_azure_ids() {
        let service = OpenAIChatCompletion::azure("gpt-35-turbo", "https://example.openai.azure.com", "key", "2023-05-15")
            .with_service_id("azure");
        assert_eq!("gpt-35-turbo", service.model_id());
        assert_eq!("azure", service.service_id());
    }
}
