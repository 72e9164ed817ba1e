//! # Assistant
//! A hosted assistant answering in threads.
//!
//! Messages are added to a [thread](AssistantThread), then the assistant is asked to run on it.
//! A run is polled until it is no longer queued or in progress, and the messages it created are
//! returned in order.
//!
//! An assistant can also be handed to a kernel as a plugin, see [Assistant::as_plugin].

pub mod api;

use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::assistant::api::{AssistantsApi, CreateAssistantRequest, CreateMessageRequest, CreateRunRequest, RunStatus};
use crate::assistant::errors::RunFailed;
use crate::chat::{ChatMessage, Role};
use crate::function::native::NativeFunction;
use crate::function::{Arguments, ParameterType, ParameterView};
use crate::plugin::Plugin;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Serializable description of an assistant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub model: String,
}

/// What `Ask` and `ReplyBack` return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub thread_id: String,
    pub response: String,
    pub system_instructions: String,
}

pub struct Assistant {
    config: AssistantConfig,
    api: Arc<dyn AssistantsApi>,
    id: OnceCell<String>,
    poll_interval: Duration,
}

impl Assistant {
    pub fn new(config: AssistantConfig, api: Arc<dyn AssistantsApi>) -> Self {
        Self {
            config,
            api,
            id: OnceCell::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Uses an assistant that already exists instead of creating one on the first run.
    pub fn with_id(self, id: impl Into<String>) -> Self {
        Self {
            id: OnceCell::new_with(Some(id.into())),
            ..self
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// The id of the hosted assistant, created at most once.
    pub async fn id(&self) -> Result<&str> {
        let id = self.id.get_or_try_init(|| async {
            let request = CreateAssistantRequest {
                model: self.config.model.clone(),
                name: Some(self.config.name.clone()),
                description: Some(self.config.description.clone()).filter(|d| !d.is_empty()),
                instructions: self.config.instructions.clone(),
            };
            let assistant = self.api.create_assistant(&request).await?;
            info!("created assistant {} ({})", self.config.name, assistant.id);
            Ok::<_, anyhow::Error>(assistant.id)
        }).await?;
        Ok(id.as_str())
    }

    pub async fn create_thread(&self) -> Result<AssistantThread> {
        let thread = self.api.create_thread().await?;
        debug!("created thread {}", thread.id);
        Ok(AssistantThread::new(thread.id, Arc::clone(&self.api)))
    }

    /// An existing thread.
    pub async fn thread(&self, thread_id: &str) -> Result<AssistantThread> {
        let thread = self.api.retrieve_thread(thread_id).await?;
        Ok(AssistantThread::new(thread.id, Arc::clone(&self.api)))
    }

    /// Runs the assistant on `thread` and returns the messages it wrote.
    ///
    /// A failed run yields a single assistant message with the error of the run. A run that stops
    /// in any other state without completing is a [RunFailed] error.
    pub async fn run(&self, thread: &AssistantThread) -> Result<Vec<ChatMessage>> {
        let assistant_id = self.id().await?.to_string();
        let request = CreateRunRequest {
            assistant_id,
            instructions: self.config.instructions.clone(),
        };
        let mut run = self.api.create_run(&thread.id, &request).await?;
        while run.status.is_pending() {
            tokio::time::sleep(self.poll_interval).await;
            run = self.api.retrieve_run(&thread.id, &run.id).await?;
        }
        debug!("run {} on thread {} ended with {:?}", run.id, thread.id, run.status);

        if run.status == RunStatus::Failed {
            let error = run.last_error.map(|e| e.message).unwrap_or_default();
            warn!("run {} of {} failed: {}", run.id, self.config.name, error);
            return Ok(vec![ChatMessage::assistant(error)]);
        }

        if run.status != RunStatus::Completed {
            return Err(RunFailed { run_id: run.id, status: run.status }.into());
        }

        let steps = self.api.list_run_steps(&thread.id, &run.id).await?;
        let mut messages = Vec::new();
        for step in steps.data {
            if step.step_details.kind != "message_creation" {
                continue;
            }
            if let Some(creation) = step.step_details.message_creation {
                messages.push(thread.retrieve_message(&creation.message_id).await?);
            }
        }
        Ok(messages)
    }

    async fn ask_in(&self, thread: AssistantThread, ask: &str) -> Result<AskResponse> {
        info!("to {} > {}", self.config.name, ask);
        let messages = thread.send_user_message(self, ask).await?;
        let response = messages.iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        info!("{} > {}", self.config.name, response);
        Ok(AskResponse {
            thread_id: thread.id,
            response,
            system_instructions: format!(
                "Reply back to this thread with the ReplyBack function if you need to continue the conversation with {}",
                self.config.name),
        })
    }

    /// Starts a new thread with `ask`.
    pub async fn ask(&self, ask: &str) -> Result<AskResponse> {
        let thread = self.create_thread().await?;
        self.ask_in(thread, ask).await
    }

    /// Continues the thread `thread_id` with `reply`.
    pub async fn reply_back(&self, reply: &str, thread_id: &str) -> Result<AskResponse> {
        let thread = self.thread(thread_id).await?;
        self.ask_in(thread, reply).await
    }

    /// A plugin named after the assistant, with the functions `Ask(ask)` and
    /// `ReplyBack(reply, thread_id)`. Both return an [AskResponse] as JSON.
    pub fn as_plugin(self: &Arc<Self>) -> Plugin {
        let name = self.config.name.clone();
        let ask = {
            let assistant = Arc::clone(self);
            NativeFunction::new(
                "Ask",
                format!("Use this function to ask {} a request.\nDescription of the {} assistant: {}\n\
                         You may call this function in parallel to start multiple threads with the {} assistant.",
                        name, name, self.config.description, name),
                vec![ParameterView::new("ask", ParameterType::String)
                    .with_description(format!("The question to ask {}", name))
                    .required()],
                move |_kernel, variables| {
                    let assistant = Arc::clone(&assistant);
                    async move {
                        let response = assistant.ask(&variables.string_arg("ask")?).await?;
                        Ok::<_, anyhow::Error>(serde_json::to_value(response)?)
                    }
                },
            )
        };
        let reply_back = {
            let assistant = Arc::clone(self);
            NativeFunction::new(
                "ReplyBack",
                format!("If the response from {}_Ask requires a reply, use this function to reply back to the same thread", name),
                vec![
                    ParameterView::new("reply", ParameterType::String)
                        .with_description(format!("The reply to {}", name))
                        .required(),
                    ParameterView::new("thread_id", ParameterType::String)
                        .with_description(format!("The ID of the previous thread with {}", name))
                        .required(),
                ],
                move |_kernel, variables| {
                    let assistant = Arc::clone(&assistant);
                    async move {
                        let reply = variables.string_arg("reply")?;
                        let thread_id = variables.string_arg("thread_id")?;
                        let response = assistant.reply_back(&reply, &thread_id).await?;
                        Ok::<_, anyhow::Error>(serde_json::to_value(response)?)
                    }
                },
            )
        };
        Plugin::new(name)
            .with_description(self.config.description.clone())
            .add_function(ask)
            .add_function(reply_back)
    }
}

impl fmt::Debug for Assistant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assistant")
            .field("config", &self.config)
            .field("id", &self.id.get())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// A conversation with an assistant.
#[derive(Clone)]
#[readonly::make]
pub struct AssistantThread {
    #[readonly]
    pub id: String,
    api: Arc<dyn AssistantsApi>,
}

impl AssistantThread {
    fn new(id: String, api: Arc<dyn AssistantsApi>) -> Self {
        Self { id, api }
    }

    pub async fn add_user_message(&self, content: &str) -> Result<()> {
        let request = CreateMessageRequest {
            role: Role::User.as_str().to_string(),
            content: content.to_string(),
        };
        self.api.create_message(&self.id, &request).await?;
        Ok(())
    }

    /// Adds a user message and runs `assistant` on the thread.
    pub async fn send_user_message(&self, assistant: &Assistant, content: &str) -> Result<Vec<ChatMessage>> {
        self.add_user_message(content).await?;
        assistant.run(self).await
    }

    pub async fn retrieve_message(&self, message_id: &str) -> Result<ChatMessage> {
        let message = self.api.retrieve_message(&self.id, message_id).await?;
        let role: Role = message.role.parse()?;
        Ok(ChatMessage::new(role, message.text()))
    }
}

impl fmt::Debug for AssistantThread {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantThread")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    use crate::assistant::api::RunStatus;

    /// Error when a run stops without completing, e.g. it expired or waits for tool outputs.
    #[derive(Debug, Clone)]
    pub struct RunFailed {
        pub run_id: String,
        pub status: RunStatus,
    }

    impl fmt::Display for RunFailed {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "RunFailed: run {} stopped with status {:?}", self.run_id, self.status)
        }
    }

    impl Error for RunFailed {}
}
