//! # Chat
//! Messages exchanged with chat models, and the markup that carries them inside a rendered prompt.
//!
//! A template writes messages with the `message` block helper:
//! ```text
//! {{#message role="system"}}You are a helpful assistant.{{/message}}
//! {{#each messages}}{{#message role=role}}{{content}}{{/message}}{{/each}}
//! ```
//! which renders to `<message role="system">...</message>` elements. [ModelRequest::from_rendered_prompt]
//! turns them back into [ChatMessage]s. Short tags such as `<user>...</user>` are accepted as well.

use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filler::{FillVariables, FillWith};
use crate::function::Variables;

lazy_static! {
    static ref MESSAGE_ELEMENT_RE: Regex =
        Regex::new(r#"(?s)<message\s+role\s*=\s*["']([A-Za-z]+)["']\s*>(.*?)</message>|<(system|user|assistant)~?>(.*?)</(system|user|assistant)~?>"#).unwrap();
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = errors::InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "function" => Ok(Role::Function),
            "tool" => Ok(Role::Tool),
            _ => Err(errors::InvalidRole { role: s.to_string() }),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

/// An ordered conversation. Fills the template variable `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    #[serde(skip, default = "ChatHistory::default_variables_to_fill")]
    variables_to_fill: Vec<String>,
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatHistory {
    pub const MESSAGES_VARIABLE: &'static str = "messages";

    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            variables_to_fill: Self::default_variables_to_fill(),
        }
    }

    fn default_variables_to_fill() -> Vec<String> {
        vec![Self::MESSAGES_VARIABLE.to_string()]
    }

    pub fn add_message(&mut self, message: ChatMessage) -> &mut Self {
        self.messages.push(message);
        self
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) -> &mut Self {
        self.add_message(ChatMessage::user(content))
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) -> &mut Self {
        self.add_message(ChatMessage::assistant(content))
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) -> &mut Self {
        self.add_message(ChatMessage::system(content))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl FillVariables for ChatHistory {
    fn variables_to_fill(&self) -> &Vec<String> {
        &self.variables_to_fill
    }
}

impl FillWith<()> for ChatHistory {
    fn fill_with(&self, variables: &mut Variables, context: ()) -> Result<()> {
        let messages = serde_json::to_value(&self.messages)?;
        variables.insert(Self::MESSAGES_VARIABLE.to_string(), messages);
        Ok(context)
    }
}

/// What a model service receives: the messages of a rendered prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
}

impl ModelRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// Extracts the chat messages from a rendered prompt.
    ///
    /// A prompt without any message markup is sent as a single user message. Unknown roles in
    /// `<message role="...">` elements are an error.
    pub fn from_rendered_prompt(rendered: &str) -> Result<Self> {
        let mut messages = Vec::new();
        for captures in MESSAGE_ELEMENT_RE.captures_iter(rendered) {
            let (role, content) = match (captures.get(1), captures.get(2)) {
                (Some(role), Some(content)) => (role.as_str(), content.as_str()),
                _ => {
                    // short tags must be closed by the same role
                    if captures.get(3).map(|m| m.as_str()) != captures.get(5).map(|m| m.as_str()) {
                        continue;
                    }
                    match (captures.get(3), captures.get(4)) {
                        (Some(role), Some(content)) => (role.as_str(), content.as_str()),
                        _ => continue,
                    }
                }
            };
            let role: Role = role.parse()?;
            messages.push(ChatMessage::new(role, decode_html_entities(content)));
        }
        if messages.is_empty() {
            let trimmed = rendered.trim();
            if !trimmed.is_empty() {
                messages.push(ChatMessage::user(decode_html_entities(trimmed)));
            }
        }
        Ok(Self { messages })
    }

    pub fn user_messages(&self) -> impl Iterator<Item=&ChatMessage> {
        self.messages.iter().filter(|m| m.role == Role::User)
    }

    pub fn system_messages(&self) -> impl Iterator<Item=&ChatMessage> {
        self.messages.iter().filter(|m| m.role == Role::System)
    }

    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

impl From<&ChatHistory> for ModelRequest {
    fn from(history: &ChatHistory) -> Self {
        Self::new(history.messages.clone())
    }
}

/// Converts a template value holding `{role, content}` objects into chat messages.
pub fn messages_from_value(value: &Value) -> Result<Vec<ChatMessage>> {
    Ok(serde_json::from_value(value.clone())?)
}

fn decode_html_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// A message role that is not one of system, user, assistant, function or tool.
    #[derive(Debug, Clone)]
    pub struct InvalidRole {
        pub role: String,
    }

    impl fmt::Display for InvalidRole {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "InvalidRole: {} is not one of system, user, assistant, function, tool", self.role)
        }
    }

    impl Error for InvalidRole {}
}

#[cfg(test)]
mod test_chat {
    use super::*;
    use crate::filler::Fill;

    #[test]
    fn test_parse_message_elements() {
        let rendered = "<message role=\"system\">You are helpful.</message>\n<message role=\"user\">1 &lt; 2?</message>";
        let request = ModelRequest::from_rendered_prompt(rendered).unwrap();
        assert_eq!(vec![ChatMessage::system("You are helpful."), ChatMessage::user("1 < 2?")], request.messages);
    }

    #[test]
    fn test_parse_short_tags() {
        let rendered = "<system~>Be brief.</system~><user>hi</user><assistant>hello</assistant>";
        let request = ModelRequest::from_rendered_prompt(rendered).unwrap();
        assert_eq!(3, request.messages.len());
        assert_eq!(Role::System, request.messages[0].role);
        assert_eq!("hello", request.messages[2].content);
    }

    #[test]
    fn test_plain_prompt_is_user_message() {
        let request = ModelRequest::from_rendered_prompt("  What is 1 + 1?\n").unwrap();
        assert_eq!(vec![ChatMessage::user("What is 1 + 1?")], request.messages);
        assert!(ModelRequest::from_rendered_prompt("   ").unwrap().messages.is_empty());
    }

    #[test]
    fn test_multiline_message() {
        let rendered = "<message role=\"user\">line one\nline two</message>";
        let request = ModelRequest::from_rendered_prompt(rendered).unwrap();
        assert_eq!("line one\nline two", request.messages[0].content);
    }

    #[test]
    fn test_invalid_role() {
        let error = ModelRequest::from_rendered_prompt("<message role=\"robot\">beep</message>").unwrap_err();
        assert!(error.downcast_ref::<errors::InvalidRole>().is_some());
    }

    #[test]
    fn test_history_fills_messages() {
        let mut history = ChatHistory::new();
        history.add_system_message("sys").add_user_message("hi");
        let mut variables = Variables::new();
        history.fill(&mut variables).unwrap();
        let messages = messages_from_value(&variables["messages"]).unwrap();
        assert_eq!(history.messages, messages);
        assert_eq!("user", variables["messages"][1]["role"]);
    }
}
