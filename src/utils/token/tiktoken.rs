use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;
use anyhow::Result;
pub use tiktoken_rs::{get_bpe_from_model, CoreBPE};

use crate::chat::{ChatMessage, Role};
use crate::utils::token::CountToken;
use lazy_static::lazy_static;

const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_PER_NAME: usize = 1;

lazy_static! {
    /// const map from model name to max tokens.
    /// TODO: when `LazyCell` is stabilized, use that instead
    pub static ref MODEL_TO_MAX_TOKENS: HashMap<&'static str, usize> = HashMap::from([
        ("gpt-4", 8192),
        ("gpt-4-0613", 8192),
        ("gpt-4-32k", 32768),
        ("gpt-4-32k-0613", 32768),
        ("gpt-4-1106-preview", 128000),
        ("gpt-3.5-turbo", 4096),
        ("gpt-3.5-turbo-16k", 16384),
        ("gpt-3.5-turbo-0613", 4096),
        ("gpt-3.5-turbo-16k-0613", 16384),
        ("gpt-3.5-turbo-1106", 16385),
    ]);
}

/// Azure deployments drop the dot of `gpt-3.5`.
fn normalize_model_name(model: &str) -> String {
    model.replace("gpt-35", "gpt-3.5")
}

/// Counter using the Tiktoken tokenizer.
#[derive(Clone)]
#[readonly::make]
pub struct Tiktoken {
    /// The model name of the tokenizer. read-only.
    #[readonly]
    pub model: String,
    /// The context window of the model. read-only.
    #[readonly]
    pub max_tokens: usize,
    /// The tokenizer. read-only.
    #[readonly]
    pub bpe: CoreBPE,
}

impl Tiktoken {
    /// Create a new Tiktoken counter. Returns an error if the model is not in [MODEL_TO_MAX_TOKENS].
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let model = normalize_model_name(&model.into());
        let max_tokens = *MODEL_TO_MAX_TOKENS
            .get(model.as_str())
            .ok_or_else(|| UnsupportedModel { model: model.clone() })?;
        let family = if model.starts_with("gpt-4-32k") {
            "gpt-4-32k"
        } else if model.starts_with("gpt-4") {
            "gpt-4"
        } else {
            "gpt-3.5-turbo"
        };
        get_bpe_from_model(family).map(|bpe| Tiktoken {
            model,
            max_tokens,
            bpe,
        })
    }

    /// Count the number of tokens in a chat message. Following best practices from the OpenAI example.
    ///
    /// Assuming the model is NOT the legacy `gpt-3.5-turbo-0301`
    pub fn count_msg_token(&self, msg: &ChatMessage) -> usize {
        let content_token_count = self.count_token(msg.content.as_str());
        let name_token_count = match (&msg.name, msg.role) {
            (Some(_), Role::System | Role::User | Role::Assistant) => TOKENS_PER_NAME,
            _ => 0
        };
        content_token_count + name_token_count + TOKENS_PER_MESSAGE
    }

    /// Drops the oldest messages until the conversation fits the context window of the model.
    ///
    /// A `system_message` is always kept in front. A leading message equal to it is not
    /// duplicated.
    pub fn truncate_messages(&self,
                             messages: &[ChatMessage],
                             system_message: Option<ChatMessage>) -> Result<Vec<ChatMessage>> {
        self.truncate_messages_to(messages, system_message, self.max_tokens)
    }

    /// Same as [Tiktoken::truncate_messages] with an explicit token budget.
    pub fn truncate_messages_to(&self,
                                messages: &[ChatMessage],
                                system_message: Option<ChatMessage>,
                                max_tokens: usize) -> Result<Vec<ChatMessage>> {
        match system_message {
            Some(sys_prompt) => {
                let sys_prompt_token_count = self.count_msg_token(&sys_prompt);
                if sys_prompt_token_count > max_tokens {
                    return Err(SystemMessageTooLong {
                        token_count: sys_prompt_token_count,
                        max_tokens,
                    }.into());
                }
                let rest = match messages.first() {
                    Some(first) if first == &sys_prompt => &messages[1..],
                    _ => messages,
                };
                let truncate_start_idx = self.get_truncate_start_idx(rest, max_tokens - sys_prompt_token_count);
                let mut new_messages = Vec::with_capacity(rest.len() - truncate_start_idx + 1);
                new_messages.push(sys_prompt);
                new_messages.extend_from_slice(&rest[truncate_start_idx..]);
                Ok(new_messages)
            }
            None => {
                let truncate_start_idx = self.get_truncate_start_idx(messages, max_tokens);
                Ok(messages[truncate_start_idx..].to_vec())
            }
        }
    }

    pub(crate) fn get_truncate_start_idx(&self,
                                         messages: &[ChatMessage],
                                         max_tokens: usize) -> usize {
        let num_messages = messages.len();
        if max_tokens == 0 {
            return num_messages;
        }
        let mut token_count = 0;
        // TODO: make this algorithm more smart as in Python `tokentrim`
        let mut truncate_start_idx = 0;
        for (idx, msg) in messages.iter().enumerate().rev() {
            let message_token_count = self.count_msg_token(msg);
            if token_count + message_token_count > max_tokens {
                truncate_start_idx = idx + 1;
                break;
            }
            token_count += message_token_count;
        }
        truncate_start_idx
    }
}

impl CountToken for Tiktoken {
    fn count_token(&self, string: &str) -> usize {
        self.bpe.encode_with_special_tokens(string).len()
    }
}

/// Error when a model has no known tokenizer or context window.
#[derive(Debug, Clone)]
pub struct UnsupportedModel {
    pub model: String,
}

impl fmt::Display for UnsupportedModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "UnsupportedModel: model {} is not supported, supported models are {:?}",
               self.model,
               MODEL_TO_MAX_TOKENS.keys().collect::<Vec<_>>())
    }
}

impl Error for UnsupportedModel {}

/// Error when the system message alone exceeds the token budget.
#[derive(Debug, Clone)]
pub struct SystemMessageTooLong {
    pub token_count: usize,
    pub max_tokens: usize,
}

impl fmt::Display for SystemMessageTooLong {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SystemMessageTooLong: system message token count {} is greater than max tokens {}",
               self.token_count, self.max_tokens)
    }
}

impl Error for SystemMessageTooLong {}

#[cfg(test)]
mod test_tiktoken {
    use super::{Tiktoken, UnsupportedModel};
    use crate::chat::ChatMessage;
    use crate::utils::token::CountToken;

    #[test]
    fn test_unsupported_model() {
        let error = Tiktoken::new("llama-2").err().expect("llama-2 should be unsupported");
        assert!(error.downcast_ref::<UnsupportedModel>().is_some());
    }

    #[test]
    fn test_azure_model_name() {
        let counter = Tiktoken::new("gpt-35-turbo").unwrap();
        assert_eq!("gpt-3.5-turbo", counter.model);
        assert_eq!(4096, counter.max_tokens);
    }

    #[test]
    fn test_truncate_keeps_latest_messages() {
        let counter = Tiktoken::new("gpt-4").unwrap();
        let messages = vec![
            ChatMessage::user("first question"),
            ChatMessage::assistant("first answer"),
            ChatMessage::user("second question"),
        ];
        let last_cost = counter.count_msg_token(&messages[2]);
        let truncated = counter.truncate_messages_to(&messages, None, last_cost).unwrap();
        assert_eq!(vec![messages[2].clone()], truncated);

        let all = counter.truncate_messages(&messages, None).unwrap();
        assert_eq!(messages, all);
    }

    #[test]
    fn test_truncate_keeps_system_message() {
        let counter = Tiktoken::new("gpt-4").unwrap();
        let system = ChatMessage::system("be brief");
        let messages = vec![system.clone(), ChatMessage::user("hi"), ChatMessage::user("hello again")];
        let budget = counter.count_msg_token(&system) + counter.count_msg_token(&messages[2]);
        let truncated = counter.truncate_messages_to(&messages, Some(system.clone()), budget).unwrap();
        assert_eq!(vec![system, messages[2].clone()], truncated);
    }

    #[test]
    fn test_count_token() {
        let counter = Tiktoken::new("gpt-3.5-turbo").unwrap();
        assert_eq!(0, counter.count_token(""));
        assert!(counter.count_token("hello world") > 0);
    }
}
