//! # promptplan
//!
//! Handlebars-style prompt templates, functions composed by templates, and a planner that asks an
//! LLM to write such a template for a goal.
//!
//! **Note: `promptplan` is a WIP, so the APIs are subject to change.**
//!
//! ## Usage
//! `promptplan` is not released on crates.io. To use it, add a dependency in `Cargo.toml`
//! ```toml
//! promptplan = { git = "https://github.com/ifsheldon/promptplan.git", branch = "main"}
//! ```
//!
//! ## Concepts and Design
//! The APIs are designed to be explicit: a prompt is a template rendered with variables, a model
//! call is a function, and a plan is again just a template. Everything a plan can do is visible in
//! the functions registered in a kernel.
//!
//! ### Prompt Template
//!
//! A template in Handlebars syntax, see [template](crate::template).
//!
//! ```text
//! {{#message role="system"}}You are a friendly assistant.{{/message}}
//! {{#each messages}}{{#message role=role}}{{content}}{{/message}}{{/each}}
//! ```
//!
//! Besides the usual `if`, `unless`, `each` and `with` blocks, templates `set` and `get` variables,
//! compare values, emit chat messages with `message` and call registered functions as helpers named
//! `Plugin_Function`. Rendering is async because a helper may call a model.
//!
//! A rendered prompt is turned into a [ModelRequest](crate::chat::ModelRequest): every
//! `<message role="...">` element becomes a chat message, a prompt without any becomes one user message.
//!
//! ### Function and Plugin
//!
//! A [Function](crate::function::Function) describes itself with a
//! [FunctionView](crate::function::FunctionView) and is invoked with [Variables](crate::function::Variables).
//!
//! * [NativeFunction](crate::function::native::NativeFunction): async Rust code.
//! * [SemanticFunction](crate::function::semantic::SemanticFunction): a template sent to a model.
//! * [HandlebarsPlan](crate::planner::plan::HandlebarsPlan): a generated template.
//!
//! Functions are grouped in [Plugin](crate::plugin::Plugin)s.
//!
//! ### Kernel
//!
//! A [Kernel](crate::kernel::Kernel) holds the model services and the plugins, and runs functions.
//!
//! ### Filler
//!
//! Anything that fills one or more variables, see [filler](crate::filler).
//!
//! ### Planner
//!
//! The [HandlebarsPlanner](crate::planner::HandlebarsPlanner) lists the functions of a kernel to a
//! model and asks it for a template reaching a goal. When running the plan fails, the failed plan
//! and its error are sent back for another attempt.
//!
//! ### Services
//!
//! * Chat completions from OpenAI or Azure OpenAI, see [services::openai].
//! * HuggingFace inference tasks, see [services::huggingface].
//! * Hosted assistants answering in threads, see [assistant].
//!
//! ### Post-processing
//!
//! Replies of LLMs are post-processed with [utilities](crate::utils), e.g. the plan in a reply is
//! extracted from a fenced code block.
//!
//! ## License
//!
//! `promptplan` will always remain free under Apache license.
//!
//! ## Attribution
//! * `async_openai`: Chat completions are sent with this crate.
//! * `tiktoken-rs`: In [crate::utils::token::tiktoken], token counting is backed by `tiktoken-rs`.
//!
//!

pub mod assistant;
pub mod chat;
pub mod filler;
pub mod function;
pub mod kernel;
pub mod planner;
pub mod plugin;
pub mod services;
pub mod template;
pub mod utils;
