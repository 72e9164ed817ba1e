//! # Template
//! A Handlebars-style prompt template.
//!
//! Besides plain `{{variable}}` substitution a template can branch and loop with the usual block
//! helpers, assign variables, write chat messages and call any function registered in the
//! [Kernel] as a helper named `Plugin_Function`:
//!
//! ```text
//! {{#message role="system"}}You are a calculator.{{/message}}
//! {{set name="sum" value=(Math_Add a b)}}
//! {{#if (greaterThan sum 10)}}big{{else}}small{{/if}}
//! ```
//!
//! Function helpers may call models themselves, so rendering is async.
//!
//! ## Built-in helpers
//! * blocks: `if`, `unless`, `each`, `with`, `message`, `set`, `raw`
//! * inline: `set`, `get`, `json`, `eq` (also `equal`, `equals`), `lessThan`, `greaterThan`,
//!   `lessThanOrEqual`, `greaterThanOrEqual`, `concat`, `array`, `not`, `and`, `or`, `raw`
//!
//! Output is never HTML-escaped, so `{{x}}` and `{{{x}}}` render the same.

pub mod ast;
pub mod parser;
pub(crate) mod helpers;
pub(crate) mod render;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use log::warn;
use serde_json::Value;

use crate::function::Variables;
use crate::kernel::Kernel;
use crate::template::ast::{Call, Expression, Node, Path};
use crate::template::helpers::{is_builtin, is_helper_shaped};
use crate::template::render::Renderer;
use crate::utils::JsonMap;

/// A parsed prompt template. It can also have metadata in JSON format.
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PromptTemplate {
    /// The source of the template, immutable
    template: Arc<String>,

    nodes: Arc<Vec<Node>>,

    /// The metadata of the prompt template, readonly
    #[readonly]
    pub meta_data: Arc<JsonMap>,
}

impl PromptTemplate {
    /// Parse a template without metadata.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        Self::with_metadata(template, JsonMap::new())
    }

    /// Parse a template with metadata. Warns if the template does not have any expression.
    pub fn with_metadata(template: impl Into<String>, metadata: JsonMap) -> Result<Self> {
        let template = template.into();
        let nodes = parser::parse(&template)?;
        let prompt_template = Self {
            template: Arc::new(template),
            nodes: Arc::new(nodes),
            meta_data: Arc::new(metadata),
        };
        if prompt_template.expressions_count() == 0 {
            warn!("Your prompt template does not have any expression. If this is intended, ignore this message. \
            Otherwise, check whether you have written expressions correctly.\n\
            Got prompt template:\n\
            {}", prompt_template.template);
        }
        Ok(prompt_template)
    }

    /// Get the template source as a string.
    #[inline]
    pub fn str(&self) -> &str {
        &self.template
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of expressions and blocks, nested ones included.
    pub fn expressions_count(&self) -> usize {
        fn count(nodes: &[Node]) -> usize {
            nodes.iter().map(|node| match node {
                Node::Expression(_) => 1,
                Node::Block(block) => 1 + count(&block.body) + count(&block.inverse),
                _ => 0,
            }).sum()
        }
        count(&self.nodes)
    }

    /// Names of the variables the template reads from its top-level context, in order of first use.
    ///
    /// References inside `each` and `with` bodies point into the iterated item and are skipped, so
    /// are names assigned by an earlier `set`. A bare `{{name}}` is skipped when the renderer would
    /// call it as a helper, i.e. a built-in or a name shaped like `Plugin_Function`.
    pub fn input_variables(&self) -> Vec<String> {
        #[derive(Default)]
        struct Inputs {
            names: Vec<String>,
            assigned: HashSet<String>,
        }

        impl Inputs {
            fn read(&mut self, name: &str) {
                if !self.assigned.contains(name) && !self.names.iter().any(|n| n == name) {
                    self.names.push(name.to_string());
                }
            }

            fn path(&mut self, path: &Path) {
                if let (0, false, false, Some(first)) = (path.parents, path.data, path.this, path.segments.first()) {
                    self.read(first);
                }
            }

            fn arguments(&mut self, call: &Call) {
                call.params.iter().for_each(|p| self.expression(p));
                call.hash.iter().for_each(|(_, v)| self.expression(v));
            }

            fn expression(&mut self, expression: &Expression) {
                match expression {
                    Expression::Path(path) => self.path(path),
                    Expression::Literal(_) => {}
                    Expression::Call(call) => {
                        self.arguments(call);
                        if call.name == "set" {
                            self.assign(call);
                        }
                    }
                }
            }

            fn assign(&mut self, call: &Call) {
                let name = call.hash.iter()
                    .find(|(key, _)| key == "name")
                    .map(|(_, v)| v)
                    .or(call.params.first());
                if let Some(Expression::Literal(Value::String(name))) = name {
                    self.assigned.insert(name.clone());
                }
            }

            fn nodes(&mut self, nodes: &[Node]) {
                for node in nodes {
                    match node {
                        Node::Expression(Expression::Path(path)) => {
                            let is_helper = path.simple_name()
                                .is_some_and(|name| is_builtin(name) || is_helper_shaped(name));
                            if !is_helper {
                                self.path(path);
                            }
                        }
                        Node::Expression(expression) => self.expression(expression),
                        Node::Block(block) => {
                            self.arguments(&block.call);
                            if !matches!(block.call.name.as_str(), "each" | "with") {
                                self.nodes(&block.body);
                            }
                            self.nodes(&block.inverse);
                            if block.call.name == "set" {
                                self.assign(&block.call);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let mut inputs = Inputs::default();
        inputs.nodes(&self.nodes);
        inputs.names
    }

    /// Render the template. Variables assigned with `set` are written back to `variables`.
    pub async fn render(&self, kernel: &Kernel, variables: &mut Variables) -> Result<String> {
        Renderer::new(kernel, variables).render_nodes(&self.nodes).await
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    use serde_json::Value;

    use crate::function::ParameterType;

    /// Error when the template source is malformed.
    #[derive(Debug, Clone)]
    pub struct TemplateParseError {
        pub message: String,
        /// 1-based
        pub line: usize,
        /// 1-based, in characters
        pub column: usize,
    }

    impl fmt::Display for TemplateParseError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "TemplateParseError at line {} column {}: {}", self.line, self.column, self.message)
        }
    }

    impl Error for TemplateParseError {}

    /// Error when a helper is used in a way it does not support.
    #[derive(Debug, Clone)]
    pub struct RenderError {
        pub helper: String,
        pub message: String,
    }

    impl RenderError {
        pub(crate) fn new(helper: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                helper: helper.into(),
                message: message.into(),
            }
        }
    }

    impl fmt::Display for RenderError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "RenderError in helper {}: {}", self.helper, self.message)
        }
    }

    impl Error for RenderError {}

    /// Error when a helper is called that is neither built in nor a registered function.
    #[derive(Debug, Clone)]
    pub struct UnknownHelper {
        pub name: String,
    }

    impl fmt::Display for UnknownHelper {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "UnknownHelper: {} is neither a built-in helper nor a registered function", self.name)
        }
    }

    impl Error for UnknownHelper {}

    /// Error when a required function parameter is given neither as an argument nor as a variable.
    #[derive(Debug, Clone)]
    pub struct MissingParameter {
        pub function: String,
        pub parameter: String,
    }

    impl fmt::Display for MissingParameter {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "MissingParameter: parameter {} is required for function {}", self.parameter, self.function)
        }
    }

    impl Error for MissingParameter {}

    /// Error when a function helper gets too few or too many positional arguments.
    #[derive(Debug, Clone)]
    pub struct InvalidParameterCount {
        pub function: String,
        pub min: usize,
        pub max: usize,
        pub actual: usize,
    }

    impl fmt::Display for InvalidParameterCount {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "InvalidParameterCount: function {} takes {} to {} arguments but received {}",
                   self.function, self.min, self.max, self.actual)
        }
    }

    impl Error for InvalidParameterCount {}

    /// Error when a positional argument does not match the parameter type.
    #[derive(Debug, Clone)]
    pub struct InvalidParameterType {
        pub function: String,
        pub parameter: String,
        pub expected: ParameterType,
        pub value: Value,
    }

    impl fmt::Display for InvalidParameterType {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "InvalidParameterType: parameter {} of function {} expects type {:?} but received {}",
                   self.parameter, self.function, self.expected, self.value)
        }
    }

    impl Error for InvalidParameterType {}

    /// Error when a `message` block has no role.
    #[derive(Debug, Clone)]
    pub struct MessageWithoutRole;

    impl fmt::Display for MessageWithoutRole {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "MessageWithoutRole: message blocks require a role, e.g. {{{{#message role=\"user\"}}}}")
        }
    }

    impl Error for MessageWithoutRole {}
}

#[cfg(test)]
mod test_template {
    use super::*;

    #[test]
    fn test_counts() {
        let template = PromptTemplate::new("{{#if a}}{{b}}{{else}}{{c}}{{/if}} {{! not counted }}").unwrap();
        assert_eq!(3, template.expressions_count());
        assert_eq!(0, PromptTemplate::new("plain text").unwrap().expressions_count());
    }

    #[test]
    fn test_input_variables() {
        let template = PromptTemplate::new(
            "{{goal}} {{#each items}}{{name}}{{/each}} {{Math_Add a (json b)}} {{goal}} {{@index}}"
        ).unwrap();
        assert_eq!(vec!["goal", "items", "a", "b"], template.input_variables());
    }

    #[test]
    fn test_input_variables_skip_assigned_and_helpers() {
        let template = PromptTemplate::new(
            "{{Math_Random}} {{set name=\"sum\" value=(Math_Add a b)}}{{sum}} \
            {{#set name=\"story\"}}{{topic}}{{/set}}{{story}} {{json}} {{user_name}} {{later}}{{set \"later\" 1}}"
        ).unwrap();
        assert_eq!(vec!["a", "b", "topic", "user_name", "later"], template.input_variables());
    }

    #[test]
    fn test_parse_error() {
        let error = PromptTemplate::new("{{#if a}}").unwrap_err();
        assert!(error.downcast_ref::<errors::TemplateParseError>().is_some());
    }
}
