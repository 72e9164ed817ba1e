//! # Function
//! Everything a template or a plan can call.
//!
//! A function is described by a [FunctionView]: its name, the plugin it belongs to, a description
//! for the planner and its parameters. Invoking it takes the render [Variables] and gives back a
//! [FunctionResult].
//!
//! Two kinds of functions are provided:
//! * [NativeFunction](native::NativeFunction): ordinary async Rust code.
//! * [SemanticFunction](semantic::SemanticFunction): a prompt template rendered and sent to a model.

pub mod native;
pub mod semantic;

use std::fmt;
use std::fmt::Formatter;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::Kernel;
use crate::utils::JsonMap;
use crate::utils::postprocess::json::filter_to_json;
use crate::function::errors::{InvalidArgument, MissingArgument};

/// Variables a template is rendered with and a function is invoked with.
pub type Variables = JsonMap;

/// Type of a function parameter, as exposed to templates and the planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParameterType {
    /// Checks a template argument against this type and coerces it where that is lossless.
    ///
    /// * numbers accept numbers and strings that parse as numbers
    /// * strings accept strings and scalars, which are stringified
    /// * booleans accept booleans and `"true"`/`"false"`
    /// * `object` and `any` accept everything
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParameterType::Any | ParameterType::Object, v) => Some(v.clone()),
            (ParameterType::Number, Value::Number(_)) => Some(value.clone()),
            (ParameterType::Number, Value::String(s)) => parse_number(s),
            (ParameterType::String, Value::String(_)) => Some(value.clone()),
            (ParameterType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParameterType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParameterType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ParameterType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (ParameterType::Array, Value::Array(_)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The strict check for positional template arguments: the value must already have this type,
    /// except that numbers also accept strings that parse as numbers.
    pub fn accept(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParameterType::Any | ParameterType::Object, v) => Some(v.clone()),
            (ParameterType::Number, Value::Number(_))
            | (ParameterType::String, Value::String(_))
            | (ParameterType::Boolean, Value::Bool(_))
            | (ParameterType::Array, Value::Array(_)) => Some(value.clone()),
            (ParameterType::Number, Value::String(s)) => parse_number(s),
            _ => None,
        }
    }

    /// Maps the type names used in function definitions (`string`, `number`, `boolean`, ...).
    /// Anything unknown is `any`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => ParameterType::String,
            "number" | "integer" | "int" | "float" | "double" => ParameterType::Number,
            "boolean" | "bool" => ParameterType::Boolean,
            "array" | "list" => ParameterType::Array,
            "object" => ParameterType::Object,
            _ => ParameterType::Any,
        }
    }
}

pub(crate) fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// A read-only description of a function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterView {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub parameter_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub is_required: bool,
}

impl ParameterView {
    pub fn new(name: impl Into<String>, parameter_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameter_type,
            default_value: None,
            is_required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default_value: impl Into<Value>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }
}

/// An example call, shown to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSample {
    pub inputs: JsonMap,
    pub output: Value,
}

impl FunctionSample {
    pub fn new(inputs: JsonMap, output: impl Into<Value>) -> Self {
        Self {
            inputs,
            output: output.into(),
        }
    }
}

/// A read-only representation of a function.
///
/// The name and plugin name are used in templates as `{{PluginName_FunctionName}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionView {
    pub name: String,
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<FunctionSample>,
}

impl FunctionView {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Vec<ParameterView>) -> Self {
        Self {
            name: name.into(),
            plugin_name: String::new(),
            description: description.into(),
            parameters,
            output_description: None,
            samples: Vec::new(),
        }
    }

    pub fn in_plugin(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = plugin_name.into();
        self
    }

    /// `Plugin.Function`, the name used by planner configuration.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.plugin_name, self.name)
    }

    /// `Plugin_Function`, the name of the template helper calling this function.
    pub fn helper_name(&self) -> String {
        format!("{}_{}", self.plugin_name, self.name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item=&ParameterView> {
        self.parameters.iter().filter(|p| p.is_required)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterView> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Function result after execution.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    /// Name of executed function.
    pub function_name: String,
    /// Name of the plugin containing the function.
    pub plugin_name: String,
    pub value: Value,
    /// Additional information about the execution, e.g. token usage of a model call.
    pub metadata: JsonMap,
}

impl FunctionResult {
    pub fn new(function_name: impl Into<String>, plugin_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            function_name: function_name.into(),
            plugin_name: plugin_name.into(),
            value: value.into(),
            metadata: JsonMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// The value if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Parses a textual value as JSON, ignoring chatter around the JSON a model may add.
    pub fn to_json(&self) -> Result<Value> {
        match &self.value {
            Value::String(s) => filter_to_json(s.as_str()),
            other => Ok(other.clone()),
        }
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl fmt::Display for FunctionResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&value_to_string(&self.value))
    }
}

/// How a value is written into rendered text: strings verbatim, null as nothing, the rest as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Anything callable from templates and plans.
#[async_trait]
pub trait Function: Send + Sync {
    /// Describes the function. The plugin name is filled in by the [Kernel].
    fn describe(&self) -> FunctionView;

    async fn invoke(&self, kernel: &Kernel, variables: Variables) -> Result<FunctionResult>;
}

/// Typed access to the arguments a function is invoked with.
pub trait Arguments {
    fn string_arg(&self, name: &str) -> Result<String>;
    fn number_arg(&self, name: &str) -> Result<f64>;
    fn bool_arg(&self, name: &str) -> Result<bool>;
    fn optional_string_arg(&self, name: &str) -> Option<String>;
}

impl Arguments for Variables {
    fn string_arg(&self, name: &str) -> Result<String> {
        let value = self.get(name).ok_or_else(|| MissingArgument::new(name))?;
        ParameterType::String
            .coerce(value)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| InvalidArgument::new(name, ParameterType::String, value).into())
    }

    fn number_arg(&self, name: &str) -> Result<f64> {
        let value = self.get(name).ok_or_else(|| MissingArgument::new(name))?;
        ParameterType::Number
            .coerce(value)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| InvalidArgument::new(name, ParameterType::Number, value).into())
    }

    fn bool_arg(&self, name: &str) -> Result<bool> {
        let value = self.get(name).ok_or_else(|| MissingArgument::new(name))?;
        ParameterType::Boolean
            .coerce(value)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| InvalidArgument::new(name, ParameterType::Boolean, value).into())
    }

    fn optional_string_arg(&self, name: &str) -> Option<String> {
        match self.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => ParameterType::String
                .coerce(value)
                .and_then(|v| v.as_str().map(str::to_string)),
        }
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    use serde_json::Value;

    use crate::function::ParameterType;

    /// Error when a function reads an argument it was not given.
    #[derive(Debug, Clone)]
    pub struct MissingArgument {
        pub name: String,
    }

    impl MissingArgument {
        pub(crate) fn new(name: impl Into<String>) -> Self {
            Self { name: name.into() }
        }
    }

    impl fmt::Display for MissingArgument {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "MissingArgument: argument {} was not provided", self.name)
        }
    }

    impl Error for MissingArgument {}

    /// Error when an argument cannot be read as the type a function expects.
    #[derive(Debug, Clone)]
    pub struct InvalidArgument {
        pub name: String,
        pub expected: ParameterType,
        pub value: Value,
    }

    impl InvalidArgument {
        pub(crate) fn new(name: impl Into<String>, expected: ParameterType, value: &Value) -> Self {
            Self {
                name: name.into(),
                expected,
                value: value.clone(),
            }
        }
    }

    impl fmt::Display for InvalidArgument {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "InvalidArgument: argument {} expects type {:?} but received {}",
                   self.name, self.expected, self.value)
        }
    }

    impl Error for InvalidArgument {}
}
