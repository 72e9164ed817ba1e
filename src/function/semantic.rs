use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ModelRequest;
use crate::function::{Function, FunctionResult, FunctionView, ParameterType, ParameterView, Variables};
use crate::kernel::Kernel;
use crate::services::AIService;
use crate::template::PromptTemplate;
use crate::utils::JsonMap;

/// How a model should be picked and called. Settings other than the selectors are kept in `extra`
/// and read through the typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// A regex matched against service model ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id_pattern: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl ExecutionSettings {
    pub fn for_model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Default::default()
        }
    }

    pub fn for_model_pattern(pattern: impl Into<String>) -> Self {
        Self {
            model_id_pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn temperature(&self) -> Option<f32> {
        self.extra.get("temperature").and_then(Value::as_f64).map(|t| t as f32)
    }

    pub fn top_p(&self) -> Option<f32> {
        self.extra.get("top_p").and_then(Value::as_f64).map(|t| t as f32)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.extra.get("max_tokens")
            .and_then(Value::as_u64)
            .map(|t| u32::try_from(t).unwrap_or(u32::MAX))
    }

    fn matches(&self, service: &dyn AIService) -> Result<bool> {
        if self.service_id.as_deref().is_some_and(|id| id == service.service_id()) {
            return Ok(true);
        }
        if self.model_id.as_deref().is_some_and(|id| id == service.model_id()) {
            return Ok(true);
        }
        match &self.model_id_pattern {
            Some(pattern) => Ok(Regex::new(pattern)?.is_match(service.model_id())),
            None => Ok(false),
        }
    }
}

/// Serializable description of a semantic function, e.g. loaded from a JSON file.
///
/// ```json
/// {
///   "name": "Summarize",
///   "description": "Summarizes a text.",
///   "template": "{{#message role=\"user\"}}Summarize: {{input}}{{/message}}",
///   "input_parameters": [{"name": "input", "type": "string", "is_required": true}],
///   "execution_settings": [{"model_id_pattern": "^gpt-4", "temperature": 0.2}]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticFunctionModel {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub input_parameters: Vec<ParameterView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_description: Option<String>,
    #[serde(default)]
    pub execution_settings: Vec<ExecutionSettings>,
}

/// A prompt template sent to a model.
#[derive(Debug, Clone)]
pub struct SemanticFunction {
    view: FunctionView,
    template: PromptTemplate,
    execution_settings: Vec<ExecutionSettings>,
}

impl SemanticFunction {
    /// Parameters are inferred from the variables the template reads when none are given.
    pub fn new(name: impl Into<String>,
               description: impl Into<String>,
               template: PromptTemplate,
               parameters: Vec<ParameterView>) -> Self {
        let parameters = if parameters.is_empty() {
            template.input_variables()
                .into_iter()
                .map(|name| ParameterView::new(name, ParameterType::Any))
                .collect()
        } else {
            parameters
        };
        Self {
            view: FunctionView::new(name, description, parameters),
            template,
            execution_settings: Vec::new(),
        }
    }

    pub fn from_model(model: SemanticFunctionModel) -> Result<Self> {
        let template = PromptTemplate::new(model.template)?;
        let mut function = Self::new(model.name, model.description, template, model.input_parameters);
        function.view.output_description = model.output_description;
        function.execution_settings = model.execution_settings;
        Ok(function)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_model(serde_json::from_str(json)?)
    }

    pub fn with_execution_settings(mut self, settings: ExecutionSettings) -> Self {
        self.execution_settings.push(settings);
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// The first service matching a setting, settings and services taken in order. Falls back to
    /// the default service.
    pub fn select_service(&self, kernel: &Kernel) -> Result<(Arc<dyn AIService>, Option<&ExecutionSettings>)> {
        for settings in &self.execution_settings {
            for service in kernel.services() {
                if settings.matches(service.as_ref())? {
                    return Ok((Arc::clone(service), Some(settings)));
                }
            }
        }
        let service = kernel.default_service()?;
        if !self.execution_settings.is_empty() {
            warn!("no service matches the execution settings of {}, falling back to {}",
                  self.view.name, service.model_id());
        }
        Ok((Arc::clone(service), self.execution_settings.first()))
    }

    async fn prepare(&self, kernel: &Kernel, mut variables: Variables) -> Result<ModelRequest> {
        let rendered = self.template.render(kernel, &mut variables).await?;
        ModelRequest::from_rendered_prompt(&rendered)
    }

    /// Like [Function::invoke] but yields the reply as it is generated.
    pub async fn invoke_streaming(&self, kernel: &Kernel, variables: Variables) -> Result<BoxStream<'static, Result<String>>> {
        let (service, settings) = self.select_service(kernel)?;
        let request = self.prepare(kernel, variables).await?;
        service.complete_streaming(&request, settings).await
    }
}

#[async_trait]
impl Function for SemanticFunction {
    fn describe(&self) -> FunctionView {
        self.view.clone()
    }

    async fn invoke(&self, kernel: &Kernel, variables: Variables) -> Result<FunctionResult> {
        let (service, settings) = self.select_service(kernel)?;
        debug!("invoking semantic function {} with {}", self.view.name, service.model_id());
        let request = self.prepare(kernel, variables).await?;
        let result = service.complete(&request, settings).await?;
        Ok(FunctionResult::new(&self.view.name, &self.view.plugin_name, result.value)
            .with_metadata(result.metadata))
    }
}
