use std::fmt;
use std::fmt::Formatter;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use crate::function::{Function, FunctionResult, FunctionView, Variables};
use crate::kernel::Kernel;
use crate::template::PromptTemplate;

pub const PLAN_FUNCTION_NAME: &str = "Plan";
pub const PLAN_PLUGIN_NAME: &str = "Planner";

/// A template generated by the planner.
///
/// The template is kept as text and only parsed when the plan runs, so a malformed plan fails
/// like any other plan error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[readonly::make]
pub struct HandlebarsPlan {
    /// The template of the plan, readonly
    #[readonly]
    pub template: String,
}

impl HandlebarsPlan {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn parse(&self) -> Result<PromptTemplate> {
        PromptTemplate::new(self.template.as_str())
    }

    /// Renders the plan. The output, trimmed, is the result of the plan.
    pub async fn invoke(&self, kernel: &Kernel, mut variables: Variables) -> Result<FunctionResult> {
        debug!("invoking plan:\n{}", self.template);
        let template = self.parse()?;
        let output = template.render(kernel, &mut variables).await?;
        Ok(FunctionResult::new(PLAN_FUNCTION_NAME, PLAN_PLUGIN_NAME, output.trim()))
    }
}

impl fmt::Display for HandlebarsPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// A plan can be registered as a function, e.g. as the entry point of a kernel.
#[async_trait]
impl Function for HandlebarsPlan {
    fn describe(&self) -> FunctionView {
        FunctionView::new(PLAN_FUNCTION_NAME, "Runs a generated plan.", vec![]).in_plugin(PLAN_PLUGIN_NAME)
    }

    async fn invoke(&self, kernel: &Kernel, variables: Variables) -> Result<FunctionResult> {
        HandlebarsPlan::invoke(self, kernel, variables).await
    }
}

#[cfg(test)]
mod test_plan {
    use serde_json::json;

    use crate::template::errors::TemplateParseError;

    use super::*;

    #[tokio::test]
    async fn test_invoke() {
        let plan = HandlebarsPlan::new("\n{{set name=\"x\" value=2}}\n{{#if (equals x 2)}}two{{/if}}\n");
        let result = plan.invoke(&Kernel::default(), Variables::new()).await.unwrap();
        assert_eq!(json!("two"), result.value);
        assert_eq!(("Plan", "Planner"), (result.function_name.as_str(), result.plugin_name.as_str()));
        assert_eq!(plan.template, plan.to_string());
    }

    #[tokio::test]
    async fn test_parse_error_surfaces_on_invoke() {
        let plan = HandlebarsPlan::new("{{#each items}}never closed");
        let error = plan.invoke(&Kernel::default(), Variables::new()).await.unwrap_err();
        assert!(error.downcast_ref::<TemplateParseError>().is_some());
    }

    #[tokio::test]
    async fn test_as_entry_point() {
        let kernel = Kernel::default().with_entry_point(HandlebarsPlan::new("{{concat \"a\" \"b\"}}"));
        let result = kernel.run_entry_point(Variables::new()).await.unwrap();
        assert_eq!(json!("ab"), result.value);
    }
}
