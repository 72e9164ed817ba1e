//! # Planner
//! Asks a model to write a template, a plan, that reaches a goal with the functions of a kernel.
//!
//! ```no_run
//! # async fn solve(kernel: promptplan::kernel::Kernel) -> anyhow::Result<()> {
//! use promptplan::function::Variables;
//! use promptplan::planner::{HandlebarsPlanner, PlannerConfig};
//!
//! let config = PlannerConfig {
//!     included_plugins: vec!["Math".to_string()],
//!     ..Default::default()
//! };
//! let planner = HandlebarsPlanner::new(config)?;
//! let result = planner.create_and_invoke(&kernel, "What is 3 times 4, plus 2?", Variables::new()).await?;
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```
//!
//! [HandlebarsPlanner::create_and_invoke] retries a failed plan: the next planning attempt sees the
//! failed plan and its error.

pub mod plan;
pub mod prompt;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::function::semantic::{ExecutionSettings, SemanticFunction};
use crate::function::{FunctionResult, FunctionView, Variables};
use crate::kernel::Kernel;
use crate::planner::plan::HandlebarsPlan;
use crate::planner::prompt::PLANNER_PROMPT;
use crate::template::PromptTemplate;
use crate::utils::postprocess::code::{extract_handlebars_block, sanitize_plan};

fn default_max_retries() -> usize {
    1
}

/// Which functions the planner may use, and what it learned from a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub included_plugins: Vec<String>,
    #[serde(default)]
    pub excluded_plugins: Vec<String>,
    /// Fully qualified, `Plugin.Function`
    #[serde(default)]
    pub included_functions: Vec<String>,
    /// Fully qualified, `Plugin.Function`
    #[serde(default)]
    pub excluded_functions: Vec<String>,
    #[serde(default)]
    pub last_plan: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Extra attempts after the first failed plan.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Picks the model writing the plans. The kernel's default service when unset.
    #[serde(default)]
    pub execution_settings: Option<ExecutionSettings>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            included_plugins: Vec::new(),
            excluded_plugins: Vec::new(),
            included_functions: Vec::new(),
            excluded_functions: Vec::new(),
            last_plan: None,
            last_error: None,
            max_retries: default_max_retries(),
            execution_settings: None,
        }
    }
}

impl PlannerConfig {
    /// Everything is included when both include lists are empty. Exclusion wins over inclusion.
    pub fn should_include(&self, view: &FunctionView) -> bool {
        let fully_qualified_name = view.fully_qualified_name();
        let mut include = self.included_plugins.is_empty() && self.included_functions.is_empty();
        if self.included_plugins.contains(&view.plugin_name) || self.included_functions.contains(&fully_qualified_name) {
            include = true;
        }
        if self.excluded_plugins.contains(&view.plugin_name) || self.excluded_functions.contains(&fully_qualified_name) {
            include = false;
        }
        include
    }
}

/// A function as the planner prompt lists it.
fn describe_for_prompt(view: &FunctionView) -> Result<Value> {
    let mut signature = format!("{{{{{}", view.helper_name());
    for parameter in &view.parameters {
        let parameter_type = serde_json::to_value(&parameter.parameter_type)?;
        signature.push_str(&format!(" {}=<{}>", parameter.name, parameter_type.as_str().unwrap_or("any")));
    }
    signature.push_str("}}");
    let mut value = serde_json::to_value(view)?;
    value["helper_name"] = Value::String(view.helper_name());
    value["signature"] = Value::String(signature);
    Ok(value)
}

pub struct HandlebarsPlanner {
    config: PlannerConfig,
    prompt: PromptTemplate,
}

impl HandlebarsPlanner {
    pub fn new(config: PlannerConfig) -> Result<Self> {
        Ok(Self {
            config,
            prompt: PromptTemplate::new(PLANNER_PROMPT)?,
        })
    }

    /// Uses another planner prompt. It is rendered with `functions`, `goal`, `last_plan` and `last_error`.
    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PlannerConfig {
        &mut self.config
    }

    /// Asks the model for a plan reaching `goal`.
    pub async fn create_plan(&self, kernel: &Kernel, goal: &str) -> Result<HandlebarsPlan> {
        self.create_plan_with(kernel, goal, &self.config).await
    }

    async fn create_plan_with(&self, kernel: &Kernel, goal: &str, config: &PlannerConfig) -> Result<HandlebarsPlan> {
        let functions = kernel.function_views()
            .iter()
            .filter(|view| config.should_include(view))
            .map(describe_for_prompt)
            .collect::<Result<Vec<_>>>()?;
        debug!("planning with {} functions for goal: {}", functions.len(), goal);

        let mut variables = Variables::new();
        variables.insert("functions".to_string(), Value::Array(functions));
        variables.insert("goal".to_string(), Value::String(goal.to_string()));
        variables.insert("last_plan".to_string(), config.last_plan.clone().map(Value::String).unwrap_or(Value::Null));
        variables.insert("last_error".to_string(), config.last_error.clone().map(Value::String).unwrap_or(Value::Null));

        let mut planner_function = SemanticFunction::new("CreatePlan", "Writes a plan for a goal.", self.prompt.clone(), vec![]);
        if let Some(settings) = &config.execution_settings {
            planner_function = planner_function.with_execution_settings(settings.clone());
        }
        let reply = kernel.run(&planner_function, variables).await?.to_string();

        let template = match extract_handlebars_block(&reply) {
            Some(block) => block,
            None => {
                warn!("the planner reply has no fenced code block, using the whole reply as the plan");
                reply.trim()
            }
        };
        Ok(HandlebarsPlan::new(sanitize_plan(template)))
    }

    /// Plans and runs the plan, planning again with the failed plan and its error when running
    /// fails, at most `max_retries` times. Planning errors are returned right away. When every
    /// attempt fails the error of the last one is returned.
    pub async fn create_and_invoke(&self, kernel: &Kernel, goal: &str, variables: Variables) -> Result<FunctionResult> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut config = self.config.clone();
        let mut last_error = None;
        for attempt in 1..=attempts {
            debug!("plan attempt {}/{}", attempt, attempts);
            let plan = self.create_plan_with(kernel, goal, &config).await?;
            match plan.invoke(kernel, variables.clone()).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("plan succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!("plan attempt {}/{} failed: {}", attempt, attempts, e);
                    config.last_plan = Some(plan.template.clone());
                    config.last_error = Some(e.to_string());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no plan was attempted")))
    }
}
