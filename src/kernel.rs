//! # Kernel
//! The registry everything runs against: model services, plugins of functions and an optional
//! entry point.
//!
//! A kernel is cheap to clone. Native functions receive a clone so they can call other functions
//! and services.

use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;

use anyhow::Result;
use log::debug;

use crate::function::{Function, FunctionResult, FunctionView, Variables};
use crate::kernel::errors::{FunctionNotFound, NoEntryPoint, NoServiceAvailable};
use crate::plugin::Plugin;
use crate::services::AIService;

#[derive(Clone, Default)]
pub struct Kernel {
    services: Vec<Arc<dyn AIService>>,
    plugins: Vec<Plugin>,
    entry_point: Option<Arc<dyn Function>>,
}

impl Kernel {
    /// The first service is the default one.
    pub fn new(services: Vec<Arc<dyn AIService>>, plugins: Vec<Plugin>) -> Self {
        Self {
            services,
            plugins,
            entry_point: None,
        }
    }

    pub fn with_entry_point(mut self, function: impl Function + 'static) -> Self {
        self.entry_point = Some(Arc::new(function));
        self
    }

    pub fn add_service(&mut self, service: Arc<dyn AIService>) -> &mut Self {
        self.services.push(service);
        self
    }

    /// Adds a plugin, replacing a plugin of the same name.
    pub fn add_plugin(&mut self, plugin: Plugin) -> &mut Self {
        self.plugins.retain(|p| p.name != plugin.name);
        self.plugins.push(plugin);
        self
    }

    /// Adds a function to a plugin, creating the plugin if needed.
    pub fn add_function(&mut self, plugin_name: &str, function: impl Function + 'static) -> &mut Self {
        let function: Arc<dyn Function> = Arc::new(function);
        match self.plugins.iter_mut().find(|p| p.name == plugin_name) {
            Some(plugin) => {
                plugin.push_function(function);
            }
            None => {
                let mut plugin = Plugin::new(plugin_name);
                plugin.push_function(function);
                self.plugins.push(plugin);
            }
        }
        self
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn plugin(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// Views of every registered function, with plugin names.
    pub fn function_views(&self) -> Vec<FunctionView> {
        self.plugins.iter().flat_map(Plugin::function_views).collect()
    }

    pub fn function(&self, plugin_name: &str, function_name: &str) -> Option<&Arc<dyn Function>> {
        self.plugin(plugin_name).and_then(|p| p.function(function_name))
    }

    /// Finds the function a template helper `Plugin_Function` refers to.
    pub fn function_by_helper_name(&self, helper_name: &str) -> Option<(&Plugin, &Arc<dyn Function>)> {
        self.plugins
            .iter()
            .filter(|p| helper_name.starts_with(p.name.as_str()))
            .find_map(|plugin| {
                plugin.functions()
                    .iter()
                    .find(|f| f.describe().in_plugin(&plugin.name).helper_name() == helper_name)
                    .map(|f| (plugin, f))
            })
    }

    pub fn services(&self) -> &[Arc<dyn AIService>] {
        &self.services
    }

    pub fn default_service(&self) -> Result<&Arc<dyn AIService>> {
        self.services.first().ok_or_else(|| NoServiceAvailable.into())
    }

    pub async fn run(&self, function: &dyn Function, variables: Variables) -> Result<FunctionResult> {
        debug!("running function {}", function.describe().name);
        function.invoke(self, variables).await
    }

    /// Runs a function and labels the result with the plugin it was found in.
    pub async fn run_in_plugin(&self, plugin_name: &str, function: &dyn Function, variables: Variables) -> Result<FunctionResult> {
        let mut result = self.run(function, variables).await?;
        if result.plugin_name.is_empty() {
            result.plugin_name = plugin_name.to_string();
        }
        Ok(result)
    }

    /// Runs a function by its fully qualified name `Plugin.Function`.
    pub async fn run_by_name(&self, name: &str, variables: Variables) -> Result<FunctionResult> {
        let (plugin_name, function_name) = name.split_once('.')
            .ok_or_else(|| FunctionNotFound { name: name.to_string() })?;
        let function = self.function(plugin_name, function_name)
            .ok_or_else(|| FunctionNotFound { name: name.to_string() })?;
        self.run_in_plugin(plugin_name, function.as_ref(), variables).await
    }

    pub async fn run_entry_point(&self, variables: Variables) -> Result<FunctionResult> {
        let entry_point = self.entry_point.as_ref().ok_or(NoEntryPoint)?;
        self.run(entry_point.as_ref(), variables).await
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("services", &self.services.iter().map(|s| s.model_id().to_string()).collect::<Vec<_>>())
            .field("plugins", &self.plugins)
            .field("entry_point", &self.entry_point.as_ref().map(|e| e.describe().name))
            .finish()
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when a function needs a model but the kernel has no service.
    #[derive(Debug, Clone)]
    pub struct NoServiceAvailable;

    impl fmt::Display for NoServiceAvailable {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "NoServiceAvailable: the kernel has no AI service")
        }
    }

    impl Error for NoServiceAvailable {}

    #[derive(Debug, Clone)]
    pub struct FunctionNotFound {
        pub name: String,
    }

    impl fmt::Display for FunctionNotFound {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "FunctionNotFound: no function named {}, expected Plugin.Function", self.name)
        }
    }

    impl Error for FunctionNotFound {}

    #[derive(Debug, Clone)]
    pub struct NoEntryPoint;

    impl fmt::Display for NoEntryPoint {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "NoEntryPoint: the kernel has no entry point")
        }
    }

    impl Error for NoEntryPoint {}
}

#[cfg(test)]
mod test_kernel {
    use serde_json::{json, Value};

    use crate::function::native::NativeFunction;
    use crate::function::{Arguments, ParameterType, ParameterView};

    use super::*;

    fn echo() -> NativeFunction {
        NativeFunction::new(
            "Echo",
            "Returns its input.",
            vec![ParameterView::new("input", ParameterType::String).required()],
            |_kernel, variables| async move { variables.string_arg("input") },
        )
    }

    /// Calls `Text.Echo` through the kernel handle it receives.
    fn relay() -> NativeFunction {
        NativeFunction::new("Relay", "Calls Echo.", vec![], |kernel, variables| async move {
            let result = kernel.run_by_name("Text.Echo", variables).await?;
            Ok::<_, anyhow::Error>(result.value)
        })
    }

    fn input(text: &str) -> Variables {
        json!({"input": text}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_run_by_name() {
        let mut kernel = Kernel::default();
        kernel.add_function("Text", echo()).add_function("Text", relay());
        let result = kernel.run_by_name("Text.Relay", input("ping")).await.unwrap();
        assert_eq!(json!("ping"), result.value);
        assert_eq!("Text", result.plugin_name);
        assert_eq!("Relay", result.function_name);

        let error = kernel.run_by_name("Text.Missing", input("ping")).await.unwrap_err();
        assert!(error.downcast_ref::<FunctionNotFound>().is_some());
        assert!(kernel.run_by_name("NoDot", input("ping")).await.is_err());
    }

    #[tokio::test]
    async fn test_entry_point() {
        let error = Kernel::default().run_entry_point(input("x")).await.unwrap_err();
        assert!(error.downcast_ref::<NoEntryPoint>().is_some());

        let kernel = Kernel::default().with_entry_point(echo());
        let result = kernel.run_entry_point(input("x")).await.unwrap();
        assert_eq!(Value::from("x"), result.value);
    }

    #[test]
    fn test_lookup() {
        let mut kernel = Kernel::default();
        kernel.add_function("My_Text", echo());
        assert_eq!(vec!["My_Text.Echo"], kernel.function_views().iter().map(FunctionView::fully_qualified_name).collect::<Vec<_>>());
        let (plugin, function) = kernel.function_by_helper_name("My_Text_Echo").unwrap();
        assert_eq!("My_Text", plugin.name);
        assert_eq!("Echo", function.describe().name);
        assert!(kernel.function_by_helper_name("My_Text_Nope").is_none());
        assert!(kernel.default_service().err().unwrap().downcast_ref::<NoServiceAvailable>().is_some());
    }
}
