//! # Plugin
//! A named group of functions. Templates call a function of a plugin as `{{Plugin_Function}}`.

use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;

use crate::function::{Function, FunctionView};

#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub description: String,
    functions: Vec<Arc<dyn Function>>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            functions: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a function. A function with the same name replaces the existing one.
    pub fn add_function(mut self, function: impl Function + 'static) -> Self {
        self.push_function(Arc::new(function));
        self
    }

    pub fn push_function(&mut self, function: Arc<dyn Function>) -> &mut Self {
        let name = function.describe().name;
        self.functions.retain(|f| f.describe().name != name);
        self.functions.push(function);
        self
    }

    pub fn function(&self, name: &str) -> Option<&Arc<dyn Function>> {
        self.functions.iter().find(|f| f.describe().name == name)
    }

    pub fn functions(&self) -> &[Arc<dyn Function>] {
        &self.functions
    }

    /// Views of all functions, with the plugin name filled in.
    pub fn function_views(&self) -> Vec<FunctionView> {
        self.functions
            .iter()
            .map(|f| f.describe().in_plugin(&self.name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("functions", &self.function_views().iter().map(|v| v.name.clone()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test_plugin {
    use serde_json::Value;

    use crate::function::native::NativeFunction;

    use super::*;

    fn constant(name: &str, value: &'static str) -> NativeFunction {
        NativeFunction::new(name, "", vec![], move |_kernel, _variables| async move {
            Ok::<_, anyhow::Error>(Value::from(value))
        })
    }

    #[test]
    fn test_add_and_lookup() {
        let plugin = Plugin::new("Text")
            .with_description("Text utilities.")
            .add_function(constant("Hello", "hello"))
            .add_function(constant("Bye", "bye"));
        assert_eq!(2, plugin.len());
        assert!(plugin.function("Hello").is_some());
        assert!(plugin.function("Missing").is_none());
        let views = plugin.function_views();
        assert_eq!("Text_Bye", views[1].helper_name());
    }

    #[test]
    fn test_same_name_replaces() {
        let plugin = Plugin::new("Text")
            .add_function(constant("Hello", "hello"))
            .add_function(constant("Hello", "hi"));
        assert_eq!(1, plugin.len());
    }
}
