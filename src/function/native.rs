use std::fmt;
use std::fmt::Formatter;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error};
use serde_json::Value;

use crate::function::{Function, FunctionResult, FunctionSample, FunctionView, ParameterView, Variables};
use crate::kernel::Kernel;

type Delegate = dyn Fn(Kernel, Variables) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// A function backed by async Rust code.
///
/// The delegate receives a handle to the kernel, so it can call other functions or services, and
/// the variables it is invoked with.
///
/// ```
/// use promptplan::function::native::NativeFunction;
/// use promptplan::function::{Arguments, ParameterType, ParameterView};
///
/// let add = NativeFunction::new(
///     "Add",
///     "Adds two numbers.",
///     vec![
///         ParameterView::new("a", ParameterType::Number).required(),
///         ParameterView::new("b", ParameterType::Number).required(),
///     ],
///     |_kernel, variables| async move {
///         Ok::<_, anyhow::Error>(variables.number_arg("a")? + variables.number_arg("b")?)
///     },
/// );
/// ```
#[derive(Clone)]
pub struct NativeFunction {
    view: FunctionView,
    delegate: Arc<Delegate>,
}

impl NativeFunction {
    pub fn new<F, Fut, V>(name: impl Into<String>,
                          description: impl Into<String>,
                          parameters: Vec<ParameterView>,
                          delegate: F) -> Self
        where F: Fn(Kernel, Variables) -> Fut + Send + Sync + 'static,
              Fut: Future<Output=Result<V>> + Send + 'static,
              V: Into<Value> {
        let delegate = move |kernel: Kernel, variables: Variables| {
            delegate(kernel, variables)
                .map(|result| result.map(Into::<Value>::into))
                .boxed()
        };
        Self {
            view: FunctionView::new(name, description, parameters),
            delegate: Arc::new(delegate),
        }
    }

    pub fn with_output_description(mut self, output_description: impl Into<String>) -> Self {
        self.view.output_description = Some(output_description.into());
        self
    }

    pub fn with_sample(mut self, sample: FunctionSample) -> Self {
        self.view.samples.push(sample);
        self
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Function for NativeFunction {
    fn describe(&self) -> FunctionView {
        self.view.clone()
    }

    async fn invoke(&self, kernel: &Kernel, variables: Variables) -> Result<FunctionResult> {
        debug!("invoking native function {}", self.view.name);
        match (self.delegate)(kernel.clone(), variables).await {
            Ok(value) => Ok(FunctionResult::new(&self.view.name, &self.view.plugin_name, value)),
            Err(e) => {
                error!("native function {} failed: {}", self.view.name, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod test_native {
    use anyhow::anyhow;
    use serde_json::json;

    use crate::function::{Arguments, ParameterType};

    use super::*;

    fn add() -> NativeFunction {
        NativeFunction::new(
            "Add",
            "Adds two numbers.",
            vec![
                ParameterView::new("a", ParameterType::Number).required(),
                ParameterView::new("b", ParameterType::Number).required(),
            ],
            |_kernel, variables| async move {
                Ok::<_, anyhow::Error>(variables.number_arg("a")? + variables.number_arg("b")?)
            },
        ).with_output_description("The sum.")
    }

    #[tokio::test]
    async fn test_invoke() {
        let kernel = Kernel::default();
        let variables = json!({"a": 1, "b": "2"}).as_object().cloned().unwrap();
        let result = add().invoke(&kernel, variables).await.unwrap();
        assert_eq!(json!(3.0), result.value);
        assert_eq!("Add", result.function_name);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let failing = NativeFunction::new("Fail", "Always fails.", vec![], |_kernel, _variables| async move {
            Err::<Value, _>(anyhow!("boom"))
        });
        let error = failing.invoke(&Kernel::default(), Variables::new()).await.unwrap_err();
        assert_eq!("boom", error.to_string());
    }

    #[test]
    fn test_describe() {
        let view = add().describe();
        assert_eq!(2, view.required_parameters().count());
        assert_eq!(Some("The sum.".to_string()), view.output_description);
    }
}
