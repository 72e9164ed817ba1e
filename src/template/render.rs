use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::function::{value_to_string, Function, Variables};
use crate::kernel::Kernel;
use crate::template::ast::{Block, Call, Expression, Node, Path};
use crate::template::errors::{MessageWithoutRole, RenderError, UnknownHelper};
use crate::template::helpers::{bind_arguments, call_pure_helper, is_builtin, is_condition_helper, is_truthy};
use crate::utils::JsonMap;

/// Context pushed by `each` and `with`.
struct Frame {
    this: Value,
    data: JsonMap,
}

/// Walks a node tree. The root context is the variable map itself, so `set` is visible to
/// everything rendered after it.
pub(crate) struct Renderer<'a> {
    kernel: &'a Kernel,
    variables: &'a mut Variables,
    frames: Vec<Frame>,
}

fn descend<'v>(value: &'v Value, segments: &[String]) -> Option<&'v Value> {
    segments.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(kernel: &'a Kernel, variables: &'a mut Variables) -> Self {
        Self {
            kernel,
            variables,
            frames: Vec::new(),
        }
    }

    /// Resolves `segments` in context `depth`, where 0 is the variables and `n` is the `n`th frame.
    fn resolve_in(&self, depth: usize, segments: &[String]) -> Option<Value> {
        if depth == 0 {
            match segments.split_first() {
                None => Some(Value::Object(self.variables.clone())),
                Some((first, rest)) => self.variables.get(first).and_then(|v| descend(v, rest)).cloned(),
            }
        } else {
            descend(&self.frames[depth - 1].this, segments).cloned()
        }
    }

    fn lookup(&self, path: &Path) -> Value {
        let depth = self.frames.len().saturating_sub(path.parents);
        if path.data {
            return match path.segments.split_first() {
                Some((first, rest)) if first == "root" => self.resolve_in(0, rest),
                Some((first, rest)) if depth > 0 => self.frames[depth - 1]
                    .data
                    .get(first)
                    .and_then(|v| descend(v, rest))
                    .cloned(),
                _ => None,
            }.unwrap_or(Value::Null);
        }
        if path.this || path.parents > 0 {
            return self.resolve_in(depth, &path.segments).unwrap_or(Value::Null);
        }
        // plain names fall through to enclosing contexts
        (0..=depth).rev()
            .find_map(|d| self.resolve_in(d, &path.segments))
            .unwrap_or(Value::Null)
    }

    pub(crate) fn render_nodes<'s>(&'s mut self, nodes: &'s [Node]) -> BoxFuture<'s, Result<String>> {
        async move {
            let mut out = String::new();
            for node in nodes {
                match node {
                    Node::Text(text) | Node::Raw(text) => out.push_str(text),
                    Node::Comment(_) => {}
                    Node::Expression(expression) => {
                        let rendered = self.render_expression(expression).await?;
                        out.push_str(&rendered);
                    }
                    Node::Block(block) => {
                        let rendered = self.render_block(block).await?;
                        out.push_str(&rendered);
                    }
                }
            }
            Ok(out)
        }.boxed()
    }

    async fn render_expression(&mut self, expression: &Expression) -> Result<String> {
        match expression {
            Expression::Path(path) => {
                if let Some(name) = path.simple_name() {
                    if self.kernel.function_by_helper_name(name).is_some() || is_builtin(name) {
                        let value = self.call_helper(&Call::new(name)).await?;
                        return Ok(value_to_string(&value));
                    }
                }
                Ok(value_to_string(&self.lookup(path)))
            }
            Expression::Call(call) if is_condition_helper(&call.name) => {
                let value = self.call_helper(call).await?;
                Ok(if is_truthy(&value) { "True".to_string() } else { String::new() })
            }
            other => {
                let value = self.eval(other).await?;
                Ok(value_to_string(&value))
            }
        }
    }

    fn eval<'s>(&'s mut self, expression: &'s Expression) -> BoxFuture<'s, Result<Value>> {
        async move {
            match expression {
                Expression::Literal(value) => Ok(value.clone()),
                Expression::Path(path) => Ok(self.lookup(path)),
                Expression::Call(call) => self.call_helper(call).await,
            }
        }.boxed()
    }

    async fn eval_arguments(&mut self, call: &Call) -> Result<(Vec<Value>, JsonMap)> {
        let mut params = Vec::with_capacity(call.params.len());
        for param in &call.params {
            params.push(self.eval(param).await?);
        }
        let mut hash = JsonMap::new();
        for (key, value) in &call.hash {
            let value = self.eval(value).await?;
            hash.insert(key.clone(), value);
        }
        Ok((params, hash))
    }

    fn call_helper<'s>(&'s mut self, call: &'s Call) -> BoxFuture<'s, Result<Value>> {
        async move {
            let (params, hash) = self.eval_arguments(call).await?;
            if let Some(result) = call_pure_helper(&call.name, &params, &hash) {
                return result;
            }
            match call.name.as_str() {
                "set" => {
                    let name = hash.get("name").or(params.first())
                        .map(value_to_string)
                        .filter(|name| !name.is_empty())
                        .ok_or_else(|| RenderError::new("set", "requires a variable name"))?;
                    let value = hash.get("value").or(params.get(1)).cloned().unwrap_or(Value::Null);
                    self.variables.insert(name, value);
                    Ok(Value::Null)
                }
                "get" => {
                    let name = params.first().or(hash.get("name"))
                        .map(value_to_string)
                        .ok_or_else(|| RenderError::new("get", "requires a variable name"))?;
                    Ok(self.lookup(&Path::parse(&name)))
                }
                name => {
                    let (plugin, function) = self.kernel
                        .function_by_helper_name(name)
                        .map(|(plugin, function)| (plugin.name.clone(), Arc::clone(function)))
                        .ok_or_else(|| UnknownHelper { name: name.to_string() })?;
                    self.invoke_function(&plugin, function.as_ref(), params, hash).await
                }
            }
        }.boxed()
    }

    async fn invoke_function(&mut self,
                             plugin: &str,
                             function: &dyn Function,
                             params: Vec<Value>,
                             hash: JsonMap) -> Result<Value> {
        let mut view = function.describe();
        view.plugin_name = plugin.to_string();
        let bound = bind_arguments(&view, params, hash, self.variables)?;
        let mut arguments = self.variables.clone();
        arguments.extend(bound);
        let result = self.kernel.run_in_plugin(plugin, function, arguments).await?;
        Ok(result.value)
    }

    fn render_block<'s>(&'s mut self, block: &'s Block) -> BoxFuture<'s, Result<String>> {
        async move {
            let name = block.call.name.as_str();
            match name {
                "if" | "unless" => {
                    let condition = self.first_param(block).await?;
                    if is_truthy(&condition) == (name == "if") {
                        self.render_nodes(&block.body).await
                    } else {
                        self.render_nodes(&block.inverse).await
                    }
                }
                "each" => {
                    let items: Vec<(Option<String>, Value)> = match self.first_param(block).await? {
                        Value::Array(items) => items.into_iter().map(|v| (None, v)).collect(),
                        Value::Object(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
                        _ => Vec::new(),
                    };
                    if items.is_empty() {
                        return self.render_nodes(&block.inverse).await;
                    }
                    let last = items.len() - 1;
                    let mut out = String::new();
                    for (index, (key, item)) in items.into_iter().enumerate() {
                        let mut data = JsonMap::new();
                        data.insert("index".to_string(), Value::from(index));
                        data.insert("first".to_string(), Value::Bool(index == 0));
                        data.insert("last".to_string(), Value::Bool(index == last));
                        if let Some(key) = key {
                            data.insert("key".to_string(), Value::String(key));
                        }
                        self.frames.push(Frame { this: item, data });
                        let rendered = self.render_nodes(&block.body).await;
                        self.frames.pop();
                        out.push_str(&rendered?);
                    }
                    Ok(out)
                }
                "with" => {
                    let context = self.first_param(block).await?;
                    if !is_truthy(&context) {
                        return self.render_nodes(&block.inverse).await;
                    }
                    self.frames.push(Frame { this: context, data: JsonMap::new() });
                    let rendered = self.render_nodes(&block.body).await;
                    self.frames.pop();
                    rendered
                }
                "message" => {
                    let (_, hash) = self.eval_arguments(&block.call).await?;
                    let role = hash.get("role")
                        .map(value_to_string)
                        .filter(|role| !role.trim().is_empty())
                        .ok_or(MessageWithoutRole)?;
                    let content = self.render_nodes(&block.body).await?;
                    Ok(format!("<message role=\"{}\">{}</message>", role.trim(), content))
                }
                "set" => {
                    let (params, hash) = self.eval_arguments(&block.call).await?;
                    let variable = hash.get("name").or(params.first())
                        .map(value_to_string)
                        .filter(|name| !name.is_empty())
                        .ok_or_else(|| RenderError::new("set", "requires a variable name"))?;
                    let content = self.render_nodes(&block.body).await?;
                    self.variables.insert(variable, Value::String(content));
                    Ok(String::new())
                }
                "raw" => Ok(block.body.iter().map(|node| match node {
                    Node::Text(text) | Node::Raw(text) => text.clone(),
                    _ => String::new(),
                }).collect()),
                _ => Err(UnknownHelper { name: name.to_string() }.into()),
            }
        }.boxed()
    }

    async fn first_param(&mut self, block: &Block) -> Result<Value> {
        match block.call.params.first() {
            Some(param) => self.eval(param).await,
            None => Err(RenderError::new(&block.call.name, "requires an argument").into()),
        }
    }
}

#[cfg(test)]
mod test_render {
    use anyhow::anyhow;
    use serde_json::json;

    use crate::function::native::NativeFunction;
    use crate::function::{Arguments, ParameterType, ParameterView};
    use crate::plugin::Plugin;
    use crate::template::errors::{InvalidParameterCount, InvalidParameterType, MissingParameter};
    use crate::template::PromptTemplate;

    use super::*;

    fn math_kernel() -> Kernel {
        let add = NativeFunction::new(
            "Add",
            "Adds two numbers.",
            vec![
                ParameterView::new("a", ParameterType::Number).required(),
                ParameterView::new("b", ParameterType::Number).required(),
            ],
            |_kernel, variables| async move {
                let sum = variables.number_arg("a")? + variables.number_arg("b")?;
                Ok::<_, anyhow::Error>(json!(sum as i64))
            },
        );
        let shout = NativeFunction::new(
            "Shout",
            "Upper-cases the input.",
            vec![ParameterView::new("input", ParameterType::String).required()],
            |_kernel, variables| async move {
                Ok::<_, anyhow::Error>(variables.string_arg("input")?.to_uppercase())
            },
        );
        let fail = NativeFunction::new("Fail", "Always fails.", vec![], |_kernel, _variables| async move {
            Err::<Value, _>(anyhow!("failed on purpose"))
        });
        let plugin = Plugin::new("Math")
            .add_function(add)
            .add_function(shout)
            .add_function(fail);
        Kernel::new(vec![], vec![plugin])
    }

    async fn render(source: &str, variables: Value) -> Result<String> {
        let mut variables = variables.as_object().cloned().unwrap_or_default();
        PromptTemplate::new(source)?.render(&math_kernel(), &mut variables).await
    }

    #[tokio::test]
    async fn test_variables_and_paths() {
        let variables = json!({"user": {"name": "Ada", "tags": ["a", "b"]}, "n": 3});
        let rendered = render("{{user.name}} {{user.tags.1}} {{n}} [{{missing}}]", variables).await.unwrap();
        assert_eq!("Ada b 3 []", rendered);
    }

    #[tokio::test]
    async fn test_each_with_data() {
        let variables = json!({"items": ["x", "y", "z"], "sep": ","});
        let rendered = render(
            "{{#each items}}{{@index}}:{{this}}{{#unless @last}}{{../sep}}{{/unless}}{{/each}}",
            variables,
        ).await.unwrap();
        assert_eq!("0:x,1:y,2:z", rendered);

        let rendered = render("{{#each obj}}{{@key}}={{this}};{{/each}}", json!({"obj": {"a": 1, "b": 2}})).await.unwrap();
        assert_eq!("a=1;b=2;", rendered);

        let rendered = render("{{#each empty}}x{{else}}none{{/each}}", json!({"empty": []})).await.unwrap();
        assert_eq!("none", rendered);
    }

    #[tokio::test]
    async fn test_each_first_and_this_fields() {
        let variables = json!({"people": [{"name": "Ada"}, {"name": "Alan"}]});
        let rendered = render("{{#each people}}{{#if @first}}first {{/if}}{{this.name}};{{/each}}", variables).await.unwrap();
        assert_eq!("first Ada;Alan;", rendered);
    }

    #[tokio::test]
    async fn test_nested_each_reads_outer_data() {
        let variables = json!({"rows": ["a", "b"], "cols": ["x", "y"]});
        let rendered = render("{{#each rows}}{{#each cols}}{{@../index}}-{{@index}};{{/each}}{{/each}}", variables)
            .await.unwrap();
        assert_eq!("0-0;0-1;1-0;1-1;", rendered);
    }

    #[tokio::test]
    async fn test_set_in_each_is_visible_afterwards() {
        let kernel = math_kernel();
        let template = PromptTemplate::new(
            "{{set name=\"total\" value=0}}{{#each items}}{{set name=\"total\" value=(Math_Add total this)}}{{/each}}{{total}}"
        ).unwrap();
        let mut variables = json!({"items": [1, 2, 3]}).as_object().cloned().unwrap();
        let rendered = template.render(&kernel, &mut variables).await.unwrap();
        assert_eq!("6", rendered);
        assert_eq!(json!(6), variables["total"]);
    }

    #[tokio::test]
    async fn test_get_missing_and_triple_stash() {
        assert_eq!("[]", render("[{{get \"missing\"}}]", json!({})).await.unwrap());
        let variables = json!({"html": "<b>&</b>"});
        assert_eq!("<b>&</b>|<b>&</b>", render("{{{html}}}|{{html}}", variables).await.unwrap());
    }

    #[tokio::test]
    async fn test_each_falls_back_to_outer_variables() {
        let variables = json!({"people": [{"name": "Ada"}, {"name": "Alan"}], "greeting": "Hi"});
        let rendered = render("{{#each people}}{{greeting}} {{name}}. {{/each}}", variables).await.unwrap();
        assert_eq!("Hi Ada. Hi Alan. ", rendered);
    }

    #[tokio::test]
    async fn test_conditions() {
        let source = "{{#if (greaterThan n 10)}}big{{else if (eq n 5)}}five{{else}}small{{/if}}";
        assert_eq!("big", render(source, json!({"n": 11})).await.unwrap());
        assert_eq!("five", render(source, json!({"n": "5"})).await.unwrap());
        assert_eq!("small", render(source, json!({"n": 1})).await.unwrap());
        assert_eq!("True|", render("{{eq 1 1}}|{{eq 1 2}}", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_with() {
        let rendered = render("{{#with user}}{{name}}{{/with}}{{#with nobody}}x{{else}}nobody{{/with}}",
                              json!({"user": {"name": "Ada"}})).await.unwrap();
        assert_eq!("Adanobody", rendered);
    }

    #[tokio::test]
    async fn test_set_persists() {
        let kernel = math_kernel();
        let template = PromptTemplate::new(
            "{{set name=\"total\" value=(Math_Add 1 2)}}{{get \"total\"}} {{#set name=\"captured\"}}t={{total}}{{/set}}"
        ).unwrap();
        let mut variables = Variables::new();
        let rendered = template.render(&kernel, &mut variables).await.unwrap();
        assert_eq!("3 ", rendered);
        assert_eq!(json!(3), variables["total"]);
        assert_eq!(json!("t=3"), variables["captured"]);
    }

    #[tokio::test]
    async fn test_function_helpers() {
        assert_eq!("5", render("{{Math_Add 2 \"3\"}}", json!({})).await.unwrap());
        assert_eq!("7", render("{{Math_Add a=3 Add_b=4}}", json!({})).await.unwrap());
        assert_eq!("HELLO", render("{{Math_Shout input}}", json!({"input": "hello"})).await.unwrap());
        // arguments may come from the variables
        assert_eq!("HELLO", render("{{Math_Shout}}", json!({"input": "hello"})).await.unwrap());
        assert_eq!("10", render("{{Math_Add (Math_Add 1 2) 7}}", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_function_helper_errors() {
        let error = render("{{Math_Add 1}}", json!({})).await.unwrap_err();
        assert!(error.downcast_ref::<InvalidParameterCount>().is_some());

        let error = render("{{Math_Add b=1}}", json!({})).await.unwrap_err();
        assert_eq!("a", error.downcast_ref::<MissingParameter>().unwrap().parameter);

        let error = render("{{Math_Fail}}", json!({})).await.unwrap_err();
        assert_eq!("failed on purpose", error.to_string());

        let error = render("{{Math_Shout 5}}", json!({})).await.unwrap_err();
        assert_eq!("input", error.downcast_ref::<InvalidParameterType>().unwrap().parameter);

        let error = render("{{Nope_Nothing 1}}", json!({})).await.unwrap_err();
        assert!(error.downcast_ref::<UnknownHelper>().is_some());
    }

    #[tokio::test]
    async fn test_message_blocks() {
        let rendered = render(
            "{{#message role=\"system\"}}Be brief.{{/message}}{{#each messages}}{{#message role=role}}{{content}}{{/message}}{{/each}}",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ).await.unwrap();
        assert_eq!("<message role=\"system\">Be brief.</message><message role=\"user\">hi</message>", rendered);

        let error = render("{{#message}}x{{/message}}", json!({})).await.unwrap_err();
        assert!(error.downcast_ref::<MessageWithoutRole>().is_some());
    }

    #[tokio::test]
    async fn test_misc_helpers() {
        let rendered = render("{{json obj}} {{concat \"a\" n}} {{json (array 1 2)}}", json!({"obj": {"k": [1]}, "n": 2}))
            .await.unwrap();
        assert_eq!("{\"k\":[1]} a2 [1,2]", rendered);
        assert_eq!("{{kept}}", render("{{{{raw}}}}{{kept}}{{{{/raw}}}}", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_block() {
        let error = render("{{#repeat 3}}x{{/repeat}}", json!({})).await.unwrap_err();
        assert_eq!("repeat", error.downcast_ref::<UnknownHelper>().unwrap().name);
    }
}
