//! Built-in inline helpers that do not touch render state, and binding of helper arguments to
//! function parameters.

use anyhow::Result;
use serde_json::Value;

use crate::function::{parse_number, value_to_string, FunctionView, ParameterType, Variables};
use crate::template::errors::{InvalidParameterCount, InvalidParameterType, MissingParameter, RenderError};
use crate::utils::JsonMap;

/// Helpers evaluating to a boolean. Used inline they render `True` or nothing.
pub(crate) const CONDITION_HELPERS: [&str; 10] = [
    "eq", "equal", "equals",
    "lessThan", "greaterThan", "lessThanOrEqual", "greaterThanOrEqual",
    "not", "and", "or",
];

pub(crate) fn is_condition_helper(name: &str) -> bool {
    CONDITION_HELPERS.contains(&name)
}

/// Handlebars truthiness: null, false, 0, "", and empty arrays and objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s).and_then(|v| v.as_f64()),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn two<'v>(name: &str, params: &'v [Value]) -> Result<(&'v Value, &'v Value)> {
    match params {
        [left, right, ..] => Ok((left, right)),
        _ => Err(RenderError::new(name, "expects two arguments").into()),
    }
}

fn compare(name: &str, params: &[Value], predicate: fn(f64, f64) -> bool) -> Result<Value> {
    let (left, right) = two(name, params)?;
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => Ok(Value::Bool(predicate(l, r))),
        _ => Err(RenderError::new(name, format!("cannot compare {} and {} as numbers", left, right)).into()),
    }
}

/// Evaluates a built-in helper that only depends on its arguments.
/// Returns `None` when `name` is not such a helper.
pub(crate) fn call_pure_helper(name: &str, params: &[Value], hash: &JsonMap) -> Option<Result<Value>> {
    let result = match name {
        "eq" | "equal" | "equals" => two(name, params).map(|(l, r)| Value::Bool(values_equal(l, r))),
        "lessThan" => compare(name, params, |l, r| l < r),
        "greaterThan" => compare(name, params, |l, r| l > r),
        "lessThanOrEqual" => compare(name, params, |l, r| l <= r),
        "greaterThanOrEqual" => compare(name, params, |l, r| l >= r),
        "not" => match params.first() {
            Some(value) => Ok(Value::Bool(!is_truthy(value))),
            None => Err(RenderError::new(name, "expects one argument").into()),
        },
        "and" => Ok(Value::Bool(!params.is_empty() && params.iter().all(is_truthy))),
        "or" => Ok(Value::Bool(params.iter().any(is_truthy))),
        "concat" => Ok(Value::String(
            params.iter().chain(hash.values()).map(value_to_string).collect()
        )),
        "array" => Ok(Value::Array(params.to_vec())),
        "json" => match params.first() {
            Some(Value::String(s)) => Ok(Value::String(s.clone())),
            Some(value) => serde_json::to_string(value).map(Value::String).map_err(Into::into),
            None => Err(RenderError::new(name, "expects one argument").into()),
        },
        "raw" => Ok(params.first().cloned().unwrap_or(Value::Null)),
        _ => return None,
    };
    Some(result)
}

/// Names handled by the renderer itself.
pub(crate) fn is_builtin(name: &str) -> bool {
    matches!(name, "set" | "get" | "concat" | "array" | "json" | "raw") || is_condition_helper(name)
}

/// Whether a name looks like a `Plugin_Function` helper: at least two `_`-separated parts, each
/// starting with an uppercase letter.
pub(crate) fn is_helper_shaped(name: &str) -> bool {
    let mut parts = name.split('_');
    let count = parts.clone().count();
    count >= 2 && parts.all(|part| part.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
}

/// Binds helper arguments to the parameters of a function.
///
/// Positional arguments bind in declaration order and are type-checked strictly, see
/// [ParameterType::accept]. Hash arguments bind by
/// `param` or `Function_param`. Unbound parameters fall back to the current variables, then to
/// their default. Hash arguments that match no parameter are passed on under their own name.
pub(crate) fn bind_arguments(view: &FunctionView,
                             params: Vec<Value>,
                             mut hash: JsonMap,
                             variables: &Variables) -> Result<JsonMap> {
    let mut bound = JsonMap::new();
    if !params.is_empty() {
        let min = view.required_parameters().count();
        let max = view.parameters.len();
        if params.len() < min || params.len() > max {
            return Err(InvalidParameterCount {
                function: view.fully_qualified_name(),
                min,
                max,
                actual: params.len(),
            }.into());
        }
        for (parameter, value) in view.parameters.iter().zip(params) {
            let accepted = parameter.parameter_type.accept(&value).ok_or_else(|| InvalidParameterType {
                function: view.fully_qualified_name(),
                parameter: parameter.name.clone(),
                expected: parameter.parameter_type,
                value,
            })?;
            bound.insert(parameter.name.clone(), accepted);
        }
    }
    for parameter in &view.parameters {
        if bound.contains_key(&parameter.name) {
            continue;
        }
        let qualified = format!("{}_{}", view.name, parameter.name);
        if let Some(value) = hash.remove(&parameter.name).or_else(|| hash.remove(&qualified)) {
            let value = match parameter.parameter_type {
                ParameterType::Any => value,
                other => other.coerce(&value).unwrap_or(value),
            };
            bound.insert(parameter.name.clone(), value);
        } else if variables.contains_key(&parameter.name) {
            continue;
        } else if let Some(default) = &parameter.default_value {
            bound.insert(parameter.name.clone(), default.clone());
        } else if parameter.is_required {
            return Err(MissingParameter {
                function: view.fully_qualified_name(),
                parameter: parameter.name.clone(),
            }.into());
        }
    }
    for (name, value) in hash {
        bound.entry(name).or_insert(value);
    }
    Ok(bound)
}

#[cfg(test)]
mod test_helpers {
    use serde_json::json;

    use crate::function::ParameterView;

    use super::*;

    fn call(name: &str, params: Vec<Value>) -> Value {
        call_pure_helper(name, &params, &JsonMap::new()).unwrap().unwrap()
    }

    fn add_view() -> FunctionView {
        FunctionView::new("Add", "", vec![
            ParameterView::new("a", ParameterType::Number).required(),
            ParameterView::new("b", ParameterType::Number).with_default(0),
        ]).in_plugin("Math")
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{} should be falsy", falsy);
        }
        for truthy in [json!(true), json!(0.5), json!("0"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&truthy), "{} should be truthy", truthy);
        }
    }

    #[test]
    fn test_equality() {
        assert_eq!(json!(true), call("eq", vec![json!(1), json!("1.0")]));
        assert_eq!(json!(true), call("equals", vec![json!("a"), json!("a")]));
        assert_eq!(json!(false), call("equal", vec![json!("a"), json!("b")]));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(json!(true), call("lessThan", vec![json!("2"), json!(10)]));
        assert_eq!(json!(false), call("greaterThan", vec![json!(2), json!(10)]));
        assert_eq!(json!(true), call("greaterThanOrEqual", vec![json!(3), json!(3)]));
        assert!(call_pure_helper("lessThan", &[json!("a"), json!(1)], &JsonMap::new()).unwrap().is_err());
    }

    #[test]
    fn test_misc_helpers() {
        let mut hash = JsonMap::new();
        hash.insert("suffix".to_string(), json!("!"));
        let concat = call_pure_helper("concat", &[json!("a"), json!(1), json!(true)], &hash).unwrap().unwrap();
        assert_eq!(json!("a1true!"), concat);
        assert_eq!(json!([1, "x"]), call("array", vec![json!(1), json!("x")]));
        assert_eq!(json!("{\"a\":1}"), call("json", vec![json!({"a": 1})]));
        assert_eq!(json!("text"), call("json", vec![json!("text")]));
        assert_eq!(json!(false), call("and", vec![json!(1), json!("")]));
        assert_eq!(json!(true), call("or", vec![json!(0), json!("x")]));
        assert_eq!(json!(true), call("not", vec![json!(null)]));
        assert!(call_pure_helper("Math_Add", &[], &JsonMap::new()).is_none());
    }

    #[test]
    fn test_helper_shape() {
        assert!(is_helper_shaped("Math_Add"));
        assert!(is_helper_shaped("My_Text_Echo"));
        assert!(!is_helper_shaped("user_name"));
        assert!(!is_helper_shaped("Math"));
        assert!(!is_helper_shaped("Math_"));
    }

    #[test]
    fn test_bind_positional() {
        let bound = bind_arguments(&add_view(), vec![json!("1"), json!(2)], JsonMap::new(), &Variables::new()).unwrap();
        assert_eq!(json!({"a": 1, "b": 2}), Value::Object(bound));

        let error = bind_arguments(&add_view(), vec![json!(1), json!(2), json!(3)], JsonMap::new(), &Variables::new()).unwrap_err();
        let error = error.downcast_ref::<InvalidParameterCount>().unwrap();
        assert_eq!((1, 2, 3), (error.min, error.max, error.actual));

        let error = bind_arguments(&add_view(), vec![json!("one")], JsonMap::new(), &Variables::new()).unwrap_err();
        assert_eq!("a", error.downcast_ref::<InvalidParameterType>().unwrap().parameter);
    }

    #[test]
    fn test_bind_positional_is_strict() {
        let view = FunctionView::new("Echo", "", vec![
            ParameterView::new("text", ParameterType::String).required(),
            ParameterView::new("loud", ParameterType::Boolean),
        ]).in_plugin("Text");
        let error = bind_arguments(&view, vec![json!(5)], JsonMap::new(), &Variables::new()).unwrap_err();
        let error = error.downcast_ref::<InvalidParameterType>().unwrap();
        assert_eq!(("text", json!(5)), (error.parameter.as_str(), error.value.clone()));

        let error = bind_arguments(&view, vec![json!("hi"), json!("true")], JsonMap::new(), &Variables::new()).unwrap_err();
        assert_eq!("loud", error.downcast_ref::<InvalidParameterType>().unwrap().parameter);

        let bound = bind_arguments(&view, vec![json!("hi"), json!(true)], JsonMap::new(), &Variables::new()).unwrap();
        assert_eq!(json!({"text": "hi", "loud": true}), Value::Object(bound));
    }

    #[test]
    fn test_bind_hash() {
        let hash = json!({"Add_a": "5", "note": "extra"}).as_object().cloned().unwrap();
        let bound = bind_arguments(&add_view(), vec![], hash, &Variables::new()).unwrap();
        assert_eq!(json!({"a": 5, "b": 0, "note": "extra"}), Value::Object(bound));

        let error = bind_arguments(&add_view(), vec![], JsonMap::new(), &Variables::new()).unwrap_err();
        let error = error.downcast_ref::<MissingParameter>().unwrap();
        assert_eq!(("Math.Add", "a"), (error.function.as_str(), error.parameter.as_str()));

        let variables = json!({"a": 1}).as_object().cloned().unwrap();
        let bound = bind_arguments(&add_view(), vec![], JsonMap::new(), &variables).unwrap();
        assert_eq!(json!({"b": 0}), Value::Object(bound));
    }
}
