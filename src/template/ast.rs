use serde_json::Value;

/// A node of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Comment(String),
    /// `{{expr}}` or `{{{expr}}}`. Neither form escapes its output.
    Expression(Expression),
    Block(Block),
    /// Content of a raw block, emitted as written.
    Raw(String),
}

/// `{{#name params hash}}body{{else}}inverse{{/name}}`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub call: Call,
    pub body: Vec<Node>,
    pub inverse: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Path(Path),
    Literal(Value),
    /// A helper called with arguments, or a sub-expression `(helper ...)`.
    Call(Box<Call>),
}

/// `name param1 param2 key=value`
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub params: Vec<Expression>,
    pub hash: Vec<(String, Expression)>,
}

impl Call {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            hash: Vec::new(),
        }
    }
}

/// A variable reference.
///
/// `../` steps, before or right after `@`, are counted in `parents`. `@name` sets `data`, and
/// `this` is dropped from the segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub original: String,
    pub parents: usize,
    pub data: bool,
    pub this: bool,
    pub segments: Vec<String>,
}

impl Path {
    pub fn parse(original: &str) -> Self {
        let mut rest = original;
        let mut parents = 0;
        while let Some(stripped) = rest.strip_prefix("../") {
            parents += 1;
            rest = stripped;
        }
        let data = rest.starts_with('@');
        if data {
            rest = &rest[1..];
            // `@../index` reads the data of an enclosing block
            while let Some(stripped) = rest.strip_prefix("../") {
                parents += 1;
                rest = stripped;
            }
        }
        let mut segments: Vec<String> = rest
            .split(['.', '/'])
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_start_matches('[').trim_end_matches(']').to_string())
            .collect();
        let this = matches!(segments.first().map(String::as_str), Some("this") | Some("."))
            || rest == "." || rest.is_empty();
        if segments.first().map(String::as_str) == Some("this") {
            segments.remove(0);
        }
        Self {
            original: original.to_string(),
            parents,
            data,
            this,
            segments,
        }
    }

    /// A bare identifier such as `goal` or `Math_Add`, which may also name a helper.
    pub fn simple_name(&self) -> Option<&str> {
        if self.parents == 0 && !self.data && !self.this && self.segments.len() == 1 {
            self.segments.first().map(String::as_str)
        } else {
            None
        }
    }
}
