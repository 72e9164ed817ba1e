//! Turns template source into a [Node] tree.
//!
//! Parsing happens in three passes: the source is split into text and tag tokens, `~` whitespace
//! control trims the text next to the tags, and the tokens are folded into blocks.

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::function::parse_number;
use crate::template::ast::{Block, Call, Expression, Node, Path};
use crate::template::errors::TemplateParseError;

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
enum TagKind {
    Expression,
    Open,
    Close,
    Else,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Comment { text: String, strip_left: bool, strip_right: bool },
    Raw(String),
    Tag { kind: TagKind, content: String, strip_left: bool, strip_right: bool, offset: usize },
}

impl Token {
    fn strips(&self) -> (bool, bool) {
        match self {
            Token::Comment { strip_left, strip_right, .. } | Token::Tag { strip_left, strip_right, .. } => (*strip_left, *strip_right),
            _ => (false, false),
        }
    }
}

/// Parses a template into nodes.
pub fn parse(source: &str) -> Result<Vec<Node>> {
    let mut tokens = tokenize(source)?;
    apply_whitespace_control(&mut tokens);
    build_tree(source, tokens)
}

fn error_at(source: &str, offset: usize, message: impl Into<String>) -> TemplateParseError {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
    TemplateParseError {
        message: message.into(),
        line,
        column,
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while let Some(found) = source[pos..].find("{{") {
        let start = pos + found;
        if start > pos {
            tokens.push(Token::Text(source[pos..start].to_string()));
        }
        let rest = &source[start..];

        // {{{{raw}}}} ... {{{{/raw}}}}
        if rest.starts_with("{{{{") {
            let name_end = rest.find("}}}}")
                .ok_or_else(|| error_at(source, start, "unclosed raw block tag"))?;
            let name = rest[4..name_end].trim();
            let closing = format!("{{{{{{{{/{}}}}}}}}}", name);
            let body_start = start + name_end + 4;
            let body_len = source[body_start..].find(&closing)
                .ok_or_else(|| error_at(source, start, format!("raw block {} is never closed", name)))?;
            tokens.push(Token::Raw(source[body_start..body_start + body_len].to_string()));
            pos = body_start + body_len + closing.len();
            continue;
        }

        let mut i = start + 2;
        let triple = source[i..].starts_with('{');
        if triple {
            i += 1;
        }
        let strip_left = source[i..].starts_with('~');
        if strip_left {
            i += 1;
        }

        if !triple && source[i..].starts_with('!') {
            let (text, strip_right, next) = read_comment(source, start, i)?;
            tokens.push(Token::Comment { text, strip_left, strip_right });
            pos = next;
            continue;
        }

        let (content_end, strip_right, next) = find_tag_end(source, start, i, triple)?;
        let content = source[i..content_end].trim();
        pos = next;

        if triple {
            tokens.push(Token::Tag { kind: TagKind::Expression, content: content.to_string(), strip_left, strip_right, offset: start });
            continue;
        }
        if let Some(open) = content.strip_prefix('#') {
            let open = open.trim();
            if open == "raw" {
                let closing_len = "{{/raw}}".len();
                let body_len = source[pos..].find("{{/raw}}")
                    .ok_or_else(|| error_at(source, start, "raw block is never closed"))?;
                tokens.push(Token::Raw(source[pos..pos + body_len].to_string()));
                pos += body_len + closing_len;
                continue;
            }
            tokens.push(Token::Tag { kind: TagKind::Open, content: open.to_string(), strip_left, strip_right, offset: start });
        } else if let Some(close) = content.strip_prefix('/') {
            tokens.push(Token::Tag { kind: TagKind::Close, content: close.trim().to_string(), strip_left, strip_right, offset: start });
        } else if content == "else" || content == "^" || content.starts_with("else ") {
            let chained = content.strip_prefix("else").unwrap_or("").trim();
            tokens.push(Token::Tag { kind: TagKind::Else, content: chained.to_string(), strip_left, strip_right, offset: start });
        } else {
            let content = content.strip_prefix('&').unwrap_or(content).trim();
            tokens.push(Token::Tag { kind: TagKind::Expression, content: content.to_string(), strip_left, strip_right, offset: start });
        }
    }
    if pos < source.len() {
        tokens.push(Token::Text(source[pos..].to_string()));
    }
    Ok(tokens)
}

/// Reads `{{! ... }}` or `{{!-- ... --}}`, `i` pointing at the `!`.
fn read_comment(source: &str, start: usize, i: usize) -> Result<(String, bool, usize)> {
    let long = source[i..].starts_with("!--");
    let body_start = if long { i + 3 } else { i + 1 };
    let mut search = body_start;
    loop {
        let found = source[search..].find("}}")
            .ok_or_else(|| error_at(source, start, "unclosed comment"))?;
        let close = search + found;
        let mut body_end = close;
        let strip_right = source[..body_end].ends_with('~');
        if strip_right {
            body_end -= 1;
        }
        if long {
            if !source[body_start..body_end].ends_with("--") {
                search = close + 2;
                continue;
            }
            body_end -= 2;
        }
        let text = source[body_start..body_end.max(body_start)].trim().to_string();
        return Ok((text, strip_right, close + 2));
    }
}

/// Finds the end of a tag whose content starts at `i`, skipping braces inside string literals.
/// Returns the end of the content, whether the tag ends with `~`, and the position after the tag.
fn find_tag_end(source: &str, start: usize, i: usize, triple: bool) -> Result<(usize, bool, usize)> {
    let closing = if triple { "}}}" } else { "}}" };
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, c) in source[i..].char_indices() {
        let at = i + offset;
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '}' if source[at..].starts_with(closing) => {
                let strip_right = source[..at].ends_with('~') && at > i;
                let content_end = if strip_right { at - 1 } else { at };
                return Ok((content_end, strip_right, at + closing.len()));
            }
            _ => {}
        }
    }
    Err(error_at(source, start, format!("tag is never closed with {}", closing)).into())
}

fn apply_whitespace_control(tokens: &mut [Token]) {
    for idx in 0..tokens.len() {
        let (strip_left, strip_right) = tokens[idx].strips();
        if strip_left && idx > 0 {
            if let Token::Text(text) = &mut tokens[idx - 1] {
                *text = text.trim_end().to_string();
            }
        }
        if strip_right && idx + 1 < tokens.len() {
            if let Token::Text(text) = &mut tokens[idx + 1] {
                *text = text.trim_start().to_string();
            }
        }
    }
}

struct OpenBlock {
    call: Call,
    body: Vec<Node>,
    inverse: Vec<Node>,
    in_inverse: bool,
    /// Opened by `{{else if ...}}`, so it is closed together with its parent.
    chained: bool,
    offset: usize,
}

impl OpenBlock {
    fn new(call: Call, chained: bool, offset: usize) -> Self {
        Self {
            call,
            body: Vec::new(),
            inverse: Vec::new(),
            in_inverse: false,
            chained,
            offset,
        }
    }

    fn nodes(&mut self) -> &mut Vec<Node> {
        if self.in_inverse { &mut self.inverse } else { &mut self.body }
    }
}

fn build_tree(source: &str, tokens: Vec<Token>) -> Result<Vec<Node>> {
    let mut root = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();

    fn current<'a>(root: &'a mut Vec<Node>, stack: &'a mut [OpenBlock]) -> &'a mut Vec<Node> {
        match stack.last_mut() {
            Some(block) => block.nodes(),
            None => root,
        }
    }

    for token in tokens {
        match token {
            Token::Text(text) => {
                if !text.is_empty() {
                    current(&mut root, &mut stack).push(Node::Text(text));
                }
            }
            Token::Comment { text, .. } => current(&mut root, &mut stack).push(Node::Comment(text)),
            Token::Raw(text) => current(&mut root, &mut stack).push(Node::Raw(text)),
            Token::Tag { kind, content, offset, .. } => match kind {
                TagKind::Expression => {
                    let expression = parse_expression(&content)
                        .map_err(|message| error_at(source, offset, message))?;
                    current(&mut root, &mut stack).push(Node::Expression(expression));
                }
                TagKind::Open => {
                    let call = parse_call(&content)
                        .map_err(|message| error_at(source, offset, message))?;
                    stack.push(OpenBlock::new(call, false, offset));
                }
                TagKind::Else => {
                    let block = stack.last_mut()
                        .ok_or_else(|| error_at(source, offset, "{{else}} outside of a block"))?;
                    if block.in_inverse {
                        return Err(error_at(source, offset, format!("block {} has more than one {{{{else}}}}", block.call.name)).into());
                    }
                    block.in_inverse = true;
                    if !content.is_empty() {
                        let call = parse_call(&content)
                            .map_err(|message| error_at(source, offset, message))?;
                        stack.push(OpenBlock::new(call, true, offset));
                    }
                }
                TagKind::Close => loop {
                    let block = stack.pop()
                        .ok_or_else(|| error_at(source, offset, format!("{{{{/{}}}}} closes nothing", content)))?;
                    if !block.chained && block.call.name != content {
                        return Err(error_at(source, offset,
                                            format!("{{{{/{}}}}} does not match the open block {}", content, block.call.name)).into());
                    }
                    let chained = block.chained;
                    let node = Node::Block(Block {
                        call: block.call,
                        body: block.body,
                        inverse: block.inverse,
                    });
                    current(&mut root, &mut stack).push(node);
                    if !chained {
                        break;
                    }
                }
            },
        }
    }
    if let Some(block) = stack.iter().rev().find(|b| !b.chained) {
        return Err(error_at(source, block.offset, format!("block {} is never closed", block.call.name)).into());
    }
    Ok(root)
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Word(String),
    Str(String),
    Open,
    Close,
    Equals,
}

fn lex_expression(content: &str) -> Result<Vec<ExprToken>, String> {
    let mut tokens = Vec::new();
    let mut chars = content.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(ExprToken::Open);
            }
            ')' => {
                chars.next();
                tokens.push(ExprToken::Close);
            }
            '=' => {
                chars.next();
                tokens.push(ExprToken::Equals);
            }
            '"' | '\'' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c2) = chars.next() {
                    match c2 {
                        '\\' => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => break,
                        },
                        q if q == c => {
                            closed = true;
                            break;
                        }
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(format!("unterminated string in {}", content));
                }
                tokens.push(ExprToken::Str(s));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c2) = chars.peek() {
                    if c2.is_whitespace() || matches!(c2, '(' | ')' | '=' | '"' | '\'') {
                        break;
                    }
                    word.push(c2);
                    chars.next();
                }
                tokens.push(ExprToken::Word(word));
            }
        }
    }
    Ok(tokens)
}

fn word_to_expression(word: &str) -> Expression {
    match word {
        "true" => Expression::Literal(Value::Bool(true)),
        "false" => Expression::Literal(Value::Bool(false)),
        "null" | "undefined" => Expression::Literal(Value::Null),
        _ if NUMBER_RE.is_match(word) => {
            Expression::Literal(parse_number(word).unwrap_or_else(|| Value::String(word.to_string())))
        }
        _ => Expression::Path(Path::parse(word)),
    }
}

/// Parses one argument starting at `idx`, returning it and the index after it.
fn parse_argument(tokens: &[ExprToken], idx: usize) -> Result<(Expression, usize), String> {
    match tokens.get(idx) {
        Some(ExprToken::Word(word)) => Ok((word_to_expression(word), idx + 1)),
        Some(ExprToken::Str(s)) => Ok((Expression::Literal(Value::String(s.clone())), idx + 1)),
        Some(ExprToken::Open) => {
            let (call, next) = parse_call_tokens(tokens, idx + 1)?;
            match tokens.get(next) {
                Some(ExprToken::Close) => Ok((Expression::Call(Box::new(call)), next + 1)),
                _ => Err(format!("sub-expression ({}) is missing its closing parenthesis", call.name)),
            }
        }
        Some(other) => Err(format!("unexpected {:?}", other)),
        None => Err("missing argument".to_string()),
    }
}

/// Parses `name args...` from `idx` until a closing parenthesis or the end.
fn parse_call_tokens(tokens: &[ExprToken], idx: usize) -> Result<(Call, usize), String> {
    let name = match tokens.get(idx) {
        Some(ExprToken::Word(name)) => name.clone(),
        _ => return Err("expected a helper name".to_string()),
    };
    let mut call = Call::new(name);
    let mut idx = idx + 1;
    while idx < tokens.len() {
        match (&tokens[idx], tokens.get(idx + 1)) {
            (ExprToken::Close, _) => break,
            (ExprToken::Word(key), Some(ExprToken::Equals)) => {
                let (value, next) = parse_argument(tokens, idx + 2)?;
                call.hash.push((key.clone(), value));
                idx = next;
            }
            _ => {
                if !call.hash.is_empty() {
                    return Err(format!("positional argument after hash arguments in {}", call.name));
                }
                let (value, next) = parse_argument(tokens, idx)?;
                call.params.push(value);
                idx = next;
            }
        }
    }
    Ok((call, idx))
}

fn parse_call(content: &str) -> Result<Call, String> {
    let tokens = lex_expression(content)?;
    let (call, next) = parse_call_tokens(&tokens, 0)?;
    if next != tokens.len() {
        return Err(format!("unexpected ) in {}", content));
    }
    Ok(call)
}

fn parse_expression(content: &str) -> Result<Expression, String> {
    let tokens = lex_expression(content)?;
    match tokens.as_slice() {
        [] => Err("empty expression".to_string()),
        [ExprToken::Word(_)] | [ExprToken::Str(_)] => parse_argument(&tokens, 0).map(|(e, _)| e),
        [ExprToken::Open, ..] => {
            let (expression, next) = parse_argument(&tokens, 0)?;
            if next != tokens.len() {
                return Err(format!("unexpected tokens after sub-expression in {}", content));
            }
            Ok(expression)
        }
        _ => parse_call(content).map(|call| Expression::Call(Box::new(call))),
    }
}

#[cfg(test)]
mod test_parser {
    use serde_json::json;

    use super::*;

    fn path(p: &str) -> Expression {
        Expression::Path(Path::parse(p))
    }

    #[test]
    fn test_text_and_expressions() {
        let nodes = parse("Hello {{name}}! {{{raw_html}}}").unwrap();
        assert_eq!(vec![
            Node::Text("Hello ".to_string()),
            Node::Expression(path("name")),
            Node::Text("! ".to_string()),
            Node::Expression(path("raw_html")),
        ], nodes);
    }

    #[test]
    fn test_helper_call() {
        let nodes = parse(r#"{{Math_Add 1 "two" (json x) c=3.5 d=true}}"#).unwrap();
        let Node::Expression(Expression::Call(call)) = &nodes[0] else { panic!("expected a call") };
        assert_eq!("Math_Add", call.name);
        assert_eq!(Expression::Literal(json!(1)), call.params[0]);
        assert_eq!(Expression::Literal(json!("two")), call.params[1]);
        let Expression::Call(sub) = &call.params[2] else { panic!("expected a sub-expression") };
        assert_eq!("json", sub.name);
        assert_eq!(("c".to_string(), Expression::Literal(json!(3.5))), call.hash[0]);
        assert_eq!(("d".to_string(), Expression::Literal(json!(true))), call.hash[1]);
    }

    #[test]
    fn test_string_with_braces_and_escapes() {
        let nodes = parse(r#"{{set name="x" value="a }} \"quoted\""}}"#).unwrap();
        let Node::Expression(Expression::Call(call)) = &nodes[0] else { panic!("expected a call") };
        assert_eq!(Expression::Literal(json!("a }} \"quoted\"")), call.hash[1].1);
    }

    #[test]
    fn test_blocks_and_else_if() {
        let nodes = parse("{{#if a}}A{{else if b}}B{{else}}C{{/if}}").unwrap();
        let Node::Block(block) = &nodes[0] else { panic!("expected a block") };
        assert_eq!("if", block.call.name);
        assert_eq!(vec![Node::Text("A".to_string())], block.body);
        let Node::Block(chained) = &block.inverse[0] else { panic!("expected a chained block") };
        assert_eq!(vec![path("b")], chained.call.params);
        assert_eq!(vec![Node::Text("C".to_string())], chained.inverse);
    }

    #[test]
    fn test_whitespace_control() {
        let nodes = parse("a  \n{{~name~}}\n  b").unwrap();
        assert_eq!(vec![
            Node::Text("a".to_string()),
            Node::Expression(path("name")),
            Node::Text("b".to_string()),
        ], nodes);
    }

    #[test]
    fn test_comments() {
        let nodes = parse("{{! short }}x{{!-- has }} inside --}}").unwrap();
        assert_eq!(vec![
            Node::Comment("short".to_string()),
            Node::Text("x".to_string()),
            Node::Comment("has }} inside".to_string()),
        ], nodes);
    }

    #[test]
    fn test_raw_blocks() {
        let nodes = parse("{{{{raw}}}}{{not parsed}}{{{{/raw}}}}{{#raw}}{{#if}}{{/raw}}").unwrap();
        assert_eq!(vec![
            Node::Raw("{{not parsed}}".to_string()),
            Node::Raw("{{#if}}".to_string()),
        ], nodes);
    }

    #[test]
    fn test_errors_carry_position() {
        let error = parse("line one\n  {{#if a}}never closed").unwrap_err();
        let error = error.downcast_ref::<TemplateParseError>().unwrap();
        assert_eq!((2, 3), (error.line, error.column));

        let error = parse("{{#each items}}{{/if}}").unwrap_err();
        assert!(error.to_string().contains("does not match"));

        assert!(parse("{{name").is_err());
        assert!(parse("{{else}}").is_err());
        assert!(parse("{{f \"open}}").is_err());
    }
}
