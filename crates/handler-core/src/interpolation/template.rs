//! Template dialect.
//!
//! Task inputs use Go-template style actions (`{{.name}}`, `{{index .a 0}}`,
//! `{{(index .vars 0).value}}`). Each action is parsed here and lowered onto
//! a handlebars expression that reaches into the data exclusively through the
//! `index` helper; text between actions is copied verbatim and never passes
//! through handlebars.

use handlebars::{
    Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, RenderErrorReason,
    ScopedJson, no_escape,
};
use serde_json::Value;
use std::fmt::Write as _;

use super::error::{InterpolationError, Result};

const INDEX_HELPER: &str = "index";
const LEN_HELPER: &str = "len";
const FUNCTIONS: &[&str] = &[INDEX_HELPER, LEN_HELPER];

/// Deepest parenthesised nesting accepted in one action.
const MAX_DEPTH: usize = 128;

/// A compiled template.
pub(crate) struct Template {
    registry: Handlebars<'static>,
    segments: Vec<Segment>,
}

enum Segment {
    Text(String),
    Action(String),
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template").field("segments", &self.segments.len()).finish_non_exhaustive()
    }
}

impl Template {
    /// Parses `source` and compiles every action.
    pub(crate) fn compile(source: &str) -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(no_escape);
        registry.register_helper(INDEX_HELPER, Box::new(IndexHelper));
        registry.register_helper(LEN_HELPER, Box::new(LenHelper));

        let mut segments = Vec::new();
        for item in scan(source)? {
            match item {
                Scanned::Text(text) => segments.push(Segment::Text(text)),
                Scanned::Action(node) => match lower_action(&node) {
                    Lowered::Text(text) => segments.push(Segment::Text(text)),
                    Lowered::Handlebars(expression) => {
                        let name = format!("action-{}", segments.len());
                        registry
                            .register_template_string(&name, &expression)
                            .map_err(|e| InterpolationError::compile(e.to_string()))?;
                        segments.push(Segment::Action(name));
                    }
                },
            }
        }
        Ok(Self { registry, segments })
    }

    /// Renders the template against `data`.
    pub(crate) fn render(&self, data: &Value) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action(name) => {
                    let rendered = self
                        .registry
                        .render(name, data)
                        .map_err(|e| InterpolationError::render(e.to_string()))?;
                    out.push_str(&rendered);
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Scanning

enum Scanned {
    Text(String),
    Action(Node),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Dot,
    Ident(String),
    Literal(Value),
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    spaced: bool,
}

/// Splits `source` into text and parsed actions, honoring `{{-` / `-}}` trim markers.
fn scan(source: &str) -> Result<Vec<Scanned>> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut trim_leading = false;
    loop {
        let Some(start) = rest.find("{{") else {
            let text = if trim_leading { rest.trim_start() } else { rest };
            if !text.is_empty() {
                items.push(Scanned::Text(text.to_string()));
            }
            return Ok(items);
        };
        let mut text = &rest[..start];
        if trim_leading {
            text = text.trim_start();
        }
        let mut body = &rest[start + 2..];
        let trim_marker = body.strip_prefix('-').filter(|s| s.starts_with(char::is_whitespace));
        if let Some(stripped) = trim_marker {
            text = text.trim_end();
            body = stripped;
        }
        if !text.is_empty() {
            items.push(Scanned::Text(text.to_string()));
        }

        let action = lex_action(body)?;
        if let Some(tokens) = action.tokens {
            items.push(Scanned::Action(parse_action(&tokens)?));
        }
        trim_leading = action.trim_right;
        rest = &body[action.consumed..];
    }
}

struct LexedAction {
    /// `None` for comments.
    tokens: Option<Vec<Spanned>>,
    /// Bytes consumed, including the closing delimiter.
    consumed: usize,
    trim_right: bool,
}

/// Returns the length of the closing delimiter at `s`, and whether it trims.
fn closing_at(s: &str) -> Option<(usize, bool)> {
    if s.starts_with("}}") {
        return Some((2, false));
    }
    let trimmed = s.trim_start();
    let ws = s.len() - trimmed.len();
    if ws > 0 && trimmed.starts_with("-}}") {
        return Some((ws + 3, true));
    }
    None
}

fn lex_action(body: &str) -> Result<LexedAction> {
    let unclosed = || InterpolationError::compile("unclosed action");

    let leading = body.len() - body.trim_start().len();
    if body[leading..].starts_with("/*") {
        let close = body[leading..]
            .find("*/")
            .ok_or_else(|| InterpolationError::compile("unclosed comment"))?;
        let after = leading + close + 2;
        let (len, trim_right) = closing_at(&body[after..])
            .ok_or_else(|| InterpolationError::compile("comment ends before closing delimiter"))?;
        return Ok(LexedAction { tokens: None, consumed: after + len, trim_right });
    }

    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut spaced = false;
    loop {
        let rest = &body[pos..];
        if rest.is_empty() {
            return Err(unclosed());
        }
        if let Some((len, trim_right)) = closing_at(rest) {
            return Ok(LexedAction { tokens: Some(tokens), consumed: pos + len, trim_right });
        }
        let c = rest.chars().next().ok_or_else(unclosed)?;
        if c.is_whitespace() {
            pos += c.len_utf8();
            spaced = true;
            continue;
        }
        let (token, len) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '.' => {
                let name_len = word_len(&rest[1..]);
                if name_len == 0 {
                    (Token::Dot, 1)
                } else if rest[1..].starts_with(|c: char| c.is_ascii_digit()) {
                    return Err(InterpolationError::compile(format!("bad field name in {rest:?}")));
                } else {
                    (Token::Field(rest[1..=name_len].to_string()), name_len + 1)
                }
            }
            '"' => lex_quoted(rest)?,
            '`' => {
                let end = rest[1..]
                    .find('`')
                    .ok_or_else(|| InterpolationError::compile("unterminated raw string"))?;
                (Token::Literal(Value::String(rest[1..=end].to_string())), end + 2)
            }
            '-' | '0'..='9' => lex_number(rest)?,
            c if c.is_alphabetic() || c == '_' => {
                let len = word_len(rest);
                (Token::Ident(rest[..len].to_string()), len)
            }
            '|' => return Err(InterpolationError::compile("pipelines are not supported")),
            '$' => return Err(InterpolationError::compile("variables are not supported")),
            other => {
                return Err(InterpolationError::compile(format!("unexpected {other:?} in action")));
            }
        };
        tokens.push(Spanned { token, spaced });
        spaced = false;
        pos += len;
    }
}

fn word_len(s: &str) -> usize {
    s.char_indices()
        .find(|&(_, c)| !(c.is_alphanumeric() || c == '_'))
        .map_or(s.len(), |(i, _)| i)
}

fn lex_quoted(rest: &str) -> Result<(Token, usize)> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((Token::Literal(Value::String(value)), i + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, c)) => value.push(c),
                None => break,
            },
            '\n' => break,
            c => value.push(c),
        }
    }
    Err(InterpolationError::compile("unterminated quoted string"))
}

fn lex_number(rest: &str) -> Result<(Token, usize)> {
    let sign = usize::from(rest.starts_with('-'));
    let digits = rest[sign..].find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len() - sign);
    let text = &rest[..sign + digits];
    let number = text
        .parse::<i64>()
        .map_err(|_| InterpolationError::compile(format!("bad number syntax: {text:?}")))?;
    Ok((Token::Literal(Value::from(number)), sign + digits))
}

// ---------------------------------------------------------------------------
// Parsing

#[derive(Debug, Clone, PartialEq)]
enum Node {
    /// `.` (empty) or `.a.b`.
    Path(Vec<String>),
    Literal(Value),
    Call(String, Vec<Node>),
    /// `(command)` optionally followed by fields.
    Group(Box<Node>, Vec<String>),
}

fn parse_action(tokens: &[Spanned]) -> Result<Node> {
    let mut pos = 0;
    let node = parse_command(tokens, &mut pos, 0)?;
    match tokens.get(pos) {
        None => Ok(node),
        Some(Spanned { token: Token::RParen, .. }) => {
            Err(InterpolationError::compile("unexpected right paren"))
        }
        Some(other) => Err(InterpolationError::compile(format!("unexpected {:?}", other.token))),
    }
}

fn parse_command(tokens: &[Spanned], pos: &mut usize, depth: usize) -> Result<Node> {
    if depth > MAX_DEPTH {
        return Err(InterpolationError::compile(format!(
            "parentheses nested deeper than {MAX_DEPTH} levels"
        )));
    }
    let mut operands = Vec::new();
    while let Some(spanned) = tokens.get(*pos) {
        if spanned.token == Token::RParen {
            break;
        }
        operands.push(parse_operand(tokens, pos, depth)?);
    }
    let mut operands = operands.into_iter();
    let Some(first) = operands.next() else {
        return Err(InterpolationError::compile("missing value for command"));
    };
    let args: Vec<Node> = operands.collect();
    match first {
        Node::Call(name, _) => {
            check_arity(&name, args.len())?;
            Ok(Node::Call(name, args))
        }
        _ if !args.is_empty() => {
            Err(InterpolationError::compile("can't give argument to non-function"))
        }
        node => Ok(node),
    }
}

fn check_arity(name: &str, count: usize) -> Result<()> {
    let ok = match name {
        INDEX_HELPER => count >= 1,
        LEN_HELPER => count == 1,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(InterpolationError::compile(format!("wrong number of args for {name}: got {count}")))
    }
}

fn parse_operand(tokens: &[Spanned], pos: &mut usize, depth: usize) -> Result<Node> {
    let Some(spanned) = tokens.get(*pos) else {
        return Err(InterpolationError::compile("unexpected end of action"));
    };
    *pos += 1;
    let node = match &spanned.token {
        Token::Dot => Node::Path(Vec::new()),
        Token::Field(first) => {
            let mut path = vec![first.clone()];
            path.extend(trailing_fields(tokens, pos));
            return Ok(Node::Path(path));
        }
        Token::Literal(value) => Node::Literal(value.clone()),
        Token::Ident(name) => match name.as_str() {
            "true" => Node::Literal(Value::Bool(true)),
            "false" => Node::Literal(Value::Bool(false)),
            "nil" => Node::Literal(Value::Null),
            name if FUNCTIONS.contains(&name) => Node::Call(name.to_string(), Vec::new()),
            name => {
                return Err(InterpolationError::compile(format!("function {name:?} not defined")));
            }
        },
        Token::LParen => {
            let inner = parse_command(tokens, pos, depth + 1)?;
            match tokens.get(*pos) {
                Some(Spanned { token: Token::RParen, .. }) => *pos += 1,
                _ => return Err(InterpolationError::compile("unclosed left paren")),
            }
            let fields = trailing_fields(tokens, pos);
            return Ok(Node::Group(Box::new(inner), fields));
        }
        Token::RParen => return Err(InterpolationError::compile("unexpected right paren")),
    };
    if matches!(tokens.get(*pos), Some(Spanned { token: Token::Field(_), spaced: false })) {
        return Err(InterpolationError::compile("unexpected field access on a literal"));
    }
    Ok(node)
}

/// Consumes fields written directly after the previous token.
fn trailing_fields(tokens: &[Spanned], pos: &mut usize) -> Vec<String> {
    let mut fields = Vec::new();
    while let Some(Spanned { token: Token::Field(name), spaced: false }) = tokens.get(*pos) {
        fields.push(name.clone());
        *pos += 1;
    }
    fields
}

// ---------------------------------------------------------------------------
// Lowering

enum Lowered {
    Text(String),
    Handlebars(String),
}

fn lower_action(node: &Node) -> Lowered {
    match node {
        Node::Literal(value) => Lowered::Text(render_value(value)),
        Node::Group(inner, fields) if fields.is_empty() => lower_action(inner),
        Node::Call(name, args) => Lowered::Handlebars(format!("{{{{{}}}}}", call_body(name, args))),
        Node::Path(path) => {
            Lowered::Handlebars(format!("{{{{{}}}}}", index_body("this".to_string(), path)))
        }
        Node::Group(inner, fields) => {
            Lowered::Handlebars(format!("{{{{{}}}}}", index_body(lower_param(inner), fields)))
        }
    }
}

fn index_body(base: String, keys: &[String]) -> String {
    let mut body = format!("{INDEX_HELPER} {base}");
    for key in keys {
        let _ = write!(body, " {}", Value::String(key.clone()));
    }
    body
}

fn call_body(name: &str, args: &[Node]) -> String {
    let mut body = name.to_string();
    for arg in args {
        let _ = write!(body, " {}", lower_param(arg));
    }
    body
}

fn lower_param(node: &Node) -> String {
    match node {
        Node::Path(path) => with_keys("this".to_string(), path),
        Node::Literal(value) => value.to_string(),
        Node::Call(name, args) => format!("({})", call_body(name, args)),
        Node::Group(inner, fields) => with_keys(lower_param(inner), fields),
    }
}

fn with_keys(base: String, keys: &[String]) -> String {
    if keys.is_empty() { base } else { format!("({})", index_body(base, keys)) }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Helpers

fn index_value(base: &Value, key: &Value) -> std::result::Result<Value, String> {
    match (base, key) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(_), other) => Err(format!("cannot index map with key {other}")),
        (Value::Array(items), Value::Number(n)) => {
            let index = n.as_i64().ok_or_else(|| format!("cannot index slice with {n}"))?;
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| format!("index out of range: {index}"))
        }
        (Value::Array(_), other) => Err(format!("cannot index slice with {other}")),
        (scalar, _) => Err(format!("cannot index into {scalar}")),
    }
}

/// `index base key...`: walks objects by string key and arrays by integer.
#[derive(Clone, Copy)]
struct IndexHelper;

impl HelperDef for IndexHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> std::result::Result<ScopedJson<'rc>, RenderError> {
        let base = h.param(0).ok_or(RenderErrorReason::ParamNotFoundForIndex(INDEX_HELPER, 0))?;
        let mut current = base.value().clone();
        for key in h.params().iter().skip(1) {
            current = index_value(&current, key.value()).map_err(RenderErrorReason::Other)?;
        }
        Ok(ScopedJson::Derived(current))
    }
}

/// `len x`: length of a string, array or object.
#[derive(Clone, Copy)]
struct LenHelper;

impl HelperDef for LenHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> std::result::Result<ScopedJson<'rc>, RenderError> {
        let value = h.param(0).ok_or(RenderErrorReason::ParamNotFoundForIndex(LEN_HELPER, 0))?;
        let len = match value.value() {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            other => return Err(RenderErrorReason::Other(format!("len of {other}")).into()),
        };
        Ok(ScopedJson::Derived(Value::from(len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, data: &Value) -> Result<String> {
        Template::compile(source)?.render(data)
    }

    #[test]
    fn test_lowering() {
        let tokens = lex_action(".this.metadata.name}}").unwrap().tokens.unwrap();
        let node = parse_action(&tokens).unwrap();
        assert_eq!(node, Node::Path(vec!["this".into(), "metadata".into(), "name".into()]));
        match lower_action(&node) {
            Lowered::Handlebars(expr) => {
                assert_eq!(expr, r#"{{index this "this" "metadata" "name"}}"#);
            }
            Lowered::Text(_) => panic!("expected a handlebars expression"),
        }
    }

    #[test]
    fn test_group_with_fields() {
        let tokens = lex_action("(index .vars 0).value }}").unwrap().tokens.unwrap();
        let node = parse_action(&tokens).unwrap();
        assert_eq!(
            lower_param(&node),
            r#"(index (index (index this "vars") 0) "value")"#
        );
    }

    #[test]
    fn test_text_is_verbatim() {
        let data = json!({"name": "x"});
        let text = r"no actions \ here }} <b>&</b>";
        assert_eq!(render(text, &data).unwrap(), text);
    }

    #[test]
    fn test_trim_markers() {
        let data = json!({"a": "A", "b": "B"});
        assert_eq!(render("x  {{- .a -}}  y {{.b}}", &data).unwrap(), "xAy B");
    }

    #[test]
    fn test_comments_and_literals() {
        let data = json!({});
        assert_eq!(render("a{{/* hidden */}}b", &data).unwrap(), "ab");
        assert_eq!(render(r#"{{"lit"}}-{{42}}-{{true}}"#, &data).unwrap(), "lit-42-true");
    }

    #[test]
    fn test_len() {
        let data = json!({"items": [1, 2, 3]});
        assert_eq!(render("{{len .items}}", &data).unwrap(), "3");
    }

    #[test]
    fn test_compile_errors() {
        for source in [
            "hello {{name}}",
            "{{{index .name}}",
            "{{.name",
            "{{(index .a 0}}",
            "{{index .a 0)}}",
            "{{}}",
            "{{.a | printf}}",
            "{{\"open}}",
            "{{index}}",
            "{{.a .b}}",
        ] {
            assert!(
                matches!(Template::compile(source), Err(InterpolationError::Compile { .. })),
                "{source:?} should not compile"
            );
        }
    }

    #[test]
    fn test_nesting_is_bounded() {
        let data = json!({"a": "x"});
        let shallow = format!("{{{{{}.a{}}}}}", "(".repeat(10), ")".repeat(10));
        assert_eq!(render(&shallow, &data).unwrap(), "x");

        let deep = format!("{{{{{}.a{}}}}}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(Template::compile(&deep), Err(InterpolationError::Compile { .. })));
    }

    #[test]
    fn test_index_errors() {
        let data = json!({"list": [1], "map": {"k": "v"}, "scalar": 3});
        let sources = [
            "{{index .list 1}}",
            "{{index .list \"k\"}}",
            "{{index .map 0}}",
            "{{index .scalar 0}}",
        ];
        for source in sources {
            assert!(
                matches!(render(source, &data), Err(InterpolationError::Render { .. })),
                "{source:?} should fail to render"
            );
        }
    }
}
