//! A small text-template engine for configuration documents.
//!
//! Text outside `{{ ... }}` is copied verbatim. Inside an action:
//!
//! - `.` is the whole data object, `.A.B` walks mapping keys
//! - `"text"` and `` `raw` `` are string literals, numbers, `true`, `false`
//!   and `nil` are literals
//! - `name arg...` calls a registered function
//! - `cmd | name arg...` passes the previous result as the last argument
//!
//! `{{- ` trims whitespace before the action and ` -}}` trims whitespace after.
//! Missing keys are errors, never empty output.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::value::{display, walk, Value};
use super::TemplateError;

/// A function callable from a template action.
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Named functions available to a template.
#[derive(Clone, Default)]
pub struct Functions {
    map: HashMap<String, Function>,
}

impl Functions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `f` under `name`, replacing any previous registration.
    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.map.insert(name.into(), Arc::new(f));
    }

    pub fn insert_arc(&mut self, name: impl Into<String>, f: Function) {
        self.map.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.map.get(name)
    }

    pub fn extend(&mut self, other: &Functions) {
        for (name, f) in &other.map {
            self.map.insert(name.clone(), Arc::clone(f));
        }
    }
}

impl fmt::Debug for Functions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.map.keys().collect();
        names.sort();
        f.debug_struct("Functions").field("names", &names).finish()
    }
}

/// Parses `text` and executes it against `data` in one step.
pub fn render(text: &str, data: &Value, funcs: &Functions) -> Result<String, TemplateError> {
    Template::parse(text)?.execute(data, funcs)
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Action(Vec<Command>),
}

#[derive(Debug, Clone)]
struct Command {
    terms: Vec<Term>,
}

#[derive(Debug, Clone)]
enum Term {
    Field(Vec<String>),
    Literal(Value),
    Ident(String),
}

impl Template {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        Parser { src: text, pos: 0 }.parse()
    }

    pub fn execute(&self, data: &Value, funcs: &Functions) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(commands) => {
                    let value = eval_pipeline(commands, data, funcs)?;
                    out.push_str(&display(&value));
                }
            }
        }
        Ok(out)
    }
}

fn eval_pipeline(commands: &[Command], data: &Value, funcs: &Functions) -> Result<Value, TemplateError> {
    let mut piped = None;
    for command in commands {
        piped = Some(eval_command(command, data, funcs, piped.take())?);
    }
    Ok(piped.unwrap_or(Value::Null))
}

fn eval_command(
    command: &Command,
    data: &Value,
    funcs: &Functions,
    piped: Option<Value>,
) -> Result<Value, TemplateError> {
    let Some((head, rest)) = command.terms.split_first() else {
        return Ok(Value::Null);
    };

    match head {
        Term::Ident(name) => {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for term in rest {
                args.push(eval_term(term, data, funcs)?);
            }
            args.extend(piped);
            call(name, &args, funcs)
        }
        term => eval_term(term, data, funcs),
    }
}

fn eval_term(term: &Term, data: &Value, funcs: &Functions) -> Result<Value, TemplateError> {
    match term {
        Term::Field(segments) => walk(data, segments).cloned(),
        Term::Literal(value) => Ok(value.clone()),
        Term::Ident(name) => call(name, &[], funcs),
    }
}

fn call(name: &str, args: &[Value], funcs: &Functions) -> Result<Value, TemplateError> {
    let f = funcs
        .get(name)
        .ok_or_else(|| TemplateError::UnknownFunction(name.to_string()))?;
    f(args).map_err(|message| TemplateError::Function {
        name: name.to_string(),
        message,
    })
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Parse {
            pos: self.pos,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        self.pos > start
    }

    fn parse(mut self) -> Result<Template, TemplateError> {
        let mut nodes = Vec::new();
        let mut text = String::new();

        while let Some(ch) = self.peek() {
            if !self.rest().starts_with("{{") {
                text.push(ch);
                self.bump();
                continue;
            }

            self.pos += 2;
            if self.rest().starts_with('-')
                && self.rest()[1..].starts_with(|c: char| c.is_whitespace())
            {
                self.pos += 1;
                text.truncate(text.trim_end().len());
            }
            if !text.is_empty() {
                nodes.push(Node::Text(std::mem::take(&mut text)));
            }

            let (commands, trim_after) = self.parse_action()?;
            nodes.push(Node::Action(commands));
            if trim_after {
                self.skip_whitespace();
            }
        }

        if !text.is_empty() {
            nodes.push(Node::Text(text));
        }
        Ok(Template { nodes })
    }

    /// Parses one action body, consuming the closing delimiter.
    fn parse_action(&mut self) -> Result<(Vec<Command>, bool), TemplateError> {
        let mut commands = Vec::new();
        let mut terms = Vec::new();

        let trim_after = loop {
            let spaced = self.skip_whitespace();
            let rest = self.rest();

            if rest.is_empty() {
                return Err(self.error("unclosed action"));
            }
            if spaced && rest.starts_with("-}}") {
                self.pos += 3;
                break true;
            }
            if rest.starts_with("}}") {
                self.pos += 2;
                break false;
            }

            match self.peek() {
                Some('|') => {
                    self.bump();
                    commands.push(self.finish_command(std::mem::take(&mut terms), commands.len())?);
                }
                Some('"') => terms.push(Term::Literal(Value::String(self.quoted()?))),
                Some('`') => terms.push(Term::Literal(Value::String(self.raw()?))),
                Some('.') => terms.push(self.field()?),
                Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => {
                    terms.push(Term::Literal(self.number()?))
                }
                Some(c) if c.is_alphabetic() || c == '_' => {
                    let word = self.word();
                    terms.push(match word.as_str() {
                        "true" => Term::Literal(Value::Bool(true)),
                        "false" => Term::Literal(Value::Bool(false)),
                        "nil" => Term::Literal(Value::Null),
                        _ => Term::Ident(word),
                    });
                }
                Some(c) => return Err(self.error(format!("unexpected {c:?} in action"))),
                None => return Err(self.error("unclosed action")),
            }
        };

        commands.push(self.finish_command(terms, commands.len())?);
        Ok((commands, trim_after))
    }

    fn finish_command(&self, terms: Vec<Term>, index: usize) -> Result<Command, TemplateError> {
        let is_call = match terms.first() {
            None => return Err(self.error("missing value for command")),
            Some(head) => matches!(head, Term::Ident(_)),
        };
        if !is_call && index > 0 {
            return Err(self.error("non-function command in pipeline stage"));
        }
        if !is_call && terms.len() > 1 {
            return Err(self.error("can't give argument to non-function"));
        }
        Ok(Command { terms })
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn field(&mut self) -> Result<Term, TemplateError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
        {
            if self.rest().starts_with("-}}") {
                break;
            }
            self.bump();
        }

        let chain = &self.src[start + 1..self.pos];
        if chain.is_empty() {
            return Ok(Term::Field(Vec::new()));
        }
        let segments: Vec<String> = chain.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(TemplateError::Parse {
                pos: start,
                message: format!("bad field chain {:?}", &self.src[start..self.pos]),
            });
        }
        Ok(Term::Field(segments))
    }

    fn number(&mut self) -> Result<Value, TemplateError> {
        let start = self.pos;
        self.bump();
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '+' || c == '-')
        {
            if self.rest().starts_with("-}}") {
                break;
            }
            self.bump();
        }
        let literal = &self.src[start..self.pos];

        if let Ok(i) = literal.parse::<i64>() {
            return Ok(Value::from(i));
        }
        if let Ok(u) = literal.parse::<u64>() {
            return Ok(Value::from(u));
        }
        literal
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or(TemplateError::Parse {
                pos: start,
                message: format!("bad number syntax: {literal:?}"),
            })
    }

    fn quoted(&mut self) -> Result<String, TemplateError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();

        while let Some(ch) = self.bump() {
            match ch {
                '"' => return Ok(out),
                '\\' => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('"' | '\\')) => out.push(c),
                    Some(c) => {
                        return Err(self.error(format!("unknown escape sequence \\{c}")));
                    }
                    None => break,
                },
                '\n' => break,
                c => out.push(c),
            }
        }

        Err(TemplateError::Parse {
            pos: start,
            message: "unterminated quoted string".to_string(),
        })
    }

    fn raw(&mut self) -> Result<String, TemplateError> {
        let start = self.pos;
        self.bump();
        let body_start = self.pos;
        while let Some(ch) = self.bump() {
            if ch == '`' {
                return Ok(self.src[body_start..self.pos - 1].to_string());
            }
        }
        Err(TemplateError::Parse {
            pos: start,
            message: "unterminated raw string".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn funcs() -> Functions {
        let mut funcs = Functions::new();
        funcs.insert("upper", |args: &[Value]| match args {
            [Value::String(s)] => Ok(Value::String(s.to_uppercase())),
            _ => Err("upper takes one string".to_string()),
        });
        funcs.insert("join", |args: &[Value]| {
            Ok(Value::String(
                args.iter().map(display).collect::<Vec<_>>().join("-"),
            ))
        });
        funcs
    }

    #[test]
    fn test_plain_text_passes_through() {
        let out = render("no actions here { } }}", &json!({}), &funcs()).unwrap();
        assert_eq!(out, "no actions here { } }}");
    }

    #[test]
    fn test_field_chain() {
        let data = json!({"server": {"host": "example.com", "port": 8080}});
        let out = render("https://{{ .server.host }}:{{.server.port}}", &data, &funcs()).unwrap();
        assert_eq!(out, "https://example.com:8080");
    }

    #[test]
    fn test_dot_renders_whole_object() {
        let data = json!({"a": 1});
        assert_eq!(render("{{ . }}", &data, &funcs()).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_missing_key_is_error() {
        let data = json!({"a": {"b": 1}});
        let err = render("{{ .a.c }}", &data, &funcs()).unwrap_err();
        assert_eq!(err, TemplateError::MissingKey("a.c".into()));
    }

    #[test]
    fn test_function_call_with_literals() {
        let data = json!({"name": "x"});
        let out = render(r#"{{ join "a" `b` 3 true .name }}"#, &data, &funcs()).unwrap();
        assert_eq!(out, "a-b-3-true-x");
    }

    #[test]
    fn test_pipeline_appends_previous_result() {
        let data = json!({"name": "dev"});
        let out = render(r#"{{ .name | upper | join "env" }}"#, &data, &funcs()).unwrap();
        assert_eq!(out, "env-DEV");
    }

    #[test]
    fn test_unknown_function() {
        let err = render("{{ nope 1 }}", &json!({}), &funcs()).unwrap_err();
        assert_eq!(err, TemplateError::UnknownFunction("nope".into()));
    }

    #[test]
    fn test_function_error_is_reported() {
        let err = render("{{ upper 1 }}", &json!({}), &funcs()).unwrap_err();
        assert!(matches!(err, TemplateError::Function { name, .. } if name == "upper"));
    }

    #[test]
    fn test_trim_markers() {
        let data = json!({"a": "x"});
        let out = render("[  {{- .a -}}  ]", &data, &funcs()).unwrap();
        assert_eq!(out, "[x]");
    }

    #[test]
    fn test_quoted_string_may_contain_braces() {
        let out = render(r#"{{ "}}\"" }}"#, &json!({}), &funcs()).unwrap();
        assert_eq!(out, "}}\"");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Template::parse("{{ .a "), Err(TemplateError::Parse { .. })));
        assert!(matches!(Template::parse("{{ }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(Template::parse("{{ .a..b }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(Template::parse("{{ .a .b }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(Template::parse("{{ upper | .a }}"), Err(TemplateError::Parse { .. })));
        assert!(matches!(Template::parse(r#"{{ "open }}"#), Err(TemplateError::Parse { .. })));
    }

    #[test]
    fn test_negative_number_literal() {
        let out = render("{{ join -1 2.5 }}", &json!({}), &funcs()).unwrap();
        assert_eq!(out, "-1-2.5");
    }
}
