//! JSON Path Queries
//!
//! A small path language over `serde_json::Value`, used by crawl stages to
//! pull records out of API responses.
//!
//! # Syntax
//!
//! | Form                   | Meaning                                              |
//! |------------------------|------------------------------------------------------|
//! | `a.b.c`                | Nested field access                                  |
//! | `items.0`              | Array index (or an object key named `0`)             |
//! | `items.#`              | Array length                                         |
//! | `items.#.id`           | Map the rest of the path over every element          |
//! | `items.#(n>0)`         | First element matching the predicate                 |
//! | `items.#(n>0)#`        | All elements matching the predicate                  |
//! | `items.#(flag)`        | First element whose `flag` is present and truthy     |
//! | `a\.b`                 | Key containing a literal dot                         |
//! | `path \| path`         | Evaluate the right side against the left's result    |
//! | `@this`, `@group`      | Built-in modifiers                                   |
//! | `@name:arg`            | Modifier from the [`QueryExtensions`] table          |
//!
//! Predicate operators are `==`, `!=`, `<`, `<=`, `>`, `>=` against a
//! number, a double-quoted string, `true`, `false` or `null`.
//!
//! Whitespace outside double quotes is ignored, so long paths can be written
//! across several lines. Modifiers are resolved when a path is compiled: an
//! unknown modifier is a compile error, never a silent miss.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::domain::pipeline::{Extract, Item, StageError};

// =============================================================================
// Errors
// =============================================================================

/// Query failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The path is malformed.
    #[error("invalid path {path:?}: {message}")]
    Syntax {
        /// Path text.
        path: String,
        /// What is wrong.
        message: String,
    },

    /// The path names a modifier that is neither built in nor registered.
    #[error("unknown modifier @{0}")]
    UnknownModifier(String),

    /// The document is not JSON.
    #[error("invalid JSON document: {0}")]
    InvalidJson(String),
}

fn syntax(path: &str, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        path: path.to_string(),
        message: message.into(),
    }
}

// =============================================================================
// Extensions
// =============================================================================

/// A modifier: receives the current value and the optional `:arg` text.
pub type Modifier = Arc<dyn Fn(&Value, Option<&str>) -> Option<Value> + Send + Sync>;

/// Table of extension modifiers handed to [`JsonQuery`] at construction.
///
/// Built-in modifiers (`this`, `group`) always win over a registered
/// extension of the same name.
#[derive(Clone, Default)]
pub struct QueryExtensions {
    modifiers: HashMap<String, Modifier>,
}

impl QueryExtensions {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `modifier` under `name` (used as `@name`).
    #[must_use]
    pub fn with_modifier<F>(mut self, name: impl Into<String>, modifier: F) -> Self
    where
        F: Fn(&Value, Option<&str>) -> Option<Value> + Send + Sync + 'static,
    {
        self.modifiers.insert(name.into(), Arc::new(modifier));
        self
    }

    /// Extensions used by the sportsbook pipelines: `@objectify`.
    #[must_use]
    pub fn sportsbook() -> Self {
        Self::new().with_modifier("objectify", objectify)
    }

    fn get(&self, name: &str) -> Option<&Modifier> {
        self.modifiers.get(name)
    }
}

impl fmt::Debug for QueryExtensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.modifiers.keys().collect();
        names.sort();
        f.debug_struct("QueryExtensions")
            .field("modifiers", &names)
            .finish()
    }
}

/// `@objectify[:key]` turns an array of objects into an object.
///
/// Each element is keyed by the value at `key` (a dotted path), or by its
/// first value when no key is given. Numbers and booleans are stringified;
/// elements without a usable key are dropped.
#[must_use]
pub fn objectify(value: &Value, arg: Option<&str>) -> Option<Value> {
    let items = value.as_array()?;
    let mut out = Map::new();

    for item in items {
        let key = match arg {
            Some(path) => path
                .split('.')
                .try_fold(item, |current, key| current.get(key)),
            None => item.as_object().and_then(|obj| obj.values().next()),
        };
        let key = match key {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => continue,
        };
        out.insert(key, item.clone());
    }

    Some(Value::Object(out))
}

/// `@group` turns an object of arrays into an array of objects.
fn group(value: &Value) -> Option<Value> {
    let fields = value.as_object()?;
    let mut rows: Vec<Map<String, Value>> = Vec::new();

    for (key, column) in fields {
        let Some(column) = column.as_array() else {
            continue;
        };
        for (i, cell) in column.iter().enumerate() {
            if rows.len() <= i {
                rows.resize_with(i + 1, Map::new);
            }
            rows[i].insert(key.clone(), cell.clone());
        }
    }

    Some(Value::Array(rows.into_iter().map(Value::Object).collect()))
}

// =============================================================================
// Compiled Form
// =============================================================================

#[derive(Clone)]
enum ModifierKind {
    This,
    Group,
    Extension(Modifier),
}

#[derive(Clone)]
struct ModifierCall {
    name: String,
    arg: Option<String>,
    kind: ModifierKind,
}

impl ModifierCall {
    fn apply(&self, value: &Value) -> Option<Value> {
        match &self.kind {
            ModifierKind::This => Some(value.clone()),
            ModifierKind::Group => group(value),
            ModifierKind::Extension(f) => f(value, self.arg.as_deref()),
        }
    }
}

impl fmt::Debug for ModifierCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "@{}:{arg}", self.name),
            None => write!(f, "@{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    const ALL: [(&'static str, Self); 6] = [
        ("==", Self::Eq),
        ("!=", Self::Ne),
        ("<=", Self::Le),
        (">=", Self::Ge),
        ("<", Self::Lt),
        (">", Self::Gt),
    ];

    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

#[derive(Debug, Clone)]
struct Predicate {
    path: Option<CompiledPath>,
    test: Option<(Op, Value)>,
}

impl Predicate {
    fn matches(&self, item: &Value) -> bool {
        let left = match &self.path {
            Some(path) => path.select(item),
            None => Some(item.clone()),
        };
        let Some(left) = left else {
            return false;
        };

        let Some((op, right)) = &self.test else {
            return !matches!(left, Value::Null | Value::Bool(false));
        };

        let ordering = match (&left, right) {
            (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
                (Some(l), Some(r)) => l.partial_cmp(&r),
                _ => None,
            },
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            (Value::Bool(l), Value::Bool(r)) if matches!(op, Op::Eq | Op::Ne) => Some(l.cmp(r)),
            (Value::Null, Value::Null) if matches!(op, Op::Eq | Op::Ne) => {
                Some(std::cmp::Ordering::Equal)
            }
            _ => None,
        };

        ordering.map_or(*op == Op::Ne, |ordering| op.holds(ordering))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Hash,
    Filter { predicate: Box<Predicate>, all: bool },
    Modifier(ModifierCall),
}

/// A path compiled against a [`JsonQuery`]'s extension table.
#[derive(Debug, Clone)]
pub struct CompiledPath {
    source: String,
    pipes: Vec<Vec<Segment>>,
}

impl CompiledPath {
    /// Path text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against `value`; `None` when the path does not resolve.
    #[must_use]
    pub fn select(&self, value: &Value) -> Option<Value> {
        let mut pipes = self.pipes.iter();
        let first = pipes.next()?;
        let mut current = walk(value, first)?;
        for chain in pipes {
            current = walk(&current, chain)?;
        }
        Some(current)
    }
}

impl fmt::Display for CompiledPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn walk(value: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match segment {
        Segment::Key(key) => {
            let next = match value {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }?;
            walk(next, rest)
        }
        Segment::Hash => {
            let items = value.as_array()?;
            if rest.is_empty() {
                return Some(Value::from(items.len()));
            }
            Some(Value::Array(
                items.iter().filter_map(|item| walk(item, rest)).collect(),
            ))
        }
        Segment::Filter { predicate, all } => {
            let items = value.as_array()?;
            if *all {
                Some(Value::Array(
                    items
                        .iter()
                        .filter(|item| predicate.matches(item))
                        .filter_map(|item| walk(item, rest))
                        .collect(),
                ))
            } else {
                let hit = items.iter().find(|item| predicate.matches(item))?;
                walk(hit, rest)
            }
        }
        Segment::Modifier(call) => walk(&call.apply(value)?, rest),
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Remove whitespace outside double-quoted strings.
fn strip_whitespace(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in path.chars() {
        if in_quotes {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_quotes = false;
            }
        } else if ch == '"' {
            in_quotes = true;
            out.push(ch);
        } else if !ch.is_whitespace() {
            out.push(ch);
        }
    }
    out
}

/// Split on `sep` outside quotes, parentheses and escapes.
fn split_top(path: &str, text: &str, sep: char) -> Result<Vec<String>, QueryError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            current.push(ch);
            if let Some(next) = chars.next() {
                current.push(next);
            }
            continue;
        }
        if in_quotes {
            in_quotes = ch != '"';
            current.push(ch);
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| syntax(path, "unbalanced ')'"))?;
            }
            c if c == sep && depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    if in_quotes {
        return Err(syntax(path, "unterminated string"));
    }
    if depth != 0 {
        return Err(syntax(path, "unbalanced '('"));
    }
    parts.push(current);
    Ok(parts)
}

fn unescape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Find the first comparison operator outside quotes and parentheses.
fn find_operator(text: &str) -> Option<(usize, &'static str, Op)> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i += 2;
            continue;
        }
        if in_quotes {
            in_quotes = b != b'"';
        } else {
            match b {
                b'"' => in_quotes = true,
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b'=' | b'!' | b'<' | b'>' if depth == 0 => {
                    let rest = &text[i..];
                    if let Some((token, op)) =
                        Op::ALL.iter().find(|(token, _)| rest.starts_with(token))
                    {
                        return Some((i, *token, *op));
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn parse_literal(path: &str, text: &str) -> Result<Value, QueryError> {
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    if text.starts_with('"') {
        return serde_json::from_str::<String>(text)
            .map(Value::String)
            .map_err(|e| syntax(path, format!("bad string literal {text}: {e}")));
    }
    serde_json::from_str::<serde_json::Number>(text)
        .map(Value::Number)
        .map_err(|_| syntax(path, format!("expected a literal, found {text:?}")))
}

// =============================================================================
// Query Engine
// =============================================================================

/// Path compiler and evaluator bound to an extension table.
#[derive(Debug, Clone, Default)]
pub struct JsonQuery {
    extensions: QueryExtensions,
}

impl JsonQuery {
    /// Create an engine with the given extensions.
    #[must_use]
    pub const fn new(extensions: QueryExtensions) -> Self {
        Self { extensions }
    }

    /// Compile `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Syntax`] for malformed paths and
    /// [`QueryError::UnknownModifier`] for unresolvable modifiers.
    pub fn compile(&self, path: &str) -> Result<CompiledPath, QueryError> {
        let source = strip_whitespace(path);
        if source.is_empty() {
            return Err(syntax(path, "empty path"));
        }

        let pipes = split_top(path, &source, '|')?
            .iter()
            .map(|chain| self.compile_chain(path, chain))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledPath { source, pipes })
    }

    fn compile_chain(&self, path: &str, chain: &str) -> Result<Vec<Segment>, QueryError> {
        split_top(path, chain, '.')?
            .iter()
            .map(|segment| self.compile_segment(path, segment))
            .collect()
    }

    fn compile_segment(&self, path: &str, segment: &str) -> Result<Segment, QueryError> {
        if segment.is_empty() {
            return Err(syntax(path, "empty path component"));
        }
        if segment == "#" {
            return Ok(Segment::Hash);
        }
        if let Some(filter) = segment.strip_prefix("#(") {
            let (inner, all) = if let Some(inner) = filter.strip_suffix(")#") {
                (inner, true)
            } else if let Some(inner) = filter.strip_suffix(')') {
                (inner, false)
            } else {
                return Err(syntax(path, format!("malformed filter {segment:?}")));
            };
            return Ok(Segment::Filter {
                predicate: Box::new(self.compile_predicate(path, inner)?),
                all,
            });
        }
        if let Some(call) = segment.strip_prefix('@') {
            return self.compile_modifier(path, call).map(Segment::Modifier);
        }
        Ok(Segment::Key(unescape(segment)))
    }

    fn compile_predicate(&self, path: &str, inner: &str) -> Result<Predicate, QueryError> {
        let Some((at, token, op)) = find_operator(inner) else {
            if inner.is_empty() {
                return Err(syntax(path, "empty filter"));
            }
            return Ok(Predicate {
                path: Some(self.compile(inner)?),
                test: None,
            });
        };

        let left = &inner[..at];
        let literal = parse_literal(path, &inner[at + token.len()..])?;
        Ok(Predicate {
            path: if left.is_empty() {
                None
            } else {
                Some(self.compile(left)?)
            },
            test: Some((op, literal)),
        })
    }

    fn compile_modifier(&self, path: &str, call: &str) -> Result<ModifierCall, QueryError> {
        let (name, arg) = match call.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (call, None),
        };
        if name.is_empty() {
            return Err(syntax(path, "empty modifier name"));
        }
        let arg = match arg {
            Some(arg) if arg.starts_with('"') => Some(
                serde_json::from_str::<String>(arg)
                    .map_err(|e| syntax(path, format!("bad modifier argument {arg}: {e}")))?,
            ),
            Some(arg) => Some(unescape(arg)),
            None => None,
        };

        let kind = match name {
            "this" => ModifierKind::This,
            "group" => ModifierKind::Group,
            other => ModifierKind::Extension(Arc::clone(
                self.extensions
                    .get(other)
                    .ok_or_else(|| QueryError::UnknownModifier(other.to_string()))?,
            )),
        };

        Ok(ModifierCall {
            name: name.to_string(),
            arg,
            kind,
        })
    }

    /// Evaluate a compiled path against a parsed value.
    #[must_use]
    pub fn select(&self, value: &Value, path: &CompiledPath) -> Option<Value> {
        path.select(value)
    }

    /// Parse `body` and evaluate `path` against it.
    ///
    /// An array result yields its elements, a scalar or object yields itself,
    /// and a missing result yields nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` is not JSON or `path` does not compile.
    pub fn evaluate(&self, body: &[u8], path: &str) -> Result<Vec<Value>, QueryError> {
        let compiled = self.compile(path)?;
        let value: Value =
            serde_json::from_slice(body).map_err(|e| QueryError::InvalidJson(e.to_string()))?;
        Ok(into_items(compiled.select(&value)))
    }
}

fn into_items(result: Option<Value>) -> Vec<Value> {
    match result {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(value) => vec![value],
    }
}

// =============================================================================
// Stage Extractor
// =============================================================================

/// Crawl-stage extractor backed by a compiled path.
#[derive(Debug, Clone)]
pub struct PathExtractor {
    path: CompiledPath,
}

impl PathExtractor {
    /// Compile `path` with `query`'s extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not compile.
    pub fn new(query: &JsonQuery, path: &str) -> Result<Self, QueryError> {
        Ok(Self {
            path: query.compile(path)?,
        })
    }

    /// Compiled path.
    #[must_use]
    pub const fn path(&self) -> &CompiledPath {
        &self.path
    }
}

impl Extract for PathExtractor {
    fn extract(&self, body: &[u8]) -> Result<Vec<Item>, StageError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| StageError::Extract(QueryError::InvalidJson(e.to_string()).to_string()))?;
        Ok(into_items(self.path.select(&value)))
    }
}
