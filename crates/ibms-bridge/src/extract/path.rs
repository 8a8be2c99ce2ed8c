//! Compiled JSON path expressions
//!
//! Supported syntax:
//! - `$` root (optional: `current.temp` reads as `$.current.temp`)
//! - `.name`, `['name']`, `["name"]`
//! - `[2]`, `[-1]` array indices
//! - `.*`, `[*]` wildcards
//! - `..name` recursive descent
//! - `[?(@.path)]` existence filter, `[?(@.path OP literal)]` comparison filter
//!   with OP one of `== != < <= > >=`

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

/// Error compiling a path expression
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (at offset {position})")]
pub struct PathError {
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    /// Visit the node and all its descendants, depth-first
    Descend,
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Child(String),
    Index(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    target: Vec<Step>,
    comparison: Option<(CompareOp, Value)>,
}

/// A compiled path. Compile once at load time, evaluate every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    source: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn compile(source: &str) -> Result<Self, PathError> {
        let segments = Parser::new(source).parse()?;
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First match in depth-first document order
    pub fn first_match<'v>(&self, document: &'v Value) -> Option<&'v Value> {
        find(document, &self.segments)
    }

    /// Every match in document order
    pub fn all_matches<'v>(&self, document: &'v Value) -> Vec<&'v Value> {
        let mut out = Vec::new();
        collect(document, &self.segments, &mut out);
        out
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluation
// ─────────────────────────────────────────────────────────────────────────────

fn children(node: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match node {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => Box::new(std::iter::empty()),
    }
}

fn index_into(items: &[Value], index: i64) -> Option<&Value> {
    let resolved = if index < 0 {
        items.len().checked_sub(index.unsigned_abs() as usize)?
    } else {
        index as usize
    };
    items.get(resolved)
}

fn find<'v>(node: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(node);
    };

    match segment {
        Segment::Child(name) => find(node.as_object()?.get(name)?, rest),
        Segment::Index(index) => find(index_into(node.as_array()?, *index)?, rest),
        Segment::Wildcard => children(node).find_map(|child| find(child, rest)),
        Segment::Descend => descend_find(node, rest),
        Segment::Filter(filter) => children(node)
            .filter(|child| filter.accepts(child))
            .find_map(|child| find(child, rest)),
    }
}

fn descend_find<'v>(node: &'v Value, rest: &[Segment]) -> Option<&'v Value> {
    find(node, rest).or_else(|| children(node).find_map(|child| descend_find(child, rest)))
}

fn collect<'v>(node: &'v Value, segments: &[Segment], out: &mut Vec<&'v Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(node);
        return;
    };

    match segment {
        Segment::Child(name) => {
            if let Some(child) = node.as_object().and_then(|m| m.get(name)) {
                collect(child, rest, out);
            }
        }
        Segment::Index(index) => {
            if let Some(child) = node.as_array().and_then(|a| index_into(a, *index)) {
                collect(child, rest, out);
            }
        }
        Segment::Wildcard => children(node).for_each(|child| collect(child, rest, out)),
        Segment::Descend => {
            collect(node, rest, out);
            children(node).for_each(|child| collect(child, segments, out));
        }
        Segment::Filter(filter) => children(node)
            .filter(|child| filter.accepts(child))
            .for_each(|child| collect(child, rest, out)),
    }
}

impl Filter {
    fn accepts(&self, candidate: &Value) -> bool {
        let mut current = candidate;
        for step in &self.target {
            let next = match step {
                Step::Child(name) => current.as_object().and_then(|m| m.get(name)),
                Step::Index(index) => current.as_array().and_then(|a| index_into(a, *index)),
            };
            match next {
                Some(value) => current = value,
                None => return false,
            }
        }

        match &self.comparison {
            None => true,
            Some((op, literal)) => compare(current, *op, literal),
        }
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match op {
        CompareOp::Eq => ordering.map_or(left == right, |o| o == Ordering::Equal),
        CompareOp::Ne => ordering.map_or(left != right, |o| o != Ordering::Equal),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '.' | '[' | ']' | '(' | ')' | '\'' | '"' | '=' | '!' | '<' | '>' | '*' | '$' | '@' | '?')
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, PathError> {
        Err(PathError {
            position: self.pos,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), PathError> {
        if self.eat(expected) {
            Ok(())
        } else {
            match self.peek() {
                Some(found) => self.error(format!("expected '{}', found '{}'", expected, found)),
                None => self.error(format!("expected '{}', found end of path", expected)),
            }
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>, PathError> {
        if self.chars.is_empty() {
            return self.error("empty path");
        }

        let mut segments = Vec::new();

        if !self.eat('$') && self.peek().is_some_and(is_name_char) {
            // Bare dot notation: the first segment is a member name
            segments.push(Segment::Child(self.parse_name()?));
        }

        while let Some(c) = self.peek() {
            match c {
                '.' if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    segments.push(Segment::Descend);
                    match self.peek() {
                        Some('[') => {}
                        Some('*') => {
                            self.pos += 1;
                            segments.push(Segment::Wildcard);
                        }
                        Some(c) if is_name_char(c) => segments.push(Segment::Child(self.parse_name()?)),
                        _ => return self.error("expected member name after '..'"),
                    }
                }
                '.' => {
                    self.pos += 1;
                    match self.peek() {
                        Some('*') => {
                            self.pos += 1;
                            segments.push(Segment::Wildcard);
                        }
                        Some(c) if is_name_char(c) => segments.push(Segment::Child(self.parse_name()?)),
                        _ => return self.error("expected member name after '.'"),
                    }
                }
                '[' => {
                    self.pos += 1;
                    let segment = self.parse_bracket()?;
                    segments.push(segment);
                }
                other => return self.error(format!("unexpected character '{}'", other)),
            }
        }

        if segments.last() == Some(&Segment::Descend) {
            return self.error("recursive descent must be followed by a selector");
        }

        Ok(segments)
    }

    fn parse_name(&mut self) -> Result<String, PathError> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return self.error("expected member name");
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// Called after the opening `[`
    fn parse_bracket(&mut self) -> Result<Segment, PathError> {
        self.skip_ws();
        let segment = match self.peek() {
            Some('\'') | Some('"') => Segment::Child(self.parse_quoted()?),
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some('?') => {
                self.pos += 1;
                self.skip_ws();
                self.expect('(')?;
                let filter = self.parse_filter()?;
                self.skip_ws();
                self.expect(')')?;
                Segment::Filter(filter)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => Segment::Index(self.parse_index()?),
            Some(c) => return self.error(format!("unexpected '{}' in brackets", c)),
            None => return self.error("unterminated '['"),
        };
        self.skip_ws();
        self.expect(']')?;
        Ok(segment)
    }

    fn parse_index(&mut self) -> Result<i64, PathError> {
        let start = self.pos;
        self.eat('-');
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        match text.parse() {
            Ok(index) => Ok(index),
            Err(_) => self.error(format!("invalid array index '{}'", text)),
        }
    }

    fn parse_quoted(&mut self) -> Result<String, PathError> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return self.error("expected quoted string"),
        };
        self.pos += 1;

        let mut out = String::new();
        loop {
            match self.peek() {
                None => return self.error("unterminated string"),
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(escaped) => out.push(escaped),
                        None => return self.error("unterminated escape"),
                    }
                    self.pos += 1;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    /// Parses `@...` up to (not including) the closing `)`
    fn parse_filter(&mut self) -> Result<Filter, PathError> {
        self.skip_ws();
        self.expect('@')?;

        let mut target = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    target.push(Step::Child(self.parse_name()?));
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    let step = match self.peek() {
                        Some('\'') | Some('"') => Step::Child(self.parse_quoted()?),
                        Some(c) if c == '-' || c.is_ascii_digit() => Step::Index(self.parse_index()?),
                        _ => return self.error("expected name or index in filter"),
                    };
                    self.skip_ws();
                    self.expect(']')?;
                    target.push(step);
                }
                _ => break,
            }
        }

        self.skip_ws();
        if self.peek() == Some(')') {
            return Ok(Filter {
                target,
                comparison: None,
            });
        }

        let op = self.parse_operator()?;
        self.skip_ws();
        let literal = self.parse_literal()?;

        Ok(Filter {
            target,
            comparison: Some((op, literal)),
        })
    }

    fn parse_operator(&mut self) -> Result<CompareOp, PathError> {
        let op = match (self.peek(), self.peek_at(1)) {
            (Some('='), Some('=')) => CompareOp::Eq,
            (Some('!'), Some('=')) => CompareOp::Ne,
            (Some('<'), Some('=')) => CompareOp::Le,
            (Some('>'), Some('=')) => CompareOp::Ge,
            (Some('<'), _) => {
                self.pos += 1;
                return Ok(CompareOp::Lt);
            }
            (Some('>'), _) => {
                self.pos += 1;
                return Ok(CompareOp::Gt);
            }
            _ => return self.error("expected comparison operator"),
        };
        self.pos += 2;
        Ok(op)
    }

    fn parse_literal(&mut self) -> Result<Value, PathError> {
        match self.peek() {
            Some('\'') | Some('"') => Ok(Value::String(self.parse_quoted()?)),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
                {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                match serde_json::from_str::<serde_json::Number>(&text) {
                    Ok(number) => Ok(Value::Number(number)),
                    Err(_) => self.error(format!("invalid number '{}'", text)),
                }
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
                    self.pos += 1;
                }
                let word: String = self.chars[start..self.pos].iter().collect();
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => self.error(format!("unknown literal '{}'", word)),
                }
            }
            _ => self.error("expected literal"),
        }
    }
}
