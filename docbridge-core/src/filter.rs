//! Compilation of client filters into [`Criteria`] trees.
//!
//! Clients express filters in one of two interchangeable forms:
//!
//! - **Filter text**, an SQL-ish grammar: `name = 'John' and age >= 21`,
//!   `status in (active, pending)`, `title like 'Dr%'`, with `and`/`or`/`nor`
//!   connectives, a prefix `not`, and parenthesized grouping. `or` binds
//!   loosest, then `nor`, then `and`, matching the protocol's documented
//!   evaluation order.
//! - **Structured filter JSON**: `{"age": {"$gte": 21}}`, with `$and`/`$or`/
//!   `$nor` lists, a `$not` node, per-field operator objects, and bare
//!   key/value pairs read as equality.
//!
//! Both forms compile to the same [`Criteria`] tree. Literals in filter text
//! are typed by shape: quoted strings stay strings, integers that round-trip
//! become integers, other numerics become doubles, `true`/`false`/`null` map
//! to their native forms, and values of the reserved identifier field always
//! pass through [`IdentifierNormalizer`] whatever they look like. Named
//! placeholders (`:name`) are substituted from the request's parameter map
//! before typing.
//!
//! Server-side policy fragments compile through the same text grammar and are
//! attached to the client's criteria so that every store call sees them; see
//! [`FilterCompiler::compile_request`].

use std::collections::HashMap;

use bson::Bson;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ID_FIELD;
use crate::criteria::{CompareOp, Criteria, LogicalOp};
use crate::error::{RecordError, RecordResult};
use crate::ident::IdentifierNormalizer;
use crate::value::ValueCodec;

/// Named parameter values for `:placeholder` substitution in filter text.
/// Keys carry the leading colon, as sent on the wire.
pub type ParamMap = HashMap<String, JsonValue>;

/// A client filter as it arrives at the request boundary: either filter text
/// or structured filter JSON.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FilterInput {
    /// The textual grammar.
    Text(String),
    /// The structured JSON form.
    Structured(JsonValue),
}

/// Server-side filter fragments attached to every request against a table.
///
/// Fragments are filter-text expressions. They combine with each other under
/// `combiner` and the combined node is then ANDed with whatever the client
/// asked for, so policy can restrict but never widen a result set.
#[derive(Debug, Clone)]
pub struct PolicyFilter {
    /// Filter-text fragments, each a complete expression.
    pub fragments: Vec<String>,
    /// Connective joining the fragments with each other.
    pub combiner: LogicalOp,
}

impl PolicyFilter {
    /// A policy whose fragments must all hold.
    pub fn all_of(fragments: Vec<String>) -> Self {
        PolicyFilter {
            fragments,
            combiner: LogicalOp::And,
        }
    }
}

/// Compiles client filters and policy fragments into [`Criteria`] trees.
pub struct FilterCompiler;

impl FilterCompiler {
    /// Compiles a single filter input, either form.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Validation`] for syntax errors, unsupported
    /// operators, and unbound `:parameters`.
    pub fn compile(input: &FilterInput, params: &ParamMap) -> RecordResult<Criteria> {
        match input {
            FilterInput::Text(text) => Self::compile_text(text, params),
            FilterInput::Structured(value) => Self::compile_structured(value),
        }
    }

    /// Compiles filter text.
    pub fn compile_text(text: &str, params: &ParamMap) -> RecordResult<Criteria> {
        let tokens = lex(text)?;
        if tokens.is_empty() {
            return Err(RecordError::Validation(
                "empty filter expression".to_string(),
            ));
        }
        Parser::new(tokens, params).parse()
    }

    /// Compiles structured filter JSON.
    pub fn compile_structured(value: &JsonValue) -> RecordResult<Criteria> {
        let map = value.as_object().ok_or_else(|| {
            RecordError::Validation("structured filter must be a JSON object".to_string())
        })?;
        if map.is_empty() {
            return Err(RecordError::Validation(
                "empty structured filter".to_string(),
            ));
        }
        structured_node(map)
    }

    /// Compiles the full criteria for a request: the client's filter (if any)
    /// plus the table's policy fragments (if any), ANDed together.
    ///
    /// An absent, empty, or all-blank filter contributes nothing; `Ok(None)`
    /// means the request is unconstrained.
    pub fn compile_request(
        filter: Option<&FilterInput>,
        params: &ParamMap,
        policy: Option<&PolicyFilter>,
    ) -> RecordResult<Option<Criteria>> {
        let mut parts = Vec::new();
        if let Some(input) = filter {
            let blank = match input {
                FilterInput::Text(text) => text.trim().is_empty(),
                FilterInput::Structured(value) => {
                    value.as_object().is_some_and(|map| map.is_empty())
                }
            };
            if !blank {
                parts.push(Self::compile(input, params)?);
            }
        }
        if let Some(policy) = policy {
            let mut fragments = Vec::new();
            for fragment in &policy.fragments {
                if fragment.trim().is_empty() {
                    continue;
                }
                fragments.push(Self::compile_text(fragment, params)?);
            }
            if let Some(joined) = Criteria::join(policy.combiner, fragments) {
                parts.push(joined);
            }
        }
        Ok(Criteria::join(LogicalOp::And, parts))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Unquoted run of text: field names, word operators, bare literals,
    /// `:parameters`, `%`-patterns.
    Word(String),
    /// Quoted literal, quotes stripped.
    Quoted(String),
    /// Symbolic comparison operator.
    Op(CompareOp),
    LParen,
    RParen,
    Comma,
}

/// Characters that end a word token.
const WORD_BREAKS: &[char] = &['(', ')', ',', '!', '<', '>', '=', '\'', '"'];

fn lex(text: &str) -> RecordResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            _ if c.is_whitespace() => {
                chars.next();
            }
            '\'' | '"' => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == c {
                        closed = true;
                        break;
                    }
                    literal.push(inner);
                }
                if !closed {
                    return Err(RecordError::Validation(
                        "unterminated quoted string in filter".to_string(),
                    ));
                }
                tokens.push(Token::Quoted(literal));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '!' => {
                chars.next();
                match chars.next_if_eq(&'=') {
                    Some(_) => tokens.push(Token::Op(CompareOp::Ne)),
                    None => {
                        return Err(RecordError::Validation(
                            "stray '!' in filter; expected '!='".to_string(),
                        ));
                    }
                }
            }
            '>' => {
                chars.next();
                let op = match chars.next_if_eq(&'=') {
                    Some(_) => CompareOp::Gte,
                    None => CompareOp::Gt,
                };
                tokens.push(Token::Op(op));
            }
            '<' => {
                chars.next();
                let op = match chars.next_if_eq(&'=') {
                    Some(_) => CompareOp::Lte,
                    None => CompareOp::Lt,
                };
                tokens.push(Token::Op(op));
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op(CompareOp::Eq));
            }
            _ => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if w.is_whitespace() || WORD_BREAKS.contains(&w) {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    params: &'a ParamMap,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, params: &'a ParamMap) -> Self {
        Parser {
            tokens,
            pos: 0,
            params,
        }
    }

    fn parse(mut self) -> RecordResult<Criteria> {
        let criteria = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(RecordError::Validation(format!(
                "unexpected trailing {} in filter",
                describe(token)
            )));
        }
        Ok(criteria)
    }

    // or binds loosest, then nor, then and.
    fn parse_or(&mut self) -> RecordResult<Criteria> {
        let mut parts = vec![self.parse_nor()?];
        while self.eat_keyword("or") {
            parts.push(self.parse_nor()?);
        }
        Ok(collapse(LogicalOp::Or, parts))
    }

    fn parse_nor(&mut self) -> RecordResult<Criteria> {
        let mut parts = vec![self.parse_and()?];
        while self.eat_keyword("nor") {
            parts.push(self.parse_and()?);
        }
        Ok(collapse(LogicalOp::Nor, parts))
    }

    fn parse_and(&mut self) -> RecordResult<Criteria> {
        let mut parts = vec![self.parse_unary()?];
        while self.eat_keyword("and") {
            parts.push(self.parse_unary()?);
        }
        Ok(collapse(LogicalOp::And, parts))
    }

    fn parse_unary(&mut self) -> RecordResult<Criteria> {
        if self.eat_keyword("not") {
            return Ok(self.parse_unary()?.not());
        }
        if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            self.expect(&Token::RParen, "expected ')' to close group")?;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> RecordResult<Criteria> {
        let field = match self.advance() {
            Some(Token::Word(w)) => w,
            Some(token) => {
                return Err(RecordError::Validation(format!(
                    "expected a field name, found {}",
                    describe(&token)
                )));
            }
            None => {
                return Err(RecordError::Validation(
                    "expected a field name at end of filter".to_string(),
                ));
            }
        };
        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            Some(Token::Word(w)) => match w.to_ascii_lowercase().as_str() {
                "eq" => CompareOp::Eq,
                "ne" => CompareOp::Ne,
                "gt" => CompareOp::Gt,
                "gte" => CompareOp::Gte,
                "lt" => CompareOp::Lt,
                "lte" => CompareOp::Lte,
                "in" => return self.parse_listing(field, CompareOp::In),
                "nin" => return self.parse_listing(field, CompareOp::Nin),
                "all" => return self.parse_listing(field, CompareOp::All),
                "like" => return self.parse_like(field),
                _ => {
                    return Err(RecordError::Validation(format!(
                        "unsupported filter operator '{w}'"
                    )));
                }
            },
            Some(token) => {
                return Err(RecordError::Validation(format!(
                    "expected an operator after '{field}', found {}",
                    describe(&token)
                )));
            }
            None => {
                return Err(RecordError::Validation(format!(
                    "missing operator after '{field}'"
                )));
            }
        };
        let value = self.parse_scalar(&field)?;
        Ok(Criteria::compare(field, op, value))
    }

    /// Parses the parenthesized value list of `in`, `nin`, and `all`.
    fn parse_listing(&mut self, field: String, op: CompareOp) -> RecordResult<Criteria> {
        self.expect(&Token::LParen, "expected '(' to open a value list")?;
        let mut values = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(Criteria::compare(field, op, Bson::Array(values)));
        }
        loop {
            values.push(self.parse_list_item(&field)?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "expected ')' to close a value list")?;
            break;
        }
        Ok(Criteria::compare(field, op, Bson::Array(values)))
    }

    /// Parses a `like` pattern and lowers its wildcards onto the matching
    /// string operator: `%x%` contains, `x%` starts-with, `%x` ends-with,
    /// no wildcard is plain equality.
    fn parse_like(&mut self, field: String) -> RecordResult<Criteria> {
        let pattern = match self.advance() {
            Some(Token::Quoted(q)) => q,
            Some(Token::Word(w)) => self.substitute_text(w)?,
            Some(token) => {
                return Err(RecordError::Validation(format!(
                    "expected a pattern after 'like', found {}",
                    describe(&token)
                )));
            }
            None => {
                return Err(RecordError::Validation(format!(
                    "missing pattern after '{field} like'"
                )));
            }
        };
        let leading = pattern.starts_with('%');
        let trailing = pattern.len() > leading as usize && pattern.ends_with('%');
        let criteria = match (leading, trailing) {
            (true, true) => Criteria::contains(field, &pattern[1..pattern.len() - 1]),
            (false, true) => Criteria::starts_with(field, &pattern[..pattern.len() - 1]),
            (true, false) => Criteria::ends_with(field, &pattern[1..]),
            (false, false) => Criteria::eq(field, Bson::String(pattern)),
        };
        Ok(criteria)
    }

    /// Parses one comparison value. Unquoted multi-word values run until the
    /// next connective, closing parenthesis, or end of input.
    fn parse_scalar(&mut self, field: &str) -> RecordResult<Bson> {
        match self.advance() {
            Some(Token::Quoted(q)) => Ok(typed_literal(field, &q, true)),
            Some(Token::Word(w)) => {
                if let Some(value) = self.substitute_param(field, &w)? {
                    return Ok(value);
                }
                let mut text = w;
                loop {
                    let Some(Token::Word(next)) = self.peek() else {
                        break;
                    };
                    if is_connective(next) {
                        break;
                    }
                    let next = next.clone();
                    self.pos += 1;
                    text.push(' ');
                    text.push_str(&next);
                }
                Ok(typed_literal(field, &text, false))
            }
            Some(token) => Err(RecordError::Validation(format!(
                "expected a value for '{field}', found {}",
                describe(&token)
            ))),
            None => Err(RecordError::Validation(format!(
                "missing value for '{field}'"
            ))),
        }
    }

    /// Parses one element of a value list: a single quoted, word, or
    /// parameter token.
    fn parse_list_item(&mut self, field: &str) -> RecordResult<Bson> {
        match self.advance() {
            Some(Token::Quoted(q)) => Ok(typed_literal(field, &q, true)),
            Some(Token::Word(w)) => {
                if let Some(value) = self.substitute_param(field, &w)? {
                    return Ok(value);
                }
                Ok(typed_literal(field, &w, false))
            }
            Some(token) => Err(RecordError::Validation(format!(
                "expected a list value for '{field}', found {}",
                describe(&token)
            ))),
            None => Err(RecordError::Validation(format!(
                "unterminated value list for '{field}'"
            ))),
        }
    }

    /// Resolves `:name` placeholders. Returns `Ok(None)` when the token is
    /// not a placeholder; unbound placeholders are validation errors.
    fn substitute_param(&self, field: &str, word: &str) -> RecordResult<Option<Bson>> {
        if !word.starts_with(':') || word.len() == 1 {
            return Ok(None);
        }
        let value = self.params.get(word).ok_or_else(|| {
            RecordError::Validation(format!("unbound filter parameter '{word}'"))
        })?;
        let native = match value {
            JsonValue::String(s) if field == ID_FIELD => IdentifierNormalizer::to_native(s),
            JsonValue::String(s) => Bson::String(s.clone()),
            other => ValueCodec::to_native(other, field)?,
        };
        Ok(Some(native))
    }

    /// Like [`substitute_param`](Self::substitute_param), but for positions
    /// that need raw text (a `like` pattern).
    fn substitute_text(&self, word: String) -> RecordResult<String> {
        if !word.starts_with(':') || word.len() == 1 {
            return Ok(word);
        }
        let value = self.params.get(&word).ok_or_else(|| {
            RecordError::Validation(format!("unbound filter parameter '{word}'"))
        })?;
        match value {
            JsonValue::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Word(w)) = self.peek() {
            if w.eq_ignore_ascii_case(keyword) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect(&mut self, token: &Token, message: &str) -> RecordResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(RecordError::Validation(message.to_string()))
        }
    }
}

fn collapse(op: LogicalOp, mut parts: Vec<Criteria>) -> Criteria {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Criteria::Logical { op, children: parts }
    }
}

fn is_connective(word: &str) -> bool {
    ["and", "or", "nor"]
        .iter()
        .any(|kw| word.eq_ignore_ascii_case(kw))
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("'{w}'"),
        Token::Quoted(q) => format!("'{q}'"),
        Token::Op(op) => format!("operator {op:?}"),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Comma => "','".to_string(),
    }
}

/// Types a textual literal by shape.
///
/// Values of the reserved identifier field always go through the normalizer,
/// quoted or not. Otherwise quoted literals stay strings; bare literals are
/// read as booleans, null, integers (when the digits round-trip exactly),
/// then doubles, and fall back to strings.
fn typed_literal(field: &str, raw: &str, quoted: bool) -> Bson {
    if field == ID_FIELD {
        return IdentifierNormalizer::to_native(raw);
    }
    if quoted {
        return Bson::String(raw.to_string());
    }
    if raw.eq_ignore_ascii_case("true") {
        return Bson::Boolean(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Bson::Boolean(false);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Bson::Null;
    }
    if let Ok(int) = raw.parse::<i64>() {
        if int.to_string() == raw {
            return Bson::Int64(int);
        }
    }
    if looks_numeric(raw) {
        if let Ok(float) = raw.parse::<f64>() {
            if float.is_finite() {
                return Bson::Double(float);
            }
        }
    }
    Bson::String(raw.to_string())
}

/// Guards the double fallback so words like `inf` stay strings even though
/// `f64::from_str` accepts them.
fn looks_numeric(raw: &str) -> bool {
    let mut chars = raw.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_digit() || first == '-' || first == '+' || first == '.') {
        return false;
    }
    raw.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
}

fn structured_node(map: &serde_json::Map<String, JsonValue>) -> RecordResult<Criteria> {
    let mut parts = Vec::new();
    for (key, value) in map {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let op = match key.as_str() {
                    "$and" => LogicalOp::And,
                    "$or" => LogicalOp::Or,
                    _ => LogicalOp::Nor,
                };
                let items = value.as_array().ok_or_else(|| {
                    RecordError::Validation(format!("'{key}' must hold a JSON array"))
                })?;
                if items.is_empty() {
                    return Err(RecordError::Validation(format!(
                        "'{key}' must not be empty"
                    )));
                }
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    let object = item.as_object().ok_or_else(|| {
                        RecordError::Validation(format!(
                            "each element of '{key}' must be a JSON object"
                        ))
                    })?;
                    children.push(structured_node(object)?);
                }
                parts.push(collapse(op, children));
            }
            "$not" => {
                let object = value.as_object().ok_or_else(|| {
                    RecordError::Validation("'$not' must hold a JSON object".to_string())
                })?;
                parts.push(structured_node(object)?.not());
            }
            _ if key.starts_with('$') => {
                return Err(RecordError::Validation(format!(
                    "unsupported filter operator '{key}'"
                )));
            }
            field => parts.push(structured_field(field, value)?),
        }
    }
    Criteria::join(LogicalOp::And, parts)
        .ok_or_else(|| RecordError::Validation("empty structured filter".to_string()))
}

/// Reads one field entry of a structured filter: either an operator object
/// (`{"$gte": 21}`) or a bare value read as equality.
fn structured_field(field: &str, value: &JsonValue) -> RecordResult<Criteria> {
    let Some(map) = value.as_object() else {
        return Ok(Criteria::compare(
            field,
            CompareOp::Eq,
            structured_value(field, value)?,
        ));
    };
    // A lone `$date`/`$id` tag is a literal value, not an operator object.
    let tagged = map.len() == 1
        && (map.contains_key(crate::value::DATE_TAG) || map.contains_key(crate::value::ID_TAG));
    let has_ops = !tagged && map.keys().any(|k| k.starts_with('$'));
    if !has_ops {
        return Ok(Criteria::compare(
            field,
            CompareOp::Eq,
            structured_value(field, value)?,
        ));
    }
    let mut parts = Vec::new();
    for (key, operand) in map {
        let op = match key.as_str() {
            "$eq" => CompareOp::Eq,
            "$ne" => CompareOp::Ne,
            "$gt" => CompareOp::Gt,
            "$gte" => CompareOp::Gte,
            "$lt" => CompareOp::Lt,
            "$lte" => CompareOp::Lte,
            "$in" | "$nin" | "$all" => {
                let items = operand.as_array().ok_or_else(|| {
                    RecordError::Validation(format!(
                        "'{key}' on field '{field}' must hold a JSON array"
                    ))
                })?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(structured_value(field, item)?);
                }
                let op = match key.as_str() {
                    "$in" => CompareOp::In,
                    "$nin" => CompareOp::Nin,
                    _ => CompareOp::All,
                };
                parts.push(Criteria::compare(field, op, Bson::Array(values)));
                continue;
            }
            _ => {
                return Err(RecordError::Validation(format!(
                    "unsupported filter operator '{key}' on field '{field}'"
                )));
            }
        };
        parts.push(Criteria::compare(field, op, structured_value(field, operand)?));
    }
    Criteria::join(LogicalOp::And, parts).ok_or_else(|| {
        RecordError::Validation(format!("empty operator object on field '{field}'"))
    })
}

fn structured_value(field: &str, value: &JsonValue) -> RecordResult<Bson> {
    match value {
        JsonValue::String(s) if field == ID_FIELD => Ok(IdentifierNormalizer::to_native(s)),
        other => ValueCodec::to_native(other, field),
    }
}
