//! Parameter schemas and argument validation.
//!
//! Each operation declares an ordered list of [`Param`]s. Validation is a
//! pure function of that list and the caller's JSON arguments: it either
//! yields [`ValidatedArgs`] with every value coerced to its declared kind and
//! defaults filled in, or every [`FieldViolation`] it found.

use std::collections::HashMap;
use std::fmt;

use cordproto::Snowflake;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::OpError;

/// What a parameter accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    /// A Discord id: a decimal string or a non-negative integer.
    Snowflake,
    Text { max_len: Option<usize> },
    /// Integers; integral floats and numeric strings are accepted.
    Integer { min: i64, max: i64 },
    Bool,
    /// One of a fixed set of strings, matched case-insensitively.
    Choice(&'static [&'static str]),
    IntChoice(&'static [i64]),
    /// A non-empty list of non-empty strings.
    TextList { max_items: usize },
    /// Any JSON object, passed through (embeds).
    Object,
    /// `#RRGGBB`, `RRGGBB`, or an integer up to 0xFFFFFF.
    Color,
}

impl ParamKind {
    pub const fn text() -> Self {
        ParamKind::Text { max_len: None }
    }

    pub const fn text_max(max_len: usize) -> Self {
        ParamKind::Text {
            max_len: Some(max_len),
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParamKind::Snowflake => json!({ "type": "string", "pattern": "^[0-9]+$" }),
            ParamKind::Text { max_len: Some(max) } => json!({ "type": "string", "maxLength": max }),
            ParamKind::Text { max_len: None } => json!({ "type": "string" }),
            ParamKind::Integer { min, max } => {
                json!({ "type": "integer", "minimum": min, "maximum": max })
            }
            ParamKind::Bool => json!({ "type": "boolean" }),
            ParamKind::Choice(choices) => json!({ "type": "string", "enum": choices }),
            ParamKind::IntChoice(choices) => json!({ "type": "integer", "enum": choices }),
            ParamKind::TextList { max_items } => json!({
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": max_items,
            }),
            ParamKind::Object => json!({ "type": "object" }),
            ParamKind::Color => json!({ "type": "string", "pattern": "^#?[0-9A-Fa-f]{6}$" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl Param {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description,
        }
    }

    /// Value used when the caller leaves this parameter out.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = self.kind.json_schema();
        if let Value::Object(map) = &mut schema {
            map.insert("description".into(), Value::from(self.description));
            if let Some(default) = &self.default {
                map.insert("default".into(), default.clone());
            }
        }
        schema
    }
}

/// JSON Schema for an operation's arguments.
pub fn input_schema(params: &[Param]) -> Value {
    let mut properties = Map::new();
    for param in params {
        properties.insert(param.name.to_string(), param.json_schema());
    }
    let required: Vec<&str> = params.iter().filter(|p| p.required).map(|p| p.name).collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// One problem with one argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub problem: String,
}

impl FieldViolation {
    pub fn new(field: &str, problem: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            problem: problem.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.problem)
        } else {
            write!(f, "{}: {}", self.field, self.problem)
        }
    }
}

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Snowflake(Snowflake),
    Text(String),
    Integer(i64),
    Bool(bool),
    TextList(Vec<String>),
    Object(Map<String, Value>),
    Color(u32),
}

/// Arguments that passed validation, keyed by parameter name.
///
/// Required parameters are always present, so the `require_*` accessors
/// only fail if a handler asks for a parameter its schema does not declare.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: HashMap<&'static str, Arg>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn snowflake(&self, name: &str) -> Option<Snowflake> {
        match self.get(name) {
            Some(Arg::Snowflake(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Arg::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Arg::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(Arg::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        match self.get(name) {
            Some(Arg::TextList(items)) => Some(items),
            _ => None,
        }
    }

    pub fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        match self.get(name) {
            Some(Arg::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn color(&self, name: &str) -> Option<u32> {
        match self.get(name) {
            Some(Arg::Color(c)) => Some(*c),
            _ => None,
        }
    }

    pub fn require_snowflake(&self, name: &str) -> Result<Snowflake, OpError> {
        self.snowflake(name).ok_or_else(|| undeclared(name))
    }

    pub fn require_text(&self, name: &str) -> Result<&str, OpError> {
        self.text(name).ok_or_else(|| undeclared(name))
    }

    pub fn require_integer(&self, name: &str) -> Result<i64, OpError> {
        self.integer(name).ok_or_else(|| undeclared(name))
    }

    pub fn require_list(&self, name: &str) -> Result<&[String], OpError> {
        self.list(name).ok_or_else(|| undeclared(name))
    }
}

fn undeclared(name: &str) -> OpError {
    OpError::internal(format!("argument '{name}' missing after validation"))
}

/// Check `args` against `params`, reporting every violation.
pub fn validate(params: &[Param], args: &Value) -> Result<ValidatedArgs, Vec<FieldViolation>> {
    let empty = Map::new();
    let object = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(vec![FieldViolation::new(
                "",
                format!("arguments must be an object, got {}", type_name(other)),
            )])
        }
    };

    let mut violations = Vec::new();

    for key in object.keys() {
        if !params.iter().any(|p| p.name == key) {
            violations.push(FieldViolation::new(key, "unknown parameter"));
        }
    }

    let mut values = HashMap::with_capacity(params.len());
    for param in params {
        let supplied = object.get(param.name).filter(|v| !v.is_null());
        let raw = match (supplied, &param.default) {
            (Some(v), _) => v,
            (None, Some(default)) => default,
            (None, None) if param.required => {
                violations.push(FieldViolation::new(param.name, "missing required parameter"));
                continue;
            }
            (None, None) => continue,
        };

        match coerce(&param.kind, raw) {
            Ok(Arg::Text(s)) if param.required && s.trim().is_empty() => {
                violations.push(FieldViolation::new(param.name, "must not be empty"));
            }
            Ok(arg) => {
                values.insert(param.name, arg);
            }
            Err(problem) => violations.push(FieldViolation::new(param.name, problem)),
        }
    }

    if violations.is_empty() {
        Ok(ValidatedArgs { values })
    } else {
        Err(violations)
    }
}

fn coerce(kind: &ParamKind, value: &Value) -> Result<Arg, String> {
    match kind {
        ParamKind::Snowflake => coerce_snowflake(value).map(Arg::Snowflake),
        ParamKind::Text { max_len } => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("expected a string, got {}", type_name(value)))?;
            if let Some(max) = max_len {
                let len = s.chars().count();
                if len > *max {
                    return Err(format!("must be at most {max} characters, got {len}"));
                }
            }
            Ok(Arg::Text(s.to_string()))
        }
        ParamKind::Integer { min, max } => {
            let n = coerce_integer(value)?;
            if n < *min || n > *max {
                return Err(format!("must be between {min} and {max}, got {n}"));
            }
            Ok(Arg::Integer(n))
        }
        ParamKind::Bool => match value {
            Value::Bool(b) => Ok(Arg::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Arg::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Arg::Bool(false)),
            other => Err(format!("expected a boolean, got {}", type_name(other))),
        },
        ParamKind::Choice(choices) => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("expected a string, got {}", type_name(value)))?;
            choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(s.trim()))
                .map(|c| Arg::Text(c.to_string()))
                .ok_or_else(|| format!("must be one of {}", choices.join(", ")))
        }
        ParamKind::IntChoice(choices) => {
            let n = coerce_integer(value)?;
            if choices.contains(&n) {
                Ok(Arg::Integer(n))
            } else {
                let listed: Vec<String> = choices.iter().map(i64::to_string).collect();
                Err(format!("must be one of {}", listed.join(", ")))
            }
        }
        ParamKind::TextList { max_items } => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("expected an array, got {}", type_name(value)))?;
            if items.is_empty() {
                return Err("must contain at least one item".into());
            }
            if items.len() > *max_items {
                return Err(format!("must contain at most {max_items} items, got {}", items.len()));
            }
            let mut out = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(s) if !s.trim().is_empty() => out.push(s.to_string()),
                    Some(_) => return Err(format!("item {idx} is empty")),
                    None => return Err(format!("item {idx} is not a string")),
                }
            }
            Ok(Arg::TextList(out))
        }
        ParamKind::Object => match value {
            Value::Object(map) => Ok(Arg::Object(map.clone())),
            other => Err(format!("expected an object, got {}", type_name(other))),
        },
        ParamKind::Color => coerce_color(value).map(Arg::Color),
    }
}

fn coerce_snowflake(value: &Value) -> Result<Snowflake, String> {
    let id = match value {
        Value::String(s) => s.trim().parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    match id {
        Some(0) | None => Err(format!(
            "expected a Discord id (numeric string), got {}",
            describe(value)
        )),
        Some(id) => Ok(Snowflake(id)),
    }
}

fn coerce_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| format!("expected an integer, got {n}")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected an integer, got \"{s}\"")),
        other => Err(format!("expected an integer, got {}", type_name(other))),
    }
}

fn coerce_color(value: &Value) -> Result<u32, String> {
    match value {
        Value::String(s) => {
            let hex = s.trim().trim_start_matches('#');
            if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(format!("expected a hex color like #FF0000, got \"{s}\""));
            }
            u32::from_str_radix(hex, 16)
                .map_err(|_| format!("expected a hex color like #FF0000, got \"{s}\""))
        }
        Value::Number(n) => n
            .as_u64()
            .filter(|c| *c <= 0xFF_FFFF)
            .map(|c| c as u32)
            .ok_or_else(|| format!("color must be between 0 and 16777215, got {n}")),
        other => Err(format!("expected a hex color string, got {}", type_name(other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        Value::Number(n) => n.to_string(),
        other => type_name(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> Vec<Param> {
        vec![
            Param::required("channel_id", ParamKind::Snowflake, "channel"),
            Param::optional("content", ParamKind::text_max(10), "text"),
            Param::optional("limit", ParamKind::Integer { min: 1, max: 100 }, "count")
                .with_default(json!(10)),
            Param::optional("unit", ParamKind::Choice(&["seconds", "minutes"]), "unit"),
            Param::optional("archive", ParamKind::IntChoice(&[60, 1440]), "minutes"),
            Param::optional("emojis", ParamKind::TextList { max_items: 3 }, "emoji"),
            Param::optional("color", ParamKind::Color, "color"),
            Param::optional("embed", ParamKind::Object, "embed"),
            Param::optional("flag", ParamKind::Bool, "flag"),
        ]
    }

    #[test]
    fn accepts_strings_and_numbers_for_ids() {
        let args = validate(&params(), &json!({ "channel_id": "123" })).unwrap();
        assert_eq!(args.snowflake("channel_id"), Some(Snowflake(123)));

        let args = validate(&params(), &json!({ "channel_id": 456 })).unwrap();
        assert_eq!(args.snowflake("channel_id"), Some(Snowflake(456)));
    }

    #[test]
    fn applies_defaults() {
        let args = validate(&params(), &json!({ "channel_id": "1" })).unwrap();
        assert_eq!(args.integer("limit"), Some(10));
        assert!(!args.contains("content"));
    }

    #[test]
    fn null_arguments_mean_none_supplied() {
        let only_optional = vec![Param::optional("x", ParamKind::Bool, "x")];
        let args = validate(&only_optional, &Value::Null).unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn reports_every_violation() {
        let err = validate(
            &params(),
            &json!({
                "content": "far too long for this",
                "limit": 500,
                "unit": "weeks",
                "chanel_id": "1",
            }),
        )
        .unwrap_err();

        let fields: Vec<&str> = err.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["chanel_id", "channel_id", "content", "limit", "unit"]);
        assert_eq!(err[0].problem, "unknown parameter");
        assert_eq!(err[1].problem, "missing required parameter");
    }

    #[test]
    fn rejects_non_object_arguments() {
        let err = validate(&params(), &json!(["channel_id"])).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].field, "");
    }

    #[test]
    fn rejects_bad_ids() {
        for bad in [json!("abc"), json!(-5), json!(1.5), json!("0"), json!(true)] {
            let err = validate(&params(), &json!({ "channel_id": bad })).unwrap_err();
            assert_eq!(err[0].field, "channel_id", "{bad}");
        }
    }

    #[test]
    fn integers_accept_integral_floats_and_strings() {
        let args = validate(&params(), &json!({ "channel_id": "1", "limit": 5.0 })).unwrap();
        assert_eq!(args.integer("limit"), Some(5));
        let args = validate(&params(), &json!({ "channel_id": "1", "limit": "7" })).unwrap();
        assert_eq!(args.integer("limit"), Some(7));
        assert!(validate(&params(), &json!({ "channel_id": "1", "limit": 5.5 })).is_err());
    }

    #[test]
    fn choices_are_canonicalized() {
        let args = validate(&params(), &json!({ "channel_id": "1", "unit": "Minutes" })).unwrap();
        assert_eq!(args.text("unit"), Some("minutes"));

        let args = validate(&params(), &json!({ "channel_id": "1", "archive": 1440 })).unwrap();
        assert_eq!(args.integer("archive"), Some(1440));
        assert!(validate(&params(), &json!({ "channel_id": "1", "archive": 30 })).is_err());
    }

    #[test]
    fn lists_must_be_non_empty_strings() {
        let args =
            validate(&params(), &json!({ "channel_id": "1", "emojis": ["👍", "🎉"] })).unwrap();
        assert_eq!(args.list("emojis").unwrap().len(), 2);

        for bad in [json!([]), json!(["a", "b", "c", "d"]), json!(["a", 1]), json!([""])] {
            assert!(validate(&params(), &json!({ "channel_id": "1", "emojis": bad })).is_err());
        }
    }

    #[test]
    fn colors() {
        for (raw, expected) in [(json!("#FF0000"), 0xFF0000), (json!("00ff00"), 0x00FF00), (json!(255), 255)] {
            let args = validate(&params(), &json!({ "channel_id": "1", "color": raw })).unwrap();
            assert_eq!(args.color("color"), Some(expected));
        }
        for bad in [json!("red"), json!("#FFF"), json!(0x1000000), json!("#+FFFFF"), json!("-FFFFF")] {
            assert!(validate(&params(), &json!({ "channel_id": "1", "color": bad })).is_err());
        }
    }

    #[test]
    fn bools_and_objects() {
        let args = validate(
            &params(),
            &json!({ "channel_id": "1", "flag": "true", "embed": { "title": "t" } }),
        )
        .unwrap();
        assert_eq!(args.bool("flag"), Some(true));
        assert_eq!(args.object("embed").unwrap()["title"], "t");
        assert!(validate(&params(), &json!({ "channel_id": "1", "embed": "t" })).is_err());
    }

    #[test]
    fn required_text_must_not_be_blank() {
        let params = vec![Param::required("name", ParamKind::text(), "name")];
        let err = validate(&params, &json!({ "name": "   " })).unwrap_err();
        assert_eq!(err[0].problem, "must not be empty");
    }

    #[test]
    fn explicit_null_is_treated_as_absent() {
        let args = validate(&params(), &json!({ "channel_id": "1", "content": null })).unwrap();
        assert!(!args.contains("content"));
        let err = validate(&params(), &json!({ "channel_id": null })).unwrap_err();
        assert_eq!(err[0].problem, "missing required parameter");
    }

    #[test]
    fn schema_lists_required_and_forbids_extras() {
        let schema = input_schema(&params());
        assert_eq!(schema["required"], json!(["channel_id"]));
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["properties"]["limit"]["maximum"], 100);
        assert_eq!(schema["properties"]["limit"]["default"], 10);
        assert_eq!(schema["properties"]["unit"]["enum"], json!(["seconds", "minutes"]));
        assert_eq!(schema["properties"]["channel_id"]["description"], "channel");
    }
}
