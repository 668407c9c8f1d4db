//! Decoding of raw scan payloads.
//!
//! A payload is either a bare identifier (typed in or encoded as a plain QR
//! code) or a JSON object printed on newer badges. Badge generations disagree
//! on key names, so every logical field is looked up through an ordered alias
//! list: the first alias holding a usable value wins.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::api::PayloadMode;
use crate::validator::IdentifierFormat;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Field {
    Identifier,
    FirstName,
    LastName,
    Grade,
    GradYear,
}

/// Key aliases per field, highest priority first.
pub const FIELD_ALIASES: &[(Field, &[&str])] = &[
    (Field::Identifier, &["id", "studentId", "sid"]),
    (Field::FirstName, &["first", "firstName", "f"]),
    (Field::LastName, &["last", "lastName", "l"]),
    (Field::Grade, &["grade", "Grade"]),
    (Field::GradYear, &["gradYear", "graduationYear", "grad_year"]),
];

pub fn aliases(field: Field) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("empty payload")]
    Empty,
    #[error("payload is neither an id nor valid JSON: {0}")]
    Malformed(String),
    #[error("payload JSON must be an object or a scalar id, got {0}")]
    UnsupportedJson(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFragment {
    /// Empty when a structured payload carries no identifier key.
    pub identifier: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub grade: Option<String>,
    pub grad_year: Option<String>,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn lookup(object: &Map<String, Value>, field: Field) -> Option<String> {
    aliases(field)
        .iter()
        .find_map(|key| object.get(*key).and_then(scalar))
}

pub fn parse_payload(
    raw: &str,
    format: &IdentifierFormat,
) -> Result<(IdentityFragment, PayloadMode), ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    if format.validate(trimmed) {
        let fragment = IdentityFragment {
            identifier: trimmed.to_string(),
            ..Default::default()
        };
        return Ok((fragment, PayloadMode::IdOnly));
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| {
        debug!("payload is not an id and not JSON: {}", e);
        ParseError::Malformed(e.to_string())
    })?;

    let fragment = match value {
        Value::Object(object) => IdentityFragment {
            identifier: lookup(&object, Field::Identifier).unwrap_or_default(),
            first_name: lookup(&object, Field::FirstName),
            last_name: lookup(&object, Field::LastName),
            grade: lookup(&object, Field::Grade),
            grad_year: lookup(&object, Field::GradYear),
        },
        // A bare number or quoted string is a scanned id that failed the
        // format check. Keep it so the audit row shows what was scanned.
        // Numbers keep their digits as typed, serde_json would round long
        // ones through f64.
        Value::Number(_) => IdentityFragment {
            identifier: trimmed.to_string(),
            ..Default::default()
        },
        Value::String(_) => IdentityFragment {
            identifier: scalar(&value).unwrap_or_default(),
            ..Default::default()
        },
        other => return Err(ParseError::UnsupportedJson(json_kind(&other))),
    };

    Ok((fragment, PayloadMode::Json))
}
