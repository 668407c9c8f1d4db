use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::api::ScanStatus;

/// Station clients have sent grades and graduation years both as strings and
/// as bare numbers over the years, accept either.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or a number, got {other}"
        ))),
    }
}

/// One scan as submitted by a station.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    #[serde(alias = "raw", default)]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub club: String,
    #[serde(default)]
    pub note: String,
    #[serde(alias = "rowNumber", default, skip_serializing_if = "Option::is_none")]
    pub row: Option<i64>,
    #[serde(alias = "rowPosition", default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(alias = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub grade: Option<String>,
    #[serde(
        alias = "graduationYear",
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub grad_year: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub events: Vec<ScanEvent>,
}

/// Per-call context shared by every event of a submission.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub operator: Option<String>,
}

/// A row of the scan log. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    pub timestamp: String,
    pub session_id: String,
    pub club: String,
    pub operator: String,
    pub row_number: Option<i64>,
    pub row_position: Option<i64>,
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: String,
    pub grad_year: String,
    pub raw_payload: String,
    pub status: ScanStatus,
    pub note: String,
}

impl ScanRecord {
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.session_id, &self.student_id)
    }
}
