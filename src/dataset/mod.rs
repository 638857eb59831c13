//! Benchmark data model: raw records as loaded, validated datapoints, queries and
//! the provenance references retrievers return.

pub mod loader;
pub mod schema;

pub use loader::{compute_file_hash, load_data};
pub use schema::{DatasetSchema, QuestionTransform, TaskDataset, TaskFamily};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One dataset line before validation.
///
/// Only `id` is typed; everything a schema checks stays a raw JSON value so that a
/// malformed row can be rejected with a diagnostic instead of failing the load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDatapoint {
    pub id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl RawDatapoint {
    /// Decode into the typed form. Only meaningful after schema validation.
    pub fn into_datapoint(self) -> serde_json::Result<Datapoint> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// A validated benchmark record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub id: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<Answer>>,
    /// Opaque; only question transforms look inside.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Gold answer with its supporting provenance.
///
/// Provenance stays raw JSON: validation already checked the family's required fields,
/// and any other keys (of any type) are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub provenance: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reference to a source document or passage.
///
/// Wikipedia-family datasets carry `wikipedia_id` + `title`, web/CCNet-family datasets
/// carry `url`. Any further keys (paragraph spans, scores, ...) ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wikipedia_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Provenance {
    pub fn wikipedia(wikipedia_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            wikipedia_id: Some(wikipedia_id.into()),
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn web(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Retrieval request derived 1:1 from a validated datapoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub query: String,
}

impl Query {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_datapoint_keeps_unknown_fields() {
        let raw: RawDatapoint = serde_json::from_value(json!({
            "id": "q1",
            "input": 42,
            "meta": {"sentences": ["a", "b"]},
            "split": "dev"
        }))
        .unwrap();
        assert_eq!(raw.input, json!(42));
        assert!(raw.output.is_none());
        assert_eq!(raw.rest["split"], json!("dev"));
        assert_eq!(raw.rest["meta"]["sentences"][1], json!("b"));
    }

    #[test]
    fn test_into_datapoint_types_fields() {
        let raw: RawDatapoint = serde_json::from_value(json!({
            "id": "q1",
            "input": "Who wrote X?",
            "output": [{
                "answer": "Y",
                "provenance": [{"wikipedia_id": "1", "title": "X", "start_paragraph_id": 3}]
            }],
            "meta": {"source": "nq"}
        }))
        .unwrap();
        let dp = raw.into_datapoint().unwrap();
        assert_eq!(dp.input, "Who wrote X?");
        let output = dp.output.unwrap();
        assert_eq!(output[0].answer.as_deref(), Some("Y"));
        assert_eq!(output[0].provenance[0]["title"], json!("X"));
        assert_eq!(output[0].provenance[0]["start_paragraph_id"], json!(3));
        assert_eq!(dp.meta.unwrap()["source"], json!("nq"));
    }

    #[test]
    fn test_into_datapoint_keeps_foreign_provenance_keys_opaque() {
        let raw: RawDatapoint = serde_json::from_value(json!({
            "id": "w1",
            "input": "q",
            "output": [{
                "provenance": [{"url": "https://a.org", "wikipedia_id": 123, "title": null}]
            }],
            "meta": ["not", "an", "object"]
        }))
        .unwrap();
        let dp = raw.into_datapoint().unwrap();
        let provenance = &dp.output.unwrap()[0].provenance[0];
        assert_eq!(provenance["wikipedia_id"], json!(123));
        assert_eq!(provenance["title"], Value::Null);
        assert_eq!(dp.meta, Some(json!(["not", "an", "object"])));
    }

    #[test]
    fn test_provenance_serializes_only_present_fields() {
        let line = serde_json::to_string(&Provenance::wikipedia("2", "Z")).unwrap();
        assert_eq!(line, r#"{"wikipedia_id":"2","title":"Z"}"#);
        let line = serde_json::to_string(&Provenance::web("https://example.org")).unwrap();
        assert_eq!(line, r#"{"url":"https://example.org"}"#);
    }
}
