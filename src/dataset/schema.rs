//! Per-task-family validation and query transformation.
//!
//! Task families are a closed set: each one decides which provenance fields a gold answer
//! must carry and how (if at all) a datapoint's `input` is rewritten into a query.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use super::{Datapoint, RawDatapoint};
use crate::runlog::RunLogger;

/// Validation and query transformation for a dataset's records.
pub trait DatasetSchema {
    /// Dataset name used in diagnostics.
    fn name(&self) -> &str;

    /// Returns false (after logging why) if the datapoint must be excluded.
    fn validate_datapoint(&self, datapoint: &RawDatapoint, log: &RunLogger) -> bool;

    /// Rewrite `input` for retrieval. `override_type` wins over the dataset default.
    fn transform_query(
        &self,
        datapoint: Datapoint,
        override_type: Option<&str>,
        log: &RunLogger,
    ) -> Datapoint;
}

/// Task family governing a dataset's expected schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFamily {
    /// Provenance points at Wikipedia pages: `wikipedia_id` + `title`.
    Wikipedia,
    /// Provenance points at web pages (CCNet): `url`.
    #[serde(alias = "ccnet")]
    WaferCcnet,
}

impl TaskFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskFamily::Wikipedia => "wikipedia",
            TaskFamily::WaferCcnet => "wafer_ccnet",
        }
    }

    /// Check one provenance entry's family-specific required fields.
    fn provenance_problem(&self, provenance: &Value) -> Option<String> {
        let Some(obj) = provenance.as_object() else {
            return Some(format!("provenance is not an object {}", provenance));
        };
        match self {
            TaskFamily::Wikipedia => {
                for field in ["wikipedia_id", "title"] {
                    match obj.get(field) {
                        Some(Value::String(_)) => {}
                        Some(other) => return Some(format!("{} is not a string {}", field, other)),
                        None => return Some(format!("{} is missing", field)),
                    }
                }
                None
            }
            TaskFamily::WaferCcnet => match obj.get("url") {
                Some(Value::String(_)) => None,
                _ => Some("datapoint with malformed or missing url".to_string()),
            },
        }
    }

    /// Short-circuiting structural checks shared by every family.
    fn rejection(&self, datapoint: &RawDatapoint) -> Option<String> {
        if !datapoint.input.is_string() {
            return Some(format!("input is not a string {}", datapoint.input));
        }

        let Some(output) = &datapoint.output else {
            return None;
        };
        let Some(answers) = output.as_array() else {
            return Some(format!("output is not a list {}", output));
        };
        if answers.is_empty() {
            return Some("empty output".to_string());
        }

        for answer in answers {
            let Some(answer) = answer.as_object() else {
                return Some(format!("output entry is not an object {}", answer));
            };
            if let Some(text) = answer.get("answer") {
                if !text.is_string() {
                    return Some(format!("answer is not a string {}", text));
                }
            }
            let provenance = match answer.get("provenance") {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => return Some("empty provenance".to_string()),
                Some(other) => return Some(format!("provenance is not a list {}", other)),
            };
            if provenance.is_empty() {
                return Some("empty provenance".to_string());
            }
            if let Some(problem) = provenance.iter().find_map(|p| self.provenance_problem(p)) {
                return Some(problem);
            }
        }
        None
    }
}

impl std::fmt::Display for TaskFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query rewrite applied before retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionTransform {
    /// Replace input with the last entry of `meta.sentences`.
    LastSentence,
    /// `meta.wikipedia_title` + " " + last entry of `meta.sentences`.
    TitleAndLastSentence,
}

impl QuestionTransform {
    /// Parse a configured transform name. Unknown names yield `None` (identity).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sentence_1" => Some(QuestionTransform::LastSentence),
            "title+sentence_1" => Some(QuestionTransform::TitleAndLastSentence),
            _ => None,
        }
    }

    fn apply(&self, meta: Option<&Value>) -> Option<String> {
        let meta = meta?.as_object()?;
        let sentence = meta.get("sentences")?.as_array()?.last()?.as_str()?;
        match self {
            QuestionTransform::LastSentence => Some(sentence.to_string()),
            QuestionTransform::TitleAndLastSentence => {
                let title = meta.get("wikipedia_title")?.as_str()?;
                Some(format!("{} {}", title, sentence))
            }
        }
    }
}

/// A configured evaluation dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDataset {
    pub file: PathBuf,
    pub task_family: TaskFamily,
    pub name: String,
    #[serde(default)]
    pub question_transform_type: Option<String>,
}

impl TaskDataset {
    pub fn new(file: impl Into<PathBuf>, task_family: TaskFamily, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            task_family,
            name: name.into(),
            question_transform_type: None,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.question_transform_type = Some(transform.into());
        self
    }
}

impl DatasetSchema for TaskDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_datapoint(&self, datapoint: &RawDatapoint, log: &RunLogger) -> bool {
        match self.task_family.rejection(datapoint) {
            Some(reason) => {
                log.warn(format_args!("[{}] {}", datapoint.id, reason));
                false
            }
            None => true,
        }
    }

    fn transform_query(
        &self,
        mut datapoint: Datapoint,
        override_type: Option<&str>,
        log: &RunLogger,
    ) -> Datapoint {
        // Only web-sourced datasets carry sentence lists to rewrite from.
        if self.task_family != TaskFamily::WaferCcnet {
            return datapoint;
        }
        let effective = override_type
            .filter(|t| !t.is_empty())
            .or(self.question_transform_type.as_deref());
        let Some(transform) = effective.and_then(QuestionTransform::parse) else {
            return datapoint;
        };
        match transform.apply(datapoint.meta.as_ref()) {
            Some(input) => datapoint.input = input,
            None => log.debug(format_args!(
                "[{}] meta lacks fields for {:?}, input left unchanged",
                datapoint.id, transform
            )),
        }
        datapoint
    }
}
