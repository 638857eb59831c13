//! Join retrieved provenance back onto validated datapoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::dataset::{Datapoint, Provenance, Query};
use crate::retrievers::ProvenanceMap;

/// One entry of a prediction's `output` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionOutput {
    Provenance { provenance: Vec<Provenance> },
    Answer { answer: String },
}

/// A datapoint whose `output` is the retrieved provenance followed by its gold answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub input: String,
    pub output: Vec<PredictionOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Prediction {
    pub fn new(datapoint: &Datapoint, provenance: Vec<Provenance>) -> Self {
        let mut output = vec![PredictionOutput::Provenance { provenance }];
        output.extend(
            datapoint
                .output
                .iter()
                .flatten()
                .filter_map(|a| a.answer.clone())
                .map(|answer| PredictionOutput::Answer { answer }),
        );
        Self {
            id: datapoint.id.clone(),
            input: datapoint.input.clone(),
            output,
            meta: datapoint.meta.clone(),
            extra: datapoint.extra.clone(),
        }
    }

    /// Retrieved provenance (always the first output entry).
    pub fn provenance(&self) -> &[Provenance] {
        match self.output.first() {
            Some(PredictionOutput::Provenance { provenance }) => provenance,
            _ => &[],
        }
    }
}

/// Build predictions for every returned id that is in the validated set.
///
/// Order follows `queries`; ids returned without having been submitted come last, sorted.
/// Ids missing from `validated` are skipped.
pub fn assemble(
    validated: &HashMap<String, Datapoint>,
    queries: &[Query],
    mut provenance: ProvenanceMap,
) -> Vec<Prediction> {
    let mut predictions = Vec::with_capacity(provenance.len());

    for query in queries {
        if let Some(retrieved) = provenance.remove(&query.id) {
            if let Some(datapoint) = validated.get(&query.id) {
                predictions.push(Prediction::new(datapoint, retrieved));
            }
        }
    }

    let mut unsolicited: Vec<_> = provenance.into_iter().collect();
    unsolicited.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, retrieved) in unsolicited {
        if let Some(datapoint) = validated.get(&id) {
            predictions.push(Prediction::new(datapoint, retrieved));
        }
    }

    predictions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RawDatapoint;
    use serde_json::json;

    fn datapoint(value: Value) -> Datapoint {
        serde_json::from_value::<RawDatapoint>(value).unwrap().into_datapoint().unwrap()
    }

    fn validated(points: Vec<Datapoint>) -> HashMap<String, Datapoint> {
        points.into_iter().map(|d| (d.id.clone(), d)).collect()
    }

    #[test]
    fn test_prediction_matches_expected_line() {
        let dp = datapoint(json!({
            "id": "q1", "input": "Who wrote X?",
            "output": [{"answer": "Y", "provenance": [{"wikipedia_id": "1", "title": "X"}]}]
        }));
        let map = validated(vec![dp]);
        let mut provenance = ProvenanceMap::new();
        provenance.insert("q1".to_string(), vec![Provenance::wikipedia("2", "Z")]);

        let predictions = assemble(&map, &[Query::new("q1", "Who wrote X?")], provenance);
        let line = serde_json::to_string(&predictions[0]).unwrap();
        assert_eq!(
            line,
            r#"{"id":"q1","input":"Who wrote X?","output":[{"provenance":[{"wikipedia_id":"2","title":"Z"}]},{"answer":"Y"}]}"#
        );
    }

    #[test]
    fn test_answers_preserved_in_order_and_meta_kept() {
        let dp = datapoint(json!({
            "id": "q1", "input": "q",
            "output": [
                {"answer": "first", "provenance": [{"wikipedia_id": "1", "title": "a"}]},
                {"provenance": [{"wikipedia_id": "2", "title": "b"}]},
                {"answer": "second", "provenance": [{"wikipedia_id": "3", "title": "c"}]}
            ],
            "meta": {"template": "t1"}
        }));
        let prediction = Prediction::new(&dp, vec![]);
        assert_eq!(
            prediction.output[1..],
            [
                PredictionOutput::Answer { answer: "first".into() },
                PredictionOutput::Answer { answer: "second".into() },
            ]
        );
        assert!(prediction.provenance().is_empty());
        assert_eq!(prediction.meta.unwrap()["template"], json!("t1"));
    }

    #[test]
    fn test_query_only_datapoint_has_provenance_only() {
        let dp = datapoint(json!({"id": "q9", "input": "q"}));
        let prediction = Prediction::new(&dp, vec![Provenance::web("https://a.org")]);
        assert_eq!(prediction.output.len(), 1);
        assert_eq!(prediction.provenance()[0].url.as_deref(), Some("https://a.org"));
    }

    #[test]
    fn test_assemble_follows_query_order_and_skips_unknown_ids() {
        let map = validated(vec![
            datapoint(json!({"id": "a", "input": "1"})),
            datapoint(json!({"id": "b", "input": "2"})),
            datapoint(json!({"id": "c", "input": "3"})),
        ]);
        let queries = vec![Query::new("c", "3"), Query::new("a", "1"), Query::new("b", "2")];
        let mut provenance = ProvenanceMap::new();
        for id in ["a", "c", "ghost"] {
            provenance.insert(id.to_string(), vec![]);
        }

        let ids: Vec<String> = assemble(&map, &queries, provenance)
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_unsolicited_ids_appended_sorted() {
        let map = validated(vec![
            datapoint(json!({"id": "a", "input": "1"})),
            datapoint(json!({"id": "b", "input": "2"})),
            datapoint(json!({"id": "c", "input": "3"})),
        ]);
        let mut provenance = ProvenanceMap::new();
        for id in ["c", "b", "a"] {
            provenance.insert(id.to_string(), vec![]);
        }
        let ids: Vec<String> = assemble(&map, &[Query::new("b", "2")], provenance)
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
