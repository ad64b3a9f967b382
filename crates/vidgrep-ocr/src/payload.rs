use serde::{Deserialize, Serialize};
use serde_json::Value;

use vidgrep_types::TextCandidate;

use crate::error::OcrError;

/// Reply shapes a recognition worker may produce for one frame.
///
/// Current workers answer with a document object carrying parallel arrays of
/// texts and scores; legacy workers answer with a list of per-line detections.
/// Discrimination between the two happens once, in [`parse_payload`]; the rest
/// of the pipeline only ever sees the tagged form.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionPayload {
    Document(DocumentRecognition),
    Lines(Vec<LineRecognition>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecognition {
    #[serde(rename = "rec_texts")]
    pub texts: Vec<String>,
    #[serde(rename = "rec_scores")]
    pub scores: Vec<f32>,
}

/// One detected text line with the quad that bounds it.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecognition {
    pub region: Vec<[f32; 2]>,
    pub text: String,
    pub confidence: f32,
}

impl RecognitionPayload {
    pub fn empty() -> Self {
        Self::Lines(Vec::new())
    }

    /// Projects either shape into one ordered candidate sequence.
    ///
    /// Detection order is preserved; parallel arrays of differing length are
    /// malformed, not truncated.
    pub fn into_candidates(self) -> Result<Vec<TextCandidate>, OcrError> {
        match self {
            Self::Document(document) => {
                if document.texts.len() != document.scores.len() {
                    return Err(OcrError::parse(format!(
                        "parallel arrays disagree: {} texts vs {} scores",
                        document.texts.len(),
                        document.scores.len()
                    )));
                }
                Ok(document
                    .texts
                    .into_iter()
                    .zip(document.scores)
                    .map(|(text, score)| TextCandidate::new(text, score))
                    .collect())
            }
            Self::Lines(lines) => Ok(lines
                .into_iter()
                .map(|line| TextCandidate::new(line.text, line.confidence))
                .collect()),
        }
    }
}

/// Tags a raw worker reply as one of the two known shapes.
///
/// A JSON object is the document shape, a JSON array the legacy line list,
/// and `null` an empty detection set (legacy workers answer `null` for blank
/// frames). Anything else is malformed for that frame only.
pub fn parse_payload(value: &Value) -> Result<RecognitionPayload, OcrError> {
    match value {
        Value::Object(_) => parse_document(value).map(RecognitionPayload::Document),
        Value::Array(entries) => parse_lines(entries).map(RecognitionPayload::Lines),
        Value::Null => Ok(RecognitionPayload::empty()),
        other => Err(OcrError::parse(format!(
            "expected an object, array, or null, got {}",
            json_kind(other)
        ))),
    }
}

fn parse_document(value: &Value) -> Result<DocumentRecognition, OcrError> {
    let object = value
        .as_object()
        .ok_or_else(|| OcrError::parse("document reply is not an object"))?;
    if !object.contains_key("rec_texts") || !object.contains_key("rec_scores") {
        return Err(OcrError::parse(
            "document reply is missing rec_texts or rec_scores",
        ));
    }
    serde_json::from_value(value.clone())
        .map_err(|err| OcrError::parse(format!("document reply did not deserialize: {err}")))
}

fn parse_lines(entries: &[Value]) -> Result<Vec<LineRecognition>, OcrError> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            parse_line(entry)
                .ok_or_else(|| OcrError::parse(format!("line detection {index} is malformed")))
        })
        .collect()
}

// Legacy line shape: [[[x,y],...], [text, confidence]].
fn parse_line(entry: &Value) -> Option<LineRecognition> {
    let parts = entry.as_array()?;
    if parts.len() != 2 {
        return None;
    }
    let region = parts[0]
        .as_array()?
        .iter()
        .map(parse_point)
        .collect::<Option<Vec<_>>>()?;
    let detection = parts[1].as_array()?;
    if detection.len() != 2 {
        return None;
    }
    let text = detection[0].as_str()?.to_string();
    let confidence = detection[1].as_f64()? as f32;
    Some(LineRecognition {
        region,
        text,
        confidence,
    })
}

fn parse_point(value: &Value) -> Option<[f32; 2]> {
    let pair = value.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    Some([pair[0].as_f64()? as f32, pair[1].as_f64()? as f32])
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_shape_projects_in_order() {
        let value = json!({
            "rec_texts": ["第一", "第二", "third"],
            "rec_scores": [0.99, 0.85, 0.42],
        });
        let payload = parse_payload(&value).unwrap();
        assert!(matches!(payload, RecognitionPayload::Document(_)));
        let candidates = payload.into_candidates().unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].text, "第一");
        assert_eq!(candidates[1].confidence, 0.85);
        assert_eq!(candidates[2].text, "third");
    }

    #[test]
    fn line_shape_projects_in_order() {
        let value = json!([
            [[[0.0, 0.0], [10.0, 0.0], [10.0, 4.0], [0.0, 4.0]], ["hello", 0.91]],
            [[[0.0, 8.0], [12.0, 8.0], [12.0, 12.0], [0.0, 12.0]], ["world", 0.77]],
        ]);
        let payload = parse_payload(&value).unwrap();
        let RecognitionPayload::Lines(lines) = &payload else {
            panic!("expected line shape");
        };
        assert_eq!(lines[0].region.len(), 4);
        let candidates = payload.into_candidates().unwrap();
        assert_eq!(candidates[0].text, "hello");
        assert_eq!(candidates[1].text, "world");
        assert_eq!(candidates[1].confidence, 0.77);
    }

    #[test]
    fn null_reply_is_empty() {
        let payload = parse_payload(&Value::Null).unwrap();
        assert_eq!(payload.into_candidates().unwrap(), Vec::new());
    }

    #[test]
    fn empty_array_is_empty() {
        let payload = parse_payload(&json!([])).unwrap();
        assert_eq!(payload.into_candidates().unwrap(), Vec::new());
    }

    #[test]
    fn mismatched_parallel_arrays_are_malformed() {
        let value = json!({
            "rec_texts": ["a", "b"],
            "rec_scores": [0.9],
        });
        let err = parse_payload(&value).unwrap().into_candidates().unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn document_missing_scores_is_malformed() {
        let err = parse_payload(&json!({ "rec_texts": ["a"] })).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn scalar_reply_is_malformed() {
        let err = parse_payload(&json!(42)).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn malformed_line_entry_is_rejected() {
        let value = json!([
            [[[0.0, 0.0], [1.0, 0.0]], ["ok", 0.9]],
            ["not a detection"],
        ]);
        let err = parse_payload(&value).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn line_confidence_tuple_must_pair_text_and_score() {
        let value = json!([
            [[[0.0, 0.0], [1.0, 0.0]], [0.9, "swapped"]],
        ]);
        assert!(parse_payload(&value).is_err());
    }
}
