use std::fmt;

use serde::{Deserialize, Serialize};

/// Binary inspection outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_fail(&self) -> bool {
        matches!(self, Verdict::Fail)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// A localized defect found by the inference backend.
///
/// Coordinates are pixels in the inspected image, `x1 < x2` and `y1 < y2`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Score in `[0, 1]`.
    pub confidence: f32,
    pub class_id: i64,
    pub class_name: String,
}

/// Outcome of one inference call. Immutable once produced.
///
/// `defects` may be empty; `confidence` and `predicted_class` are only set
/// by classification-style backends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InspectionResult {
    pub verdict: Verdict,
    #[serde(default)]
    pub defects: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_class: Option<String>,
    pub model_name: String,
    /// Seconds spent inside the backend.
    pub inference_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Pass).unwrap(), r#""PASS""#);
        assert_eq!(serde_json::to_string(&Verdict::Fail).unwrap(), r#""FAIL""#);
        let parsed: Verdict = serde_json::from_str(r#""FAIL""#).unwrap();
        assert_eq!(parsed, Verdict::Fail);
    }

    #[test]
    fn result_omits_absent_optionals() {
        let result = InspectionResult {
            verdict: Verdict::Pass,
            defects: vec![],
            confidence: None,
            predicted_class: None,
            model_name: "stub".to_string(),
            inference_time: 0.01,
        };
        let json = serde_json::to_value(&result).unwrap();
        let map = json.as_object().unwrap();
        assert!(!map.contains_key("confidence"));
        assert!(!map.contains_key("predicted_class"));
        assert_eq!(map["verdict"], "PASS");
        assert_eq!(map["model_name"], "stub");
    }

    #[test]
    fn result_round_trips_defects() {
        let json = r#"{
            "verdict": "FAIL",
            "defects": [
                {"x1": 10.0, "y1": 20.0, "x2": 110.0, "y2": 220.0,
                 "confidence": 0.92, "class_id": 2, "class_name": "tear"}
            ],
            "model_name": "yolo",
            "inference_time": 0.042
        }"#;
        let result: InspectionResult = serde_json::from_str(json).unwrap();
        assert!(result.verdict.is_fail());
        assert_eq!(result.defects.len(), 1);
        assert_eq!(result.defects[0].class_name, "tear");
        assert!(result.confidence.is_none());
    }
}
