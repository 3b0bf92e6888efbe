//! Parse an assembled comparator payload into a [`VerificationVerdict`].

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::schema::validate_verdict_schema;
use crate::types::{VerdictStatus, VerificationVerdict};

/// Errors from verdict parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerdictError {
    #[error("Verdict payload is empty")]
    Empty,

    #[error("Verdict payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Verdict payload failed schema validation: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Unknown verdict status: {0}")]
    UnknownStatus(String),
}

/// Wire shape of the comparator payload.
///
/// Legacy key names are read as separate fields; the current name wins
/// when a payload carries both.
#[derive(Debug, Deserialize)]
struct VerdictPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    response: Option<String>,

    #[serde(default)]
    hallucinated_span: Option<String>,
    #[serde(default)]
    llm_response: Option<String>,

    #[serde(default)]
    evidence_span: Option<String>,
    #[serde(default)]
    search_result: Option<String>,

    #[serde(default)]
    source: Option<String>,
}

/// Parse a completed payload.
///
/// `source` is the URL of the document the evidence came from. The returned
/// verdict always carries it, whatever the model wrote in its `source` field.
pub fn parse_verdict(payload: &str, source: &Url) -> Result<VerificationVerdict, VerdictError> {
    let body = json_body(payload);
    if body.is_empty() {
        return Err(VerdictError::Empty);
    }

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| VerdictError::InvalidJson(e.to_string()))?;
    validate_verdict_schema(&value).map_err(VerdictError::SchemaViolation)?;

    let parsed: VerdictPayload =
        serde_json::from_value(value).map_err(|e| VerdictError::InvalidJson(e.to_string()))?;
    let raw_status = parsed
        .status
        .or(parsed.response)
        .ok_or_else(|| VerdictError::SchemaViolation(vec!["status is required".to_string()]))?;
    let status = parse_status(&raw_status)?;

    if let Some(reported) = parsed.source.as_deref() {
        if !same_source(reported, source) {
            tracing::warn!(
                reported = %reported,
                expected = %source,
                "Comparator reported a different source; using the fetched URL"
            );
        }
    }

    Ok(VerificationVerdict::new(
        status,
        parsed.hallucinated_span.or(parsed.llm_response),
        parsed.evidence_span.or(parsed.search_result),
        source.clone(),
    ))
}

/// Map the status string, tolerating casing, separators and the legacy phrases.
fn parse_status(raw: &str) -> Result<VerdictStatus, VerdictError> {
    let normalized = raw
        .trim()
        .trim_end_matches(['.', '!'])
        .to_lowercase()
        .replace(['_', '-'], " ");
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    match normalized.as_str() {
        "no hallucination" | "no hallucination detected" | "nohallucination" => {
            Ok(VerdictStatus::NoHallucination)
        }
        "hallucination detected" | "hallucination" | "hallucinationdetected" => {
            Ok(VerdictStatus::HallucinationDetected)
        }
        "inconclusive" | "insufficient evidence" => Ok(VerdictStatus::Inconclusive),
        _ => Err(VerdictError::UnknownStatus(raw.to_string())),
    }
}

/// Strip Markdown code fences and any prose around the JSON object.
fn json_body(payload: &str) -> &str {
    let trimmed = payload.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
            rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

fn same_source(reported: &str, source: &Url) -> bool {
    let reported = reported.trim().trim_end_matches('/');
    let expected = source.as_str().trim_end_matches('/');
    reported == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Url {
        Url::parse("https://en.wikipedia.org/wiki/Paris").unwrap()
    }

    #[test]
    fn test_parse_hallucination() {
        let payload = r#"{"status":"hallucination_detected","hallucinated_span":"Paris has 3 million residents","evidence_span":"Paris population: 2.1 million","source":"https://en.wikipedia.org/wiki/Paris"}"#;
        let verdict = parse_verdict(payload, &source()).unwrap();
        assert_eq!(verdict.status, VerdictStatus::HallucinationDetected);
        assert_eq!(
            verdict.hallucinated_span.as_deref(),
            Some("Paris has 3 million residents")
        );
        assert_eq!(
            verdict.evidence_span.as_deref(),
            Some("Paris population: 2.1 million")
        );
        assert_eq!(verdict.source, source());
    }

    #[test]
    fn test_parse_legacy_format() {
        let payload = r#"{
            "response": "No hallucination detected",
            "llm_response": "",
            "search_result": "",
            "source": "https://en.wikipedia.org/wiki/Paris"
        }"#;
        let verdict = parse_verdict(payload, &source()).unwrap();
        assert_eq!(verdict.status, VerdictStatus::NoHallucination);
        assert!(verdict.hallucinated_span.is_none());
        assert!(verdict.evidence_span.is_none());
    }

    #[test]
    fn test_current_keys_win_over_legacy_keys() {
        let payload = r#"{
            "status": "hallucination_detected",
            "response": "No hallucination detected",
            "hallucinated_span": "3 million",
            "llm_response": "stale",
            "evidence_span": "2.1 million",
            "source": "https://en.wikipedia.org/wiki/Paris"
        }"#;
        let verdict = parse_verdict(payload, &source()).unwrap();
        assert_eq!(verdict.status, VerdictStatus::HallucinationDetected);
        assert_eq!(verdict.hallucinated_span.as_deref(), Some("3 million"));
        assert_eq!(verdict.evidence_span.as_deref(), Some("2.1 million"));
    }

    #[test]
    fn test_no_hallucination_drops_spans() {
        let payload = r#"{"status":"no_hallucination","hallucinated_span":"leftover","evidence_span":"leftover","source":"https://en.wikipedia.org/wiki/Paris"}"#;
        let verdict = parse_verdict(payload, &source()).unwrap();
        assert!(verdict.hallucinated_span.is_none());
        assert!(verdict.evidence_span.is_none());
    }

    #[test]
    fn test_source_forced_to_fetched_url() {
        let payload = r#"{"status":"inconclusive","source":"https://somewhere.else/"}"#;
        let verdict = parse_verdict(payload, &source()).unwrap();
        assert_eq!(verdict.status, VerdictStatus::Inconclusive);
        assert_eq!(verdict.source, source());
    }

    #[test]
    fn test_code_fence_unwrapped() {
        let payload = "```json\n{\"status\": \"Hallucination detected.\", \"hallucinated_span\": \"a\", \"evidence_span\": \"b\"}\n```";
        let verdict = parse_verdict(payload, &source()).unwrap();
        assert_eq!(verdict.status, VerdictStatus::HallucinationDetected);
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(parse_verdict("   ", &source()), Err(VerdictError::Empty));
    }

    #[test]
    fn test_partial_payload_rejected() {
        let result = parse_verdict(r#"{"status":"no_halluc"#, &source());
        assert!(matches!(result, Err(VerdictError::InvalidJson(_))));
    }

    #[test]
    fn test_unknown_status() {
        let result = parse_verdict(r#"{"status":"maybe"}"#, &source());
        assert_eq!(result, Err(VerdictError::UnknownStatus("maybe".to_string())));
    }

    #[test]
    fn test_schema_violation() {
        let result = parse_verdict(r#"{"source":"https://example.com"}"#, &source());
        assert!(matches!(result, Err(VerdictError::SchemaViolation(_))));
    }

    #[test]
    fn test_serialized_verdict_parses_back() {
        let verdict = VerificationVerdict::new(
            VerdictStatus::HallucinationDetected,
            Some("3 million".to_string()),
            Some("2.1 million".to_string()),
            source(),
        );
        let wire = serde_json::to_string(&verdict).unwrap();
        assert_eq!(parse_verdict(&wire, &source()).unwrap(), verdict);
    }
}
