//! Strict parsing of raw LLM text into [`StructuredCoachOutput`].
//!
//! The only leniency is locating the JSON object: a reply wrapped in a
//! markdown code fence or preceded by a sentence is still accepted. The
//! object itself must match the schema exactly and pass validation; no
//! field is ever guessed, defaulted from prose, or coerced from a string.

use std::sync::LazyLock;

use regex::Regex;

use proview_core::types::StructuredCoachOutput;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("Invalid code fence regex")
});

/// Parse and validate one LLM reply.
///
/// Returns the rejection reason on failure, for the retry prompt and logs.
pub fn parse_coach_output(raw: &str) -> Result<StructuredCoachOutput, String> {
    let json = extract_json_object(raw).ok_or_else(|| "reply contains no JSON object".to_string())?;
    let output: StructuredCoachOutput =
        serde_json::from_str(json).map_err(|e| format!("reply does not match the schema: {}", e))?;
    output.validate()?;
    Ok(output)
}

/// Locate the JSON object in a reply.
fn extract_json_object(raw: &str) -> Option<&str> {
    let body = CODE_FENCE_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUESTION: &str = r#"{"interviewer_chat":"Tell me about Kafka.","is_correct":null,"score":null,"refined_explanation":null,"suggested_replies":["Sure","Can you rephrase?"]}"#;

    const EVALUATION: &str = r#"{"interviewer_chat":"Solid answer.","is_correct":true,"score":7.5,"refined_explanation":"Mention partitioning.","suggested_replies":["Thanks","Next question","Explain partitioning"]}"#;

    #[test]
    fn test_parses_question_turn() {
        let output = parse_coach_output(QUESTION).unwrap();
        assert_eq!(output.interviewer_chat, "Tell me about Kafka.");
        assert!(output.score.is_none());
        assert!(output.is_correct.is_none());
    }

    #[test]
    fn test_parses_evaluation_turn() {
        let output = parse_coach_output(EVALUATION).unwrap();
        assert_eq!(output.score, Some(7.5));
        assert_eq!(output.is_correct, Some(true));
        assert_eq!(output.suggested_replies.len(), 3);
    }

    #[test]
    fn test_accepts_code_fence() {
        let raw = format!("```json\n{}\n```", QUESTION);
        assert!(parse_coach_output(&raw).is_ok());
    }

    #[test]
    fn test_accepts_leading_prose() {
        let raw = format!("Here is my reply:\n{}", EVALUATION);
        assert!(parse_coach_output(&raw).is_ok());
    }

    #[test]
    fn test_rejects_plain_text() {
        let reason = parse_coach_output("Great question! Let's start.").unwrap_err();
        assert!(reason.contains("no JSON object"));
    }

    #[test]
    fn test_rejects_truncated_json() {
        assert!(parse_coach_output(r#"{"interviewer_chat":"Hi","#).is_err());
    }

    #[test]
    fn test_rejects_score_without_is_correct() {
        let raw = r#"{"interviewer_chat":"Ok","is_correct":null,"score":6,"refined_explanation":null,"suggested_replies":["a","b"]}"#;
        assert!(parse_coach_output(raw).unwrap_err().contains("both present"));
    }

    #[test]
    fn test_rejects_string_score() {
        let raw = r#"{"interviewer_chat":"Ok","is_correct":true,"score":"7/10","refined_explanation":"x","suggested_replies":["a","b"]}"#;
        assert!(parse_coach_output(raw).unwrap_err().contains("schema"));
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let raw = r#"{"interviewer_chat":"Ok","is_correct":false,"score":11,"refined_explanation":"x","suggested_replies":["a","b"]}"#;
        assert!(parse_coach_output(raw).is_err());
    }

    #[test]
    fn test_rejects_wrong_reply_count() {
        let raw = r#"{"interviewer_chat":"Ok","suggested_replies":[]}"#;
        assert!(parse_coach_output(raw).unwrap_err().contains("suggested_replies"));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let raw = r#"{"interviewer_chat":"Ok","suggested_replies":["a","b"],"confidence":0.9}"#;
        assert!(parse_coach_output(raw).is_err());
    }

    #[test]
    fn test_rejects_missing_interviewer_chat() {
        let raw = r#"{"suggested_replies":["a","b"]}"#;
        assert!(parse_coach_output(raw).is_err());
    }
}
