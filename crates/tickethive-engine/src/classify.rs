//! Explicit classifier steps around the LLM capability.
//!
//! The model is asked for a strict JSON object and the engine parses it
//! itself; the state machine only ever consumes the tagged decisions below,
//! never raw response text. Parse failures fall back the way the system
//! fails safe: an unreadable triage verdict is treated as a problem report
//! (a greeting misrouted into an incident is recoverable; a lost incident is
//! not), and an unreadable resolution verdict keeps the incident open.

use serde_json::Value;

/// Decision for the first on-topic check of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum TriageDecision {
    /// Greeting / farewell / off-topic: reply conversationally, create no
    /// incident, consume no retrieval call.
    Conversational { reply: String },
    /// Plausibly describes an IT problem: enter the incident state machine.
    ProblemReport,
}

/// Decision for a user message on an `Open` incident.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionDecision {
    /// The user confirmed the solution worked.
    Resolved { reply: String },
    /// Keep the incident open and reply with the given text.
    Continue { reply: String },
}

pub fn triage_prompt(user_text: &str) -> String {
    format!(
        r#"You are the intake step of an IT support assistant. Classify the user's message.

User message: "{user_text}"

If it is a greeting, a farewell, or unrelated to IT problems, reply naturally and classify it as conversational. If it plausibly describes an IT problem or support request, classify it as an incident.

Answer with ONLY this JSON object, no other text:
{{"intent": "conversational" | "incident", "reply": "your reply if conversational, else empty string"}}"#
    )
}

pub fn parse_triage(raw: &str) -> TriageDecision {
    let Some(value) = extract_json_object(raw) else {
        // Unreadable verdict: route into the incident path, like the KB
        // search default of the intake analyzer.
        return TriageDecision::ProblemReport;
    };
    match value.get("intent").and_then(Value::as_str) {
        Some("conversational") => {
            let reply = value
                .get("reply")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("Hello! How can I help you with an IT issue today?")
                .to_string();
            TriageDecision::Conversational { reply }
        }
        _ => TriageDecision::ProblemReport,
    }
}

pub fn resolution_prompt(
    user_demand: &str,
    solution_steps: Option<&str>,
    user_text: &str,
) -> String {
    let solution = solution_steps.unwrap_or("(solution steps not available)");
    format!(
        r#"You are an IT support assistant. A solution was already delivered for this incident and you are waiting for the user to confirm it worked.

Original problem: "{user_demand}"

Delivered solution:
{solution}

User's latest message: "{user_text}"

Decide whether the user is confirming the issue is fixed. If not, help them along using only the delivered solution; do not invent new fixes.

Answer with ONLY this JSON object, no other text:
{{"resolved": true | false, "reply": "what to say to the user"}}"#
    )
}

pub fn parse_resolution(raw: &str) -> ResolutionDecision {
    let Some(value) = extract_json_object(raw) else {
        return ResolutionDecision::Continue {
            reply: raw.trim().to_string(),
        };
    };
    let reply = value
        .get("reply")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Let me know whether that solved the problem.")
        .to_string();
    match value.get("resolved").and_then(Value::as_bool) {
        Some(true) => ResolutionDecision::Resolved { reply },
        _ => ResolutionDecision::Continue { reply },
    }
}

/// Pull the first JSON object out of a model response, tolerating markdown
/// fences and prose around it.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_plain_object() {
        let value = extract_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extract_fenced_object() {
        let raw = "```json\n{\"intent\": \"conversational\", \"reply\": \"hi\"}\n```";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["intent"], "conversational");
    }

    #[test]
    fn extract_object_with_surrounding_prose() {
        let raw = "Sure, here is the classification: {\"resolved\": true, \"reply\": \"glad it works\"} hope that helps";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["resolved"], true);
    }

    #[test]
    fn extract_rejects_garbage() {
        assert!(extract_json_object("no braces here").is_none());
        assert!(extract_json_object("}{").is_none());
        assert!(extract_json_object("{not json}").is_none());
    }

    #[test]
    fn triage_conversational_with_reply() {
        let decision =
            parse_triage(r#"{"intent": "conversational", "reply": "Hi! What can I do for you?"}"#);
        assert_eq!(
            decision,
            TriageDecision::Conversational {
                reply: "Hi! What can I do for you?".to_string()
            }
        );
    }

    #[test]
    fn triage_conversational_empty_reply_gets_default() {
        let decision = parse_triage(r#"{"intent": "conversational", "reply": ""}"#);
        match decision {
            TriageDecision::Conversational { reply } => assert!(!reply.is_empty()),
            other => panic!("expected conversational, got {other:?}"),
        }
    }

    #[test]
    fn triage_incident() {
        let decision = parse_triage(r#"{"intent": "incident", "reply": ""}"#);
        assert_eq!(decision, TriageDecision::ProblemReport);
    }

    #[test]
    fn triage_unparseable_defaults_to_incident() {
        assert_eq!(parse_triage("I think this is IT"), TriageDecision::ProblemReport);
    }

    #[test]
    fn resolution_resolved() {
        let decision = parse_resolution(r#"{"resolved": true, "reply": "Great, closing it."}"#);
        assert_eq!(
            decision,
            ResolutionDecision::Resolved {
                reply: "Great, closing it.".to_string()
            }
        );
    }

    #[test]
    fn resolution_continue() {
        let decision = parse_resolution(r#"{"resolved": false, "reply": "Try step 2 again."}"#);
        assert_eq!(
            decision,
            ResolutionDecision::Continue {
                reply: "Try step 2 again.".to_string()
            }
        );
    }

    #[test]
    fn resolution_unparseable_stays_open_with_raw_text() {
        let decision = parse_resolution("Did rebooting help?");
        assert_eq!(
            decision,
            ResolutionDecision::Continue {
                reply: "Did rebooting help?".to_string()
            }
        );
    }

    #[test]
    fn prompts_embed_inputs() {
        let prompt = triage_prompt("my vpn is down");
        assert!(prompt.contains("my vpn is down"));

        let prompt = resolution_prompt("vpn down", Some("1. reset adapter"), "it works now");
        assert!(prompt.contains("vpn down"));
        assert!(prompt.contains("1. reset adapter"));
        assert!(prompt.contains("it works now"));
    }
}
