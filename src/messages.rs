//! Canonical message schemas and JSON codec (C1)
//!
//! Defines `Message`, `Task`, `TaskResult` and the `Envelope` sum type that
//! resolves a decoded payload to the narrowest matching shape. Unknown enum
//! literals never fail decoding: they become a distinguished `Unknown`
//! variant so a forward-incompatible payload is routed to the dead-letter
//! handler instead of crashing the receiving agent (§4.1).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::domain_types::{AgentName, Confidence, TaskId};
use crate::error::ProtocolError;

/// Semantic category of a [`Message`], controlling dispatch (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Free-form chat utterance.
    Chat,
    /// Begin a new task.
    StartTask,
    /// Query current task state.
    CheckStatus,
    /// Continuation of an existing task (proposal, critique, refinement, result).
    ModifyTask,
    /// Suggest a tool invocation.
    ToolSuggest,
    /// Execute a tool invocation.
    ToolExecute,
    /// A literal the receiver doesn't recognize; preserved verbatim.
    Unknown(String),
}

/// Lifecycle stage of a [`Task`] within the orchestrator state machine (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Orchestrator is requesting an initial proposal.
    Plan,
    /// A proposal is being critiqued.
    Execute,
    /// A critique is being refined.
    Refine,
    /// Terminal: task concluded successfully.
    Complete,
    /// Terminal: task could not converge and was escalated.
    Escalate,
    /// A literal the receiver doesn't recognize; preserved verbatim.
    UnknownLiteral(String),
}

/// Terminal disposition of a task (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Converged via plateau/majority resolution.
    Merged,
    /// Converged via consensus threshold.
    Completed,
    /// Could not converge; kill-switch or explicit escalation fired.
    Escalated,
    /// A literal the receiver doesn't recognize; preserved verbatim.
    Unknown(String),
}

/// Estimator output label (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Low estimated reasoning effort.
    Low,
    /// Medium estimated reasoning effort.
    Medium,
    /// High estimated reasoning effort.
    High,
}

impl ReasoningEffort {
    /// The next level up, saturating at `High` (§4.6 step 4: "bump... never down").
    #[must_use]
    pub fn bump(self) -> Self {
        match self {
            ReasoningEffort::Low => ReasoningEffort::Medium,
            ReasoningEffort::Medium | ReasoningEffort::High => ReasoningEffort::High,
        }
    }
}

impl PartialOrd for ReasoningEffort {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReasoningEffort {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(e: &ReasoningEffort) -> u8 {
            match e {
                ReasoningEffort::Low => 0,
                ReasoningEffort::Medium => 1,
                ReasoningEffort::High => 2,
            }
        }
        rank(self).cmp(&rank(other))
    }
}

/// Feature vector recorded alongside an estimate, used by the router (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Tokenized word count of the content.
    pub word_count: usize,
    /// Per-category keyword hit counts.
    pub category_hits: HashMap<String, usize>,
    /// Weighted complexity score (§4.6 step 2).
    pub complexity_score: f64,
    /// Names of the adjustment rules that fired, in order (§4.6 step 4).
    pub adjustments_applied: Vec<String>,
}

impl Intent {
    /// The canonical wire literal for this value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Intent::Chat => "chat",
            Intent::StartTask => "start_task",
            Intent::CheckStatus => "check_status",
            Intent::ModifyTask => "modify_task",
            Intent::ToolSuggest => "tool_suggest",
            Intent::ToolExecute => "tool_execute",
            Intent::Unknown(s) => s,
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "chat" => Intent::Chat,
            "start_task" => Intent::StartTask,
            "check_status" => Intent::CheckStatus,
            "modify_task" => Intent::ModifyTask,
            "tool_suggest" => Intent::ToolSuggest,
            "tool_execute" => Intent::ToolExecute,
            other => Intent::Unknown(other.to_string()),
        }
    }
}

impl Serialize for Intent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Intent::from_str(&s))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    /// The canonical wire literal for this value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Event::Plan => "plan",
            Event::Execute => "execute",
            Event::Refine => "refine",
            Event::Complete => "complete",
            Event::Escalate => "escalate",
            Event::UnknownLiteral(s) => s,
        }
    }

    /// Whether this state is terminal (`complete` or `escalate`, §4.8).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete | Event::Escalate)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "plan" => Event::Plan,
            "execute" => Event::Execute,
            "refine" => Event::Refine,
            "complete" => Event::Complete,
            "escalate" => Event::Escalate,
            other => Event::UnknownLiteral(other.to_string()),
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Outcome {
    /// The canonical wire literal for this value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Outcome::Merged => "merged",
            Outcome::Completed => "completed",
            Outcome::Escalated => "escalated",
            Outcome::Unknown(s) => s,
        }
    }

    /// Whether this outcome counts as a success for outcome recording (§4.8).
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed | Outcome::Merged)
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Outcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "merged" => Outcome::Merged,
            "completed" => Outcome::Completed,
            "escalated" => Outcome::Escalated,
            other => Outcome::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat or control utterance (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Correlates all messages for one unit of work.
    pub task_id: TaskId,
    /// Sender identity.
    pub agent: AgentName,
    /// Payload text.
    pub content: String,
    /// Semantic category controlling dispatch.
    pub intent: Intent,
    /// Assigned at creation; monotonic per sender.
    pub timestamp: DateTime<Utc>,
}

/// A [`Message`] with target and lifecycle metadata (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Correlates all messages for one unit of work.
    pub task_id: TaskId,
    /// Sender identity.
    pub agent: AgentName,
    /// Payload text.
    pub content: String,
    /// Semantic category controlling dispatch.
    pub intent: Intent,
    /// Assigned at creation; monotonic per sender.
    pub timestamp: DateTime<Utc>,
    /// Intended recipient channel.
    pub target_agent: AgentName,
    /// Lifecycle stage within the orchestrator state machine.
    pub event: Event,
    /// Sender's confidence in current content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Estimator output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Feature vector used for routing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

/// A [`Task`] with terminal outcome (§3). `intent` is always `modify_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Correlates all messages for one unit of work.
    pub task_id: TaskId,
    /// Sender identity.
    pub agent: AgentName,
    /// Payload text (one-sentence cause, for escalations; result content otherwise).
    pub content: String,
    /// Always `modify_task` for a `TaskResult`.
    pub intent: Intent,
    /// Assigned at creation; monotonic per sender.
    pub timestamp: DateTime<Utc>,
    /// Intended recipient channel.
    pub target_agent: AgentName,
    /// Lifecycle stage; always terminal (`complete` or `escalate`).
    pub event: Event,
    /// Sender's confidence in current content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Estimator output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Feature vector used for routing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
    /// Terminal disposition.
    pub outcome: Outcome,
    /// Agents that contributed, in order of first contribution.
    pub contributing_agents: Vec<AgentName>,
}

/// Resolves a decoded wire payload to the narrowest matching shape (§4.1, §9).
///
/// Unknown/malformed payloads are never an error at this layer: anything that
/// doesn't match a known shape becomes `Envelope::Unknown`, leaving the
/// decision to drop-and-count (§7) to the caller.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// A plain chat/control message.
    Message(Message),
    /// A task continuation.
    Task(Task),
    /// A terminal task result.
    TaskResult(TaskResult),
    /// A payload that didn't match any known shape, preserved verbatim.
    Unknown(serde_json::Value),
}

impl Envelope {
    /// Decodes a wire payload, selecting the narrowest shape that fits (§4.1).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedJson`] if `bytes` is not valid JSON at
    /// all. A payload that parses as JSON but matches no known envelope shape
    /// is `Ok(Envelope::Unknown(..))`, never an error — callers route it to
    /// the dead-letter handler per §7.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
        Ok(Self::from_value(value))
    }

    fn from_value(value: serde_json::Value) -> Self {
        let has_outcome = value.get("outcome").is_some();
        let has_task_shape = value.get("target_agent").is_some() && value.get("event").is_some();

        if has_outcome && has_task_shape {
            if let Ok(result) = serde_json::from_value::<TaskResult>(value.clone()) {
                return Envelope::TaskResult(result);
            }
        }
        if has_task_shape {
            if let Ok(task) = serde_json::from_value::<Task>(value.clone()) {
                return Envelope::Task(task);
            }
        }
        if let Ok(message) = serde_json::from_value::<Message>(value.clone()) {
            return Envelope::Message(message);
        }
        Envelope::Unknown(value)
    }

    /// Encodes this envelope back to its canonical JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error only if the underlying `serde_json` serialization
    /// fails, which does not happen for the well-typed variants; `Unknown`
    /// re-serializes the original parsed value.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let result = match self {
            Envelope::Message(m) => serde_json::to_vec(m),
            Envelope::Task(t) => serde_json::to_vec(t),
            Envelope::TaskResult(r) => serde_json::to_vec(r),
            Envelope::Unknown(v) => serde_json::to_vec(v),
        };
        result.map_err(|e| ProtocolError::MalformedJson(e.to_string()))
    }
}

/// A single field-level validation failure (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// Why the value is invalid.
    pub reason: String,
}

/// Validates that a [`Message`]'s `content` is non-empty (§8 boundary: empty
/// content is rejected before entering the state machine).
#[must_use]
pub fn validate_message(message: &Message) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if message.content.trim().is_empty() {
        errors.push(FieldError {
            field: "content".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    errors
}

/// Validates a [`Task`]'s content and, when present, its confidence bound.
#[must_use]
pub fn validate_task(task: &Task) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if task.content.trim().is_empty() {
        errors.push(FieldError {
            field: "content".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    errors
}

/// Validates a [`TaskResult`]'s content and contributing-agent ordering.
#[must_use]
pub fn validate_task_result(result: &TaskResult) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if result.content.trim().is_empty() {
        errors.push(FieldError {
            field: "content".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if result.contributing_agents.is_empty() {
        errors.push(FieldError {
            field: "contributing_agents".to_string(),
            reason: "must name at least one contributing agent".to_string(),
        });
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            task_id: TaskId::generate(),
            agent: AgentName::try_new("worker_a".to_string()).unwrap(),
            content: "hello world".to_string(),
            intent: Intent::Chat,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn message_round_trips_through_envelope() {
        let message = sample_message();
        let bytes = Envelope::Message(message.clone()).encode().unwrap();
        match Envelope::decode(&bytes).unwrap() {
            Envelope::Message(decoded) => {
                assert_eq!(decoded.task_id, message.task_id);
                assert_eq!(decoded.content, message.content);
                assert_eq!(decoded.intent, message.intent);
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn unknown_intent_literal_does_not_error() {
        let mut value = serde_json::to_value(sample_message()).unwrap();
        value["intent"] = serde_json::Value::String("frobnicate".to_string());
        let bytes = serde_json::to_vec(&value).unwrap();
        match Envelope::decode(&bytes).unwrap() {
            Envelope::Message(m) => {
                assert_eq!(m.intent, Intent::Unknown("frobnicate".to_string()));
            }
            other => panic!("expected Message with unknown intent, got {other:?}"),
        }
    }

    #[test]
    fn completely_unrecognized_payload_becomes_unknown_envelope() {
        let bytes = br#"{"totally":"unrelated"}"#;
        match Envelope::decode(bytes).unwrap() {
            Envelope::Unknown(_) => {}
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        let bytes = b"{not json";
        assert!(Envelope::decode(bytes).is_err());
    }

    #[test]
    fn timestamp_tolerates_z_and_offset_suffix() {
        let json_z = r#"{"task_id":"00000000-0000-0000-0000-000000000001","agent":"a","content":"hi","intent":"chat","timestamp":"2025-03-26T14:00:00Z"}"#;
        let json_offset = r#"{"task_id":"00000000-0000-0000-0000-000000000001","agent":"a","content":"hi","intent":"chat","timestamp":"2025-03-26T14:00:00+00:00"}"#;
        let a: Message = serde_json::from_str(json_z).unwrap();
        let b: Message = serde_json::from_str(json_offset).unwrap();
        assert_eq!(a.timestamp, b.timestamp);
    }

    #[test]
    fn empty_content_fails_validation() {
        let mut message = sample_message();
        message.content = "   ".to_string();
        let errors = validate_message(&message);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "content");
    }

    #[test]
    fn task_result_requires_contributing_agents() {
        let result = TaskResult {
            task_id: TaskId::generate(),
            agent: AgentName::try_new("moderator".to_string()).unwrap(),
            content: "done".to_string(),
            intent: Intent::ModifyTask,
            timestamp: Utc::now(),
            target_agent: AgentName::try_new("frontend".to_string()).unwrap(),
            event: Event::Complete,
            confidence: None,
            reasoning_effort: None,
            diagnostics: None,
            outcome: Outcome::Completed,
            contributing_agents: Vec::new(),
        };
        let errors = validate_task_result(&result);
        assert!(errors.iter().any(|e| e.field == "contributing_agents"));
    }

    #[test]
    fn reasoning_effort_bump_saturates_at_high() {
        assert_eq!(ReasoningEffort::Low.bump(), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::Medium.bump(), ReasoningEffort::High);
        assert_eq!(ReasoningEffort::High.bump(), ReasoningEffort::High);
    }
}
