use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn generate_conversation_id() -> ConversationId {
    ConversationId(format!("conv_{}", ulid::Ulid::new()))
}

// ============================================================================
// Conversation Schema
// ============================================================================

/// A submitted transcript plus the raw text of its two analyses.
///
/// The analysis fields hold whatever the model returned, verbatim: `None`,
/// the literal string "null", fenced or bare JSON, or non-compliant prose.
/// Parsing happens at display time, never at persistence time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Monotonic display ordinal assigned by the store.
    pub conversation_number: i64,
    pub name: String,
    /// Calendar date of the dialogue (YYYY-MM-DD), distinct from created_at.
    pub conversation_date: String,
    /// Immutable once created.
    pub raw_transcript: String,
    pub memory_analysis: Option<String>,
    pub language_analysis: Option<String>,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

impl Conversation {
    pub fn analysis_text(&self, kind: AnalysisKind) -> Option<&str> {
        match kind {
            AnalysisKind::Memory => self.memory_analysis.as_deref(),
            AnalysisKind::Language => self.language_analysis.as_deref(),
        }
    }
}

// ============================================================================
// Analysis Kind and State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisKind {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "language")]
    Language,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Memory => "memory",
            AnalysisKind::Language => "language",
        }
    }

    /// Column the raw analysis text is persisted under.
    pub fn field_name(&self) -> &'static str {
        match self {
            AnalysisKind::Memory => "memory_analysis",
            AnalysisKind::Language => "language_analysis",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(AnalysisKind::Memory),
            "language" => Some(AnalysisKind::Language),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-conversation, per-kind run state. Transient: reconstructed on reload,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisState {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "loading")]
    Loading,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Idle => "idle",
            AnalysisState::Loading => "loading",
            AnalysisState::Complete => "complete",
            AnalysisState::Error => "error",
        }
    }
}

// ============================================================================
// Memory Event Schema
// ============================================================================

/// One durable, continuity-relevant fact extracted from a transcript.
///
/// `event_type` and `status` are open strings on purpose: the model is told
/// to stick to the known catalogs below, but unknown values must degrade to
/// fallback styling rather than fail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default, rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>, // ISO-8601, optional
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub kind: String,
    /// Verbatim quotes from the transcript.
    #[serde(default)]
    pub r#ref: Vec<String>,
}

/// The nine event types the extraction prompt allows, in display order.
pub const EVENT_TYPES: &[&str] = &[
    "goal",
    "decision",
    "preference",
    "belief",
    "constraint",
    "plan",
    "question",
    "insight",
    "emotion",
];

/// Statuses with dedicated styling; anything else renders unstyled.
pub const EVENT_STATUSES: &[&str] = &[
    "asserted",
    "tentative",
    "resolved",
    "expired",
    "unresolved",
];

/// Filter sentinel meaning "no type filter".
pub const ALL_EVENT_TYPES: &str = "all";

pub fn is_known_event_type(value: &str) -> bool {
    EVENT_TYPES.contains(&value)
}

pub fn is_known_event_status(value: &str) -> bool {
    EVENT_STATUSES.contains(&value)
}

// ============================================================================
// Language Analysis Schema
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageAnalysis {
    pub scores: Scores,
    #[serde(default)]
    pub mistakes: Vec<Mistake>,
    #[serde(default)]
    pub dimension_evidence: DimensionEvidence,
}

/// Scores are nominally integers in 1..=3, but the model is not trusted to
/// comply, so they are read as plain numbers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scores {
    #[serde(default)]
    pub clarity: f64,
    #[serde(default)]
    pub range: f64,
    #[serde(default)]
    pub flow: f64,
    #[serde(default)]
    pub overall: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mistake {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quote: String,
    #[serde(default)]
    pub correction: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DimensionEvidence {
    #[serde(default)]
    pub clarity: Vec<String>,
    #[serde(default)]
    pub range: Vec<String>,
    #[serde(default)]
    pub flow: Vec<String>,
}

/// The seventeen mistake categories the scoring prompt allows.
pub const MISTAKE_CATEGORIES: &[&str] = &[
    "articles",
    "prepositions",
    "pronouns",
    "tense",
    "nouns",
    "word_order",
    "word_form",
    "determiners",
    "verb_form",
    "verb_agreement",
    "adjectives",
    "adverbs",
    "particles",
    "plurals",
    "conjunctions",
    "vocabulary",
    "other",
];

/// Unrecognized categories collapse to "other" for display; they are never
/// rejected.
pub fn normalize_mistake_category(value: &str) -> &str {
    if MISTAKE_CATEGORIES.contains(&value) {
        value
    } else {
        "other"
    }
}

// ============================================================================
// Aggregated View Schema
// ============================================================================

/// A memory event annotated with its source conversation. Derived and
/// read-only: recomputed whenever the conversation set changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedEvent {
    #[serde(flatten)]
    pub event: MemoryEvent,
    pub conversation_name: String,
    pub conversation_date: String,
    pub conversation_number: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let id = generate_conversation_id();
        assert!(id.0.starts_with("conv_"));
        assert_eq!(id.0.len(), 31); // "conv_" + 26 chars
    }

    #[test]
    fn test_analysis_kind_round_trip() {
        assert_eq!(AnalysisKind::parse("memory"), Some(AnalysisKind::Memory));
        assert_eq!(AnalysisKind::parse("language"), Some(AnalysisKind::Language));
        assert_eq!(AnalysisKind::parse("sentiment"), None);
        assert_eq!(AnalysisKind::Memory.field_name(), "memory_analysis");
        assert_eq!(AnalysisKind::Language.field_name(), "language_analysis");
    }

    #[test]
    fn test_memory_event_deserializes_with_missing_fields() {
        let event: MemoryEvent = serde_json::from_str(r#"{"type":"preference"}"#).unwrap();
        assert_eq!(event.event_type, "preference");
        assert!(event.event_id.is_empty());
        assert!(event.evidence.is_empty());
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn test_unknown_type_and_status_pass_through() {
        let event: MemoryEvent =
            serde_json::from_str(r#"{"type":"ritual","status":"mythic"}"#).unwrap();
        assert_eq!(event.event_type, "ritual");
        assert_eq!(event.status, "mythic");
        assert!(!is_known_event_type(&event.event_type));
        assert!(!is_known_event_status(&event.status));
    }

    #[test]
    fn test_evidence_serializes_ref_key() {
        let event = MemoryEvent {
            event_id: "e1".into(),
            event_type: "preference".into(),
            evidence: vec![Evidence {
                kind: "quote".into(),
                r#ref: vec!["I love hiking".into()],
            }],
            ..Default::default()
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["evidence"][0]["ref"][0], "I love hiking");
        assert_eq!(json["type"], "preference");
    }

    #[test]
    fn test_mistake_category_fallback() {
        assert_eq!(normalize_mistake_category("tense"), "tense");
        assert_eq!(normalize_mistake_category("emoji_misuse"), "other");
    }

    #[test]
    fn test_language_analysis_deserialization() {
        let json = r#"{
            "scores": {"clarity": 3, "range": 2, "flow": 2, "overall": 2},
            "mistakes": [
                {"category": "tense", "description": "wrong tense", "quote": "I goed", "correction": "I went"}
            ],
            "dimension_evidence": {"clarity": ["short sentences"], "range": [], "flow": []}
        }"#;

        let analysis: LanguageAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.scores.overall, 2.0);
        assert_eq!(analysis.mistakes.len(), 1);
        assert_eq!(analysis.dimension_evidence.clarity.len(), 1);
    }

    #[test]
    fn test_aggregated_event_flattens_source_fields() {
        let aggregated = AggregatedEvent {
            event: MemoryEvent {
                event_id: "e1".into(),
                event_type: "goal".into(),
                ..Default::default()
            },
            conversation_name: "Sam".into(),
            conversation_date: "2024-01-01".into(),
            conversation_number: 7,
        };

        let json = serde_json::to_value(&aggregated).unwrap();
        assert_eq!(json["event_id"], "e1");
        assert_eq!(json["conversation_name"], "Sam");
        assert_eq!(json["conversation_number"], 7);
    }
}
