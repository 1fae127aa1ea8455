use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;
use transcript_analyzer_schemas::{AggregatedEvent, Conversation, ALL_EVENT_TYPES, EVENT_TYPES};

use crate::parser;

/// Cross-conversation memory view: the filtered flat list, the same list
/// grouped by type in first-seen order, and the types worth offering as
/// filters.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedView {
    /// Total events before type filtering.
    pub total: usize,
    pub filtered: Vec<AggregatedEvent>,
    pub grouped: Vec<(String, Vec<AggregatedEvent>)>,
    pub available_types: Vec<String>,
}

/// Flatten every conversation's memory events into one tagged sequence.
///
/// Conversations whose stored field fails to parse contribute zero events and
/// are skipped; one malformed field never fails the whole aggregation.
pub fn aggregate(conversations: &[Conversation], selected_type: &str) -> AggregatedView {
    let mut all = Vec::new();

    for conversation in conversations {
        let events = match parser::parse_memory(conversation.memory_analysis.as_deref()) {
            Ok(events) => events,
            Err(e) => {
                debug!(
                    "Skipping unparseable memory analysis for {}: {}",
                    conversation.id, e
                );
                continue;
            }
        };

        for event in events {
            all.push(AggregatedEvent {
                event,
                conversation_name: conversation.name.clone(),
                conversation_date: conversation.conversation_date.clone(),
                conversation_number: conversation.conversation_number,
            });
        }
    }

    let present: HashSet<&str> = all.iter().map(|e| e.event.event_type.as_str()).collect();
    let mut available_types = vec![ALL_EVENT_TYPES.to_string()];
    available_types.extend(
        EVENT_TYPES
            .iter()
            .filter(|t| present.contains(**t))
            .map(|t| t.to_string()),
    );

    let total = all.len();
    let filtered: Vec<AggregatedEvent> = if selected_type == ALL_EVENT_TYPES {
        all
    } else {
        all.into_iter()
            .filter(|e| e.event.event_type == selected_type)
            .collect()
    };

    let mut grouped: Vec<(String, Vec<AggregatedEvent>)> = Vec::new();
    for event in &filtered {
        match grouped
            .iter_mut()
            .find(|(event_type, _)| *event_type == event.event.event_type)
        {
            Some((_, bucket)) => bucket.push(event.clone()),
            None => grouped.push((event.event.event_type.clone(), vec![event.clone()])),
        }
    }

    AggregatedView {
        total,
        filtered,
        grouped,
        available_types,
    }
}
