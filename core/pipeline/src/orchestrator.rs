use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use transcript_analyzer_schemas::{AnalysisKind, AnalysisState, Conversation, ConversationId};

use crate::aggregator::{self, AggregatedView};
use crate::error::{AnalysisError, StoreError};
use crate::model::ModelInvoker;
use crate::parser;
use crate::store::ConversationStore;

/// Snapshot of both kinds' run states for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversationStates {
    pub memory: AnalysisState,
    pub language: AnalysisState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub states: ConversationStates,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub conversation: Conversation,
    pub states: ConversationStates,
}

struct Inner {
    /// Cached copy for browsing; the store is the source of truth.
    conversations: Vec<Conversation>,
    states: HashMap<(ConversationId, AnalysisKind), AnalysisState>,
}

/// Owns the per-conversation dual-analysis state machine.
///
/// All shared mutable state (the conversation cache and the state map) lives
/// behind this type and is only touched through its methods. The two runs for
/// one submission write to different state-map keys, so their interleavings
/// never race on the same slot.
pub struct Orchestrator {
    store: Arc<Mutex<Box<dyn ConversationStore>>>,
    model: Arc<dyn ModelInvoker>,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(store: Box<dyn ConversationStore>, model: Arc<dyn ModelInvoker>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            model,
            inner: Mutex::new(Inner {
                conversations: Vec::new(),
                states: HashMap::new(),
            }),
        }
    }

    /// Refresh the cache from the store. States are derived: a persisted
    /// analysis field means `complete`, otherwise `idle`; the model is never
    /// re-invoked on reload. On read failure the prior cache stays as-is.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let listed = self.store.lock().await.list();

        match listed {
            Ok(conversations) => {
                let mut inner = self.inner.lock().await;
                inner.states = conversations
                    .iter()
                    .flat_map(|c| {
                        [AnalysisKind::Memory, AnalysisKind::Language].map(|kind| {
                            ((c.id.clone(), kind), derived_state(c, kind))
                        })
                    })
                    .collect();
                inner.conversations = conversations;
                info!("Loaded {} conversations", inner.conversations.len());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load conversations, keeping cached list: {}", e);
                Err(e)
            }
        }
    }

    /// Submit a new transcript: create the conversation record, then run both
    /// analysis kinds concurrently and independently. Creation must succeed
    /// before either run starts; the runs' failures are isolated from each
    /// other and reported per kind.
    pub async fn submit(
        &self,
        transcript: &str,
        name: &str,
        conversation_date: &str,
    ) -> Result<SubmissionOutcome, StoreError> {
        let conversation = self
            .store
            .lock()
            .await
            .insert(transcript, name, conversation_date)?;
        let id = conversation.id.clone();

        {
            let mut inner = self.inner.lock().await;
            inner
                .states
                .insert((id.clone(), AnalysisKind::Memory), AnalysisState::Idle);
            inner
                .states
                .insert((id.clone(), AnalysisKind::Language), AnalysisState::Idle);
            inner.conversations.insert(0, conversation.clone());
        }

        info!(
            "Conversation #{} created, running analyses",
            conversation.conversation_number
        );

        let (memory, language) = tokio::join!(
            self.run_analysis(&id, transcript, AnalysisKind::Memory),
            self.run_analysis(&id, transcript, AnalysisKind::Language),
        );

        let conversation = self.conversation(&id).await.unwrap_or(conversation);
        Ok(SubmissionOutcome {
            conversation,
            states: ConversationStates { memory, language },
        })
    }

    /// Drive one analysis kind for one conversation to `complete` or `error`.
    ///
    /// The model's raw text is persisted verbatim; parsing happens lazily at
    /// display time, so a parser change never requires re-running analyses.
    /// No retry and no rollback on failure.
    pub async fn run_analysis(
        &self,
        id: &ConversationId,
        transcript: &str,
        kind: AnalysisKind,
    ) -> AnalysisState {
        self.set_state(id, kind, AnalysisState::Loading).await;

        match self.invoke_and_persist(id, transcript, kind).await {
            Ok(raw) => {
                let mut inner = self.inner.lock().await;
                if let Some(cached) = inner.conversations.iter_mut().find(|c| c.id == *id) {
                    match kind {
                        AnalysisKind::Memory => cached.memory_analysis = Some(raw),
                        AnalysisKind::Language => cached.language_analysis = Some(raw),
                    }
                }
                inner.states.insert((id.clone(), kind), AnalysisState::Complete);
                AnalysisState::Complete
            }
            Err(e) => {
                warn!("{} analysis failed for {}: {}", kind, id, e);
                self.set_state(id, kind, AnalysisState::Error).await;
                AnalysisState::Error
            }
        }
    }

    /// Model call followed by the durable write. A persist failure after a
    /// successful call still fails the run; the result was never saved.
    async fn invoke_and_persist(
        &self,
        id: &ConversationId,
        transcript: &str,
        kind: AnalysisKind,
    ) -> Result<String, AnalysisError> {
        let raw = self.model.invoke(kind, transcript).await?;
        self.store.lock().await.update_analysis(id, kind, &raw)?;
        Ok(raw)
    }

    /// Re-run a single kind, overwriting the previously stored value.
    /// Returns None for an unknown conversation.
    pub async fn rerun(&self, id: &ConversationId, kind: AnalysisKind) -> Option<AnalysisState> {
        let transcript = self.conversation(id).await?.raw_transcript;
        Some(self.run_analysis(id, &transcript, kind).await)
    }

    /// Delete from the store, then drop the cache entry and both state slots.
    pub async fn delete(&self, id: &ConversationId) -> Result<(), StoreError> {
        self.store.lock().await.delete(id)?;

        let mut inner = self.inner.lock().await;
        inner.conversations.retain(|c| c.id != *id);
        inner.states.remove(&(id.clone(), AnalysisKind::Memory));
        inner.states.remove(&(id.clone(), AnalysisKind::Language));
        Ok(())
    }

    pub async fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        let inner = self.inner.lock().await;
        inner.conversations.iter().find(|c| c.id == *id).cloned()
    }

    pub async fn conversations(&self) -> Vec<ConversationView> {
        let inner = self.inner.lock().await;
        inner
            .conversations
            .iter()
            .map(|conversation| ConversationView {
                conversation: conversation.clone(),
                states: ConversationStates {
                    memory: state_in(&inner.states, &conversation.id, AnalysisKind::Memory),
                    language: state_in(&inner.states, &conversation.id, AnalysisKind::Language),
                },
            })
            .collect()
    }

    pub async fn state_of(&self, id: &ConversationId, kind: AnalysisKind) -> AnalysisState {
        let inner = self.inner.lock().await;
        state_in(&inner.states, id, kind)
    }

    /// Cross-conversation memory view, computed from the current cache.
    pub async fn aggregate(&self, selected_type: &str) -> AggregatedView {
        let inner = self.inner.lock().await;
        aggregator::aggregate(&inner.conversations, selected_type)
    }

    async fn set_state(&self, id: &ConversationId, kind: AnalysisKind, state: AnalysisState) {
        let mut inner = self.inner.lock().await;
        inner.states.insert((id.clone(), kind), state);
    }
}

fn state_in(
    states: &HashMap<(ConversationId, AnalysisKind), AnalysisState>,
    id: &ConversationId,
    kind: AnalysisKind,
) -> AnalysisState {
    states
        .get(&(id.clone(), kind))
        .copied()
        .unwrap_or(AnalysisState::Idle)
}

fn derived_state(conversation: &Conversation, kind: AnalysisKind) -> AnalysisState {
    if parser::is_no_analysis(conversation.analysis_text(kind)) {
        AnalysisState::Idle
    } else {
        AnalysisState::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(memory: Option<&str>, language: Option<&str>) -> Conversation {
        Conversation {
            id: ConversationId("conv_test".into()),
            conversation_number: 1,
            name: "Sam".into(),
            conversation_date: "2024-01-01".into(),
            raw_transcript: "hello".into(),
            memory_analysis: memory.map(str::to_string),
            language_analysis: language.map(str::to_string),
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_derived_state_from_persisted_fields() {
        let c = conversation(Some("[]"), None);
        assert_eq!(
            derived_state(&c, AnalysisKind::Memory),
            AnalysisState::Complete
        );
        assert_eq!(derived_state(&c, AnalysisKind::Language), AnalysisState::Idle);
    }

    #[test]
    fn test_literal_null_field_stays_idle() {
        let c = conversation(Some("null"), Some(""));
        assert_eq!(derived_state(&c, AnalysisKind::Memory), AnalysisState::Idle);
        assert_eq!(derived_state(&c, AnalysisKind::Language), AnalysisState::Idle);
    }
}
