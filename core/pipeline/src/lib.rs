pub mod aggregator;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod store;

pub use aggregator::{aggregate, AggregatedView};
pub use error::{AnalysisError, ModelError, ParseError, StoreError};
pub use model::{GatewayClient, GatewayConfig, ModelInvoker};
pub use orchestrator::{ConversationStates, ConversationView, Orchestrator, SubmissionOutcome};
pub use store::{ConversationStore, SqliteStore};
