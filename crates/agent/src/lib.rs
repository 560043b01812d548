//! Conversation pipeline for marketplace customer support.
//!
//! One inbound customer message flows through:
//! 1. **Classification** (`classifier`): keyword intent table plus entity patterns
//! 2. **Enrichment** (`enrichment`): order and product lookups merged into session context
//! 3. **Escalation** (`escalation`): ordered rule chain deciding on human hand-off
//! 4. **Generation** (`responder`): prompt assembly and a bounded model call
//! 5. **Bookkeeping** (`session`): the USER/ASSISTANT pair and session update in one write
//!
//! `runtime::AgentRuntime` wires these together and serializes turns per session.
//!
//! The model only writes reply text. Intent, escalation and every persisted
//! fact are decided deterministically before or after the model call.

pub mod audit_sink;
pub mod classifier;
pub mod config_store;
pub mod enrichment;
pub mod escalation;
pub mod llm;
pub mod providers;
pub mod responder;
pub mod runtime;
pub mod session;
pub mod suggestions;

pub use runtime::{AgentRuntime, RuntimeDeps, RuntimeSettings, TurnResult, TurnStatus};
