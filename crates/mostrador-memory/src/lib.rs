//! Mostrador Memory - session turns, long-term memories and auth records
//!
//! Two tiers: an ordered turn log per session, and distilled user memories
//! plus session summaries per agent. Stores are named (`ia`, `nube`) and
//! bound explicitly by each agent and by the gateway.

pub mod context;
pub mod distill;
pub mod journal;
pub mod registry;
pub mod store;

pub use context::{recent_conversation, MemoryContext};
pub use distill::{parse_candidates, Distiller, MemoryCandidate, Summarizer};
pub use journal::{FileJournal, Journal, NoJournal, Record};
pub use registry::StoreRegistry;
pub use store::{
    append_tool_turn, reconcile_partial_turns, AuthRecordStore, FileStore, InMemoryStore, JournaledStore, MemoryStore,
};
