//! Mostrador Core - shared types, descriptors, configuration and errors

pub mod config;
pub mod descriptor;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use descriptor::{AgentDescriptor, KnowledgeRef, MemoryPolicy, TeamDescriptor, TeamMember};
pub use error::{Error, ErrorKind, Result};
pub use types::*;
