//! Absentia common library - absence-notification core
//!
//! Everything the dialogue daemon needs to run a conversation:
//! the knowledge base loader, the forward/backward inference engine,
//! the derived-state pass, text normalization, and the per-session
//! dialogue state machine. External collaborators (employee directory,
//! case repository, identifier store) are traits; an in-memory and a
//! SQLite implementation are provided.

pub mod collaborators;
pub mod config;
pub mod derive;
pub mod dialogue;
pub mod engine;
pub mod error;
pub mod explain;
pub mod facts;
pub mod kb;
pub mod normalize;
pub mod prompts;
pub mod session;
pub mod sqlite_store;
