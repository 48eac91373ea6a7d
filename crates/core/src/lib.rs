//! Task Extraction Core Library
//!
//! Turns free-form (Chinese) task descriptions into structured task fields:
//! - Model-backed extraction (Ollama, OpenAI, Anthropic, OpenAI-compatible)
//! - Rule-based fallback extraction
//! - Weekday/time phrase resolution into start or due instants
//! - A facade owning timeouts, fallback and last-call-wins ordering

pub mod types;

pub mod config;
pub mod datetime;
pub mod error;
pub mod facade;
pub mod llm;
pub mod rules;

// Re-export commonly used types at crate root
pub use config::{AiBackendConfig, Provider, SamplingOptions};
pub use error::ExtractionError;
pub use facade::{ExtractionFacade, RequestTicket, ANALYZE_TIMEOUT, IMPORT_TIMEOUT};
pub use types::{
    default_tags, tag_names, ExtractionResult, KnownTag, Priority, TagColor, TaskDate, TaskDraft,
    TimeResolution,
};

pub use datetime::resolve;
pub use rules::extract_task_rules;
