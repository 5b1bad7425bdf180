//! Language model plumbing used by the studio assistant.

pub mod llm;
