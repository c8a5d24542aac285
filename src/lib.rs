// ZapLine Engine — crate root
//
// Layering:
//   atoms/   — pure constants, error types, data types, trait seams (no I/O)
//   engine/  — the message-processing core: store, ratelimit, memory,
//              knowledge, segmenter, dispatcher, pipeline, providers, whatsapp
//
// The engine is consumed two ways: embedded as a library by the SaaS control
// plane (which implements the AgentDirectory / KnowledgeSource / UsageLedger
// seams against its own database), or standalone via the `zapline` binary,
// which wires the in-memory implementations from a JSON config file.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
