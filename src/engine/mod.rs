// ZapLine Engine — module layout
//
//   store       — shared key-value store: primitive trait + process-wide Redis client
//   ratelimit   — sliding-window admission control per (agent, contact)
//   memory      — bounded, expiring conversation log
//   knowledge   — additive relevance-scoring retrieval over the knowledge pool
//   segmenter   — splits long replies into human-sized chunks (pure)
//   dispatcher  — outbound delivery: presence simulation, retries, backoff
//   pipeline    — per-event orchestrator state machine + prompt assembly
//   providers   — chat-completion model client
//   whatsapp    — gateway surfaces: webhook listener, envelope extraction, API client

pub mod dispatcher;
pub mod knowledge;
pub mod memory;
pub mod pipeline;
pub mod providers;
pub mod ratelimit;
pub mod segmenter;
pub mod store;
pub mod whatsapp;
