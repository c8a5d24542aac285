// ── ZapLine Atoms Layer ────────────────────────────────────────────────────
// Pure constants, error types, data types, and trait seams — zero side
// effects, no I/O. Nothing here may import from engine/ or main.rs.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
