//! Prompt assembly.
//!
//! | Position | Source | Trim strategy |
//! |----------|--------|---------------|
//! | 1. System | Resolved profile | Only by the global safety net |
//! | 2. Sticky header | `StickyStore::render` | Only by the global safety net |
//! | 3. History | `HistoryStore::recent` | Count, then char budget, oldest first |
//! | 4. New user turn | Request | Never trimmed |

pub mod assembler;

pub use assembler::{AssembledPrompt, AssemblyMetadata, GLOBAL_FLOOR_CHARS, PromptAssembler, enforce_global_budget};
