// ABOUTME: Lead-side orchestration: pool sizing and task delegation
// ABOUTME: Sizing is a pure heuristic; delegation fans out through the bus

pub mod delegate;
pub mod pool;

pub use delegate::{build_prompt, delegate};
pub use pool::size_pool;
