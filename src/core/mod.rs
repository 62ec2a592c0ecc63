/*!
 * Core Module
 * Fundamental heap types, limits and synchronization
 */

pub mod limits;
pub mod sync;
pub mod types;

// Re-export for convenience
pub use types::*;
