/*!
 * Core Types
 * Common types used across the heap
 */

/// Byte address inside a segment, as handed out to callers
pub type Address = usize;

/// Size type for memory operations (bytes unless stated otherwise)
pub type Size = usize;

/// Index of a word inside the heap body
pub type WordIndex = usize;

/// The null address. Never a valid payload address because the Header occupies the low words.
pub const NULL: Address = 0;
