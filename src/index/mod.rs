//! Secondary index for the advertisement cache
//!
//! Maps (namespace, attribute name, attribute value) to the set of locators
//! whose records carry that attribute. Attribute pairs come from the caller's
//! field extractor; the index itself never looks inside a payload.
//!
//! The index is in-memory only. It is kept in lockstep with primary-store
//! writes and deletes, and is regenerated from the store by a full rebuild
//! at startup.

mod attr;
mod pattern;

pub use attr::AttributeIndex;
pub use pattern::ValuePattern;
