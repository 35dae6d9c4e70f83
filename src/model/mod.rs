//! Core data model types for hashbox

mod hash;

pub use hash::{ContentHash, HASH_LEN};
