//! Order-preserving key encoding and the inheriting ordered tree that
//! the in-memory virtual-table module layers transaction state on top of.

pub mod codec;
pub mod tree;

pub use codec::{decode_key, encode_key, encode_value};
pub use tree::InheritingMap;
