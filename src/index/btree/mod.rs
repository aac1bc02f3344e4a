pub mod error;
pub mod node;
pub mod codec;
pub mod index;
pub mod iterator;

pub use error::BTreeError;
pub use index::BPlusTree;
pub use iterator::BTreeIterator;
pub use node::{BTreeNode, NodeType};
pub use codec::{deserialize_node, serialize_node};
