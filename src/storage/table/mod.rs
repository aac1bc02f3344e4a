pub mod tuple;
pub mod table_heap;

pub use tuple::Tuple;
pub use table_heap::{TableHeap, TableHeapError};
