//! Arena memory management: block directory and heap engines.

mod block;
pub mod heap;

pub use block::HEADER_SIZE;
pub use heap::{Heap, HeapStats, ALIGNMENT};
