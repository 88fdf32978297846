pub mod cow_stats;
pub mod frame_allocator;
pub mod frame_metadata;
pub mod layout;
pub mod paging;
pub mod process_memory;

pub use frame_allocator::PhysicalMemory;
pub use paging::PagePerm;
pub use process_memory::{ProcessPageTable, Pte};
