pub mod allocator;
pub mod counter;
pub mod destroy_queue;
pub mod slot;
