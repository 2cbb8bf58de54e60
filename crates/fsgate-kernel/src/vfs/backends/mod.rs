//! Storage drivers.

pub mod artifact;
mod buffer;
mod local;
mod memory;
pub mod object;
pub mod remote;

pub use buffer::WriteBuffer;
pub use local::LocalBackend;
pub use memory::MemoryBackend;
