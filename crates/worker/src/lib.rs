pub mod handlers;
pub mod pool;
pub mod registry;

pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use registry::HandlerRegistry;
