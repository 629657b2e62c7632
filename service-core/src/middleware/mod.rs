pub mod caller;
pub mod tracing;

pub use caller::CallerContext;
