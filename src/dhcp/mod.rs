pub mod extensions;
pub mod handlers;
pub mod pool;
pub mod worker;

pub use pool::{LeasePool, PoolError};
pub use worker::v4_worker;

#[cfg(test)]
mod tests;
