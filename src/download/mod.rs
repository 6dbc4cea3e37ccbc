pub mod cache;
pub mod client;
pub mod locator;

pub use cache::*;
pub use client::*;
pub use locator::*;
