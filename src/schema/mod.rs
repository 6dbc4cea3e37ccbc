pub mod table;
pub mod types;

pub use table::*;
pub use types::*;
