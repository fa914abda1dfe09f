mod error;
mod naming;
mod types;

pub use error::*;
pub use naming::*;
pub use types::*;
