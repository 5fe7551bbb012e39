pub mod config;
pub mod sampling;
pub mod objective;
pub mod errors;

pub use config::*;
pub use sampling::*;
pub use objective::*;
pub use errors::*;
