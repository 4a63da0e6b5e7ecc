pub mod cli;
pub mod submit;

pub use cli::*;
pub use submit::*;
