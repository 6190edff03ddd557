mod cli;
pub use cli::*;

pub mod blame;

mod extensions;
pub use extensions::*;

pub mod watch;
