mod file_watch;
pub use file_watch::*;
