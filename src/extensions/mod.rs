mod git_tools;
pub(crate) use git_tools::*;

mod line_read_buffer;
pub use line_read_buffer::*;
