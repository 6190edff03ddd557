mod blame_cache_entry;
pub use blame_cache_entry::*;

mod blame_config;
pub use blame_config::*;

mod blame_error;
pub use blame_error::*;

mod blame_event;
pub use blame_event::*;

mod blame_future;
pub use blame_future::*;

mod blame_info;
pub use blame_info::*;

mod blame_info_builder;
pub use blame_info_builder::*;

mod blame_observer;
pub use blame_observer::*;

mod blame_process;
pub use blame_process::*;

mod incremental_parser;
pub use incremental_parser::*;
