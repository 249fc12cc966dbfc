pub mod config;
pub mod drive;
pub mod links;
pub mod names;
pub mod watch;
