pub mod common;
pub mod completions;
pub mod dead_letter;
pub mod infraction;
pub mod offline;
pub mod status;
pub mod sync;
pub mod ticket;
pub mod vehicle;
pub mod watch;
