//! CLI surface: argument parsing, settings file, command handling.

pub mod arg_parser;
pub mod handlers;
mod settings;

pub use arg_parser::{Algorithm, Cli};
pub use handlers::handle_scan;
