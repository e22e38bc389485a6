//! User interface module

mod cli;

pub use cli::*;
