//! Command-line interface of `objaddr`

mod args;

pub use args::{parse_address, Args, OutputFormat};
