//! Coloured terminal output for the CLI.

mod output;
mod status;

pub use output::{format_duration, print_key_value, print_section_header, print_summary_box};
pub use status::{print_error, print_success, print_warning};
