#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::similar_names,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

pub mod archive;
pub mod assistant;
pub mod auth;
pub mod config;
pub mod groups;
pub mod router;
pub mod signal;
pub mod util;

pub use config::Config;
