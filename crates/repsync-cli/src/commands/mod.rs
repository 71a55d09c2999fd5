pub mod add;
pub mod common;
pub mod completions;
pub mod delete;
pub mod errors;
pub mod insight;
pub mod list;
pub mod status;
pub mod sync;
