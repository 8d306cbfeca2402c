pub mod tag;

pub use tag::{build_tagger, handle_tag_command, TagCommands};
