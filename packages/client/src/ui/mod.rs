//! Terminal presentation for the client binary.

pub mod formatter;
pub mod input;
pub mod prompt;
pub mod render;

pub use formatter::MessageFormatter;
pub use input::{InputEvent, TypingHinter};
pub use prompt::redisplay_prompt;
pub use render::TimelineRenderer;
