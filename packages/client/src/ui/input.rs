//! Line editor helper that reports typing activity while a line is edited.

use rustyline::{
    Context, Helper, completion::Completer, highlight::Highlighter, hint::Hinter,
    validate::Validator,
};
use tokio::sync::mpsc;

/// Input from the line editor thread, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A submitted line
    Line(String),
    /// The line being edited changed; `true` while it has content
    Typing(bool),
}

/// rustyline helper whose hinter runs on every edit and forwards whether the
/// current line has content.
pub struct TypingHinter {
    events: mpsc::UnboundedSender<InputEvent>,
}

impl TypingHinter {
    pub fn new(events: mpsc::UnboundedSender<InputEvent>) -> Self {
        Self { events }
    }

    fn notify(&self, line: &str) {
        // receiver gone means the loop is shutting down
        let _ = self
            .events
            .send(InputEvent::Typing(!line.trim().is_empty()));
    }
}

impl Completer for TypingHinter {
    type Candidate = String;
}

impl Hinter for TypingHinter {
    type Hint = String;

    fn hint(&self, line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        self.notify(line);
        None
    }
}

impl Highlighter for TypingHinter {}

impl Validator for TypingHinter {}

impl Helper for TypingHinter {}
