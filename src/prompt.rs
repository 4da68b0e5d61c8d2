use crate::models::{ChatMessage, Message, PromptFrame, Role};

/// Directive bundled with the service; replaced via `--directive-file`.
pub const DEFAULT_DIRECTIVE: &str = include_str!("prompts/directive.md");

/// How much stored history is replayed to the model on each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    /// The last N user/assistant messages.
    Messages(usize),
    /// Everything from the Nth most recent user message onwards.
    Exchanges(usize),
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow::Exchanges(3)
    }
}

/// Builds the message sequence sent to inference for one turn.
///
/// The frame always opens with exactly one system message: the directive,
/// followed by any system notes found inside the history window and the
/// document context for this turn. Document context is never written back
/// into the stored conversation.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    directive: String,
    window: HistoryWindow,
}

impl PromptAssembler {
    pub fn new(directive: impl Into<String>, window: HistoryWindow) -> Self {
        Self {
            directive: directive.into(),
            window,
        }
    }

    pub fn window(&self) -> HistoryWindow {
        self.window
    }

    pub fn build(
        &self,
        history: &[Message],
        utterance: &str,
        document_context: Option<&str>,
    ) -> PromptFrame {
        let windowed = self.windowed(history);

        let directive = self.directive.trim();
        let mut system = directive.to_string();
        let mut seen_notes: Vec<&str> = Vec::new();
        for note in windowed.iter().filter(|m| m.role == Role::System) {
            let text = note.content.trim();
            if text.is_empty() || text == directive || seen_notes.contains(&text) {
                continue;
            }
            seen_notes.push(text);
            append_section(&mut system, text);
        }
        if let Some(context) = document_context.map(str::trim).filter(|c| !c.is_empty()) {
            append_section(
                &mut system,
                &format!(
                    "Use the following document content to answer the user's questions:\n\"\"\"\n{}\n\"\"\"",
                    context
                ),
            );
        }

        let mut messages = Vec::with_capacity(windowed.len() + 2);
        messages.push(ChatMessage::new(Role::System, system));
        messages.extend(
            windowed
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| ChatMessage::new(m.role, m.content.clone())),
        );
        messages.push(ChatMessage::new(Role::User, utterance));

        PromptFrame { messages }
    }

    /// Tail of `history` covered by the window. System notes count towards
    /// neither unit but are kept when they fall inside the span.
    fn windowed<'a>(&self, history: &'a [Message]) -> &'a [Message] {
        let start = match self.window {
            HistoryWindow::Messages(n) => nth_from_end(history, n, |m| m.role != Role::System),
            HistoryWindow::Exchanges(n) => nth_from_end(history, n, |m| m.role == Role::User),
        };
        &history[start..]
    }
}

/// Index of the `n`th message from the end matching `pred`, or the whole
/// history when fewer match. `n == 0` selects nothing.
fn nth_from_end(history: &[Message], n: usize, pred: impl Fn(&Message) -> bool) -> usize {
    if n == 0 {
        return history.len();
    }
    let mut found = 0;
    for (idx, message) in history.iter().enumerate().rev() {
        if pred(message) {
            found += 1;
            if found == n {
                return idx;
            }
        }
    }
    0
}

fn append_section(system: &mut String, text: &str) {
    if !system.is_empty() {
        system.push_str("\n\n");
    }
    system.push_str(text);
}
