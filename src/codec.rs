use crate::models::{ChatMessage, Role};

/// Delimiters of an instruction-tuned prompt format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionTemplate {
    pub bos: String,
    pub eos: String,
    pub inst_open: String,
    pub inst_close: String,
    pub sys_open: String,
    pub sys_close: String,
}

impl InstructionTemplate {
    /// Llama-2 / Mistral-instruct format.
    pub fn llama2() -> Self {
        Self {
            bos: "<s>".to_string(),
            eos: "</s>".to_string(),
            inst_open: "[INST]".to_string(),
            inst_close: "[/INST]".to_string(),
            sys_open: "<<SYS>>\n".to_string(),
            sys_close: "\n<</SYS>>\n\n".to_string(),
        }
    }
}

impl Default for InstructionTemplate {
    fn default() -> Self {
        Self::llama2()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("model produced an empty or near-empty reply ({chars} usable characters)")]
    EmptyGeneration { chars: usize },
}

/// Converts role/content pairs to the single prompt string a raw
/// generation backend expects, and pulls the new reply back out of the
/// backend's output (which echoes the whole prompt).
#[derive(Debug, Clone)]
pub struct RawPromptCodec {
    template: InstructionTemplate,
    min_reply_chars: usize,
}

impl Default for RawPromptCodec {
    fn default() -> Self {
        Self::new(InstructionTemplate::llama2())
    }
}

impl RawPromptCodec {
    pub fn new(template: InstructionTemplate) -> Self {
        Self {
            template,
            min_reply_chars: 2,
        }
    }

    pub fn with_min_reply_chars(mut self, min: usize) -> Self {
        self.min_reply_chars = min;
        self
    }

    pub fn template(&self) -> &InstructionTemplate {
        &self.template
    }

    /// Renders `messages` so the model continues with the assistant's next
    /// turn. The directive block is always present, empty if there is no
    /// system message.
    pub fn encode(&self, messages: &[ChatMessage]) -> String {
        let t = &self.template;
        let (system, turns) = split_system(messages);

        let mut out = String::new();
        let mut pending_system = Some(system.unwrap_or_default());
        // Whether the last instruction is still waiting for its answer.
        let mut open = false;

        for turn in turns {
            match turn.role {
                Role::User => {
                    if open {
                        out.push(' ');
                        out.push_str(&t.eos);
                    }
                    self.open_instruction(&mut out, &mut pending_system, turn.content.trim());
                    open = true;
                }
                Role::Assistant => {
                    if !open {
                        self.open_instruction(&mut out, &mut pending_system, "");
                    }
                    out.push(' ');
                    out.push_str(turn.content.trim());
                    out.push(' ');
                    out.push_str(&t.eos);
                    open = false;
                }
                // removed by split_system
                Role::System => {}
            }
        }

        if pending_system.is_some() {
            self.open_instruction(&mut out, &mut pending_system, "");
        }
        out
    }

    fn open_instruction(&self, out: &mut String, pending_system: &mut Option<String>, user: &str) {
        let t = &self.template;
        out.push_str(&t.bos);
        out.push_str(&t.inst_open);
        out.push(' ');
        if let Some(system) = pending_system.take() {
            out.push_str(&t.sys_open);
            out.push_str(system.trim());
            out.push_str(&t.sys_close);
        }
        out.push_str(user);
        if !user.is_empty() {
            out.push(' ');
        }
        out.push_str(&t.inst_close);
    }

    /// Extracts the assistant reply from `raw`, the backend's decoded output
    /// for `prompt`.
    pub fn decode(&self, raw: &str, prompt: &str) -> Result<String, CodecError> {
        let t = &self.template;

        let candidate = match raw.rfind(&t.inst_close) {
            Some(idx) => &raw[idx + t.inst_close.len()..],
            None => {
                log::warn!("No closing instruction delimiter in completion; slicing after prompt");
                raw.strip_prefix(prompt)
                    .or_else(|| raw.get(prompt.len()..))
                    .unwrap_or("")
            }
        };

        // A fresh instruction means the model started inventing the next turn.
        let candidate = match candidate.find(&t.inst_open) {
            Some(idx) => &candidate[..idx],
            None => candidate,
        };

        let reply = strip_trailing_markers(candidate, &[&t.eos, &t.bos]);
        let usable = reply.chars().filter(|c| !c.is_whitespace()).count();
        if usable < self.min_reply_chars {
            return Err(CodecError::EmptyGeneration { chars: usable });
        }
        Ok(reply.to_string())
    }
}

/// First system message plus every other turn in original order. Later
/// system messages have no slot in the format and are dropped.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let mut system = None;
    let mut turns = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::System if system.is_none() => system = Some(message.content.clone()),
            Role::System => log::warn!("Dropping extra system message from raw prompt"),
            _ => turns.push(message),
        }
    }
    (system, turns)
}

fn strip_trailing_markers<'a>(mut text: &'a str, markers: &[&str]) -> &'a str {
    loop {
        let trimmed = text.trim();
        let stripped = markers
            .iter()
            .filter(|m| !m.is_empty())
            .find_map(|m| trimmed.strip_suffix(*m));
        match stripped {
            Some(rest) => text = rest,
            None => return trimmed,
        }
    }
}
