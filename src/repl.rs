//! Line-oriented command surface.
//!
//! Plain text starts a new turn. Lines starting with `!` control the session:
//! `!clear`, `!top_p <x>`, `!temperature <x>`, `!context`, `!history`.
//! A line ending in `\` continues onto the next one.

use std::collections::VecDeque;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::warn;

use crate::chat::Chat;
use crate::error::ChatError;
use crate::output::OutputTarget;
use crate::tokenizer::Tokenizer;

pub const FIRST_PROMPT: &str = "Use '\\' to enter multi-line input. Press Ctrl-D to quit. > ";
pub const CONTINUATION_PROMPT: &str = "> ";
pub const BANNER: &str = "Use '!clear' to clear history. Use '!top_p x.xx' to adjust top_p. \
Use '!temperature x.xx' to adjust temperature. Use '!context' or '!history' to inspect the conversation.";

const TOP_P_USAGE: &str = "top_p value should be a float between 0 and 1. Usage: !top_p x.xx";
const TEMPERATURE_USAGE: &str =
    "temperature value should be a float between 0 and 2. Usage: !temperature x.xx";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Say(String),
    Clear,
    /// `None` when the argument is missing or not a number.
    TopP(Option<f32>),
    Temperature(Option<f32>),
    Context,
    History,
    Empty,
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let mut words = input.split_whitespace();
        let Some(head) = words.next() else {
            return Command::Empty;
        };
        let arg = || input.split_whitespace().nth(1).and_then(|v| v.parse::<f32>().ok());

        match head {
            "!clear" if words.next().is_none() => Command::Clear,
            "!top_p" => Command::TopP(arg()),
            "!temperature" => Command::Temperature(arg()),
            "!context" => Command::Context,
            "!history" => Command::History,
            _ => Command::Say(input.to_string()),
        }
    }
}

pub enum LineRead {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    Eof,
}

/// Source of raw input lines.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Result<LineRead>;
}

/// Interactive terminal input with line editing and in-memory history.
pub struct LineEditor {
    editor: DefaultEditor,
}

impl LineEditor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for LineEditor {
    fn read_line(&mut self, prompt: &str) -> Result<LineRead> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    if let Err(err) = self.editor.add_history_entry(line.as_str()) {
                        warn!(error = %err, "could not record line in input history");
                    }
                }
                Ok(LineRead::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(LineRead::Interrupted),
            Err(ReadlineError::Eof) => Ok(LineRead::Eof),
            Err(err) => Err(err.into()),
        }
    }
}

/// Pre-recorded lines, e.g. piped input or tests. Ends with EOF.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl LineSource for ScriptedInput {
    fn read_line(&mut self, _prompt: &str) -> Result<LineRead> {
        Ok(self.lines.pop_front().map_or(LineRead::Eof, LineRead::Line))
    }
}

/// Read one logical input, joining `\`-continued lines with newlines.
///
/// `None` on end of input. Ctrl-C discards the partial input and yields an
/// empty string.
pub fn read_input(source: &mut dyn LineSource) -> Result<Option<String>> {
    let mut text = String::new();
    loop {
        let prompt = if text.is_empty() {
            FIRST_PROMPT
        } else {
            CONTINUATION_PROMPT
        };
        match source.read_line(prompt)? {
            LineRead::Line(line) => text.push_str(&line),
            LineRead::Interrupted => return Ok(Some(String::new())),
            LineRead::Eof => return Ok(None),
        }
        match text.strip_suffix('\\') {
            Some(head) => text = format!("{head}\n"),
            None => return Ok(Some(text)),
        }
    }
}

/// Apply one command. Only output failures are returned as errors; anything
/// wrong with the command itself is reported and the session carries on.
pub fn dispatch<T: Tokenizer>(
    chat: &mut Chat<'_, T>,
    command: Command,
    output: &mut OutputTarget,
) -> Result<()> {
    match command {
        Command::Empty => {}
        Command::Clear => match chat.clear() {
            Ok(()) => output.write_line("History cleared.")?,
            Err(err) => report(output, "Failed to reset the model", &err)?,
        },
        Command::TopP(value) => match value.map(|v| chat.set_top_p(v)) {
            Some(Ok(())) => output.write_line(&format!(
                "top_p set to {}.",
                chat.session().params().top_p()
            ))?,
            _ => output.write_line(TOP_P_USAGE)?,
        },
        Command::Temperature(value) => match value.map(|v| chat.set_temperature(v)) {
            Some(Ok(())) => output.write_line(&format!(
                "temperature set to {}.",
                chat.session().params().temperature()
            ))?,
            _ => output.write_line(TEMPERATURE_USAGE)?,
        },
        Command::Context => match chat.context_text() {
            Ok(text) => output.write_line(&text)?,
            Err(err) => report(output, "Failed to render context", &err)?,
        },
        Command::History => output.write_line(&chat.history().to_string())?,
        Command::Say(text) => match chat.respond(&text, output) {
            Ok(_) => {}
            Err(ChatError::Output(msg)) => anyhow::bail!("Failed to write output: {msg}"),
            Err(err) => report(output, "Generation failed", &err)?,
        },
    }
    Ok(())
}

fn report(output: &mut OutputTarget, what: &str, err: &ChatError) -> Result<()> {
    warn!(error = %err, "{what}");
    output.write_line(&format!("{what}: {err}"))
}

/// Read and dispatch until end of input.
pub fn run<T: Tokenizer>(
    chat: &mut Chat<'_, T>,
    input: &mut dyn LineSource,
    output: &mut OutputTarget,
) -> Result<()> {
    output.write_line(BANNER)?;
    while let Some(text) = read_input(input)? {
        dispatch(chat, Command::parse(&text), output)?;
    }
    output.write_line("")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("!clear"), Command::Clear);
        assert_eq!(Command::parse("!top_p 0.9"), Command::TopP(Some(0.9)));
        assert_eq!(Command::parse("!top_p"), Command::TopP(None));
        assert_eq!(Command::parse("!top_p abc"), Command::TopP(None));
        assert_eq!(Command::parse("!temperature 1.2"), Command::Temperature(Some(1.2)));
        assert_eq!(Command::parse("!context"), Command::Context);
        assert_eq!(Command::parse("!history"), Command::History);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn unknown_bang_words_are_plain_text() {
        assert_eq!(Command::parse("!hello"), Command::Say("!hello".into()));
        assert_eq!(
            Command::parse("!clear the table"),
            Command::Say("!clear the table".into())
        );
    }

    #[test]
    fn continuation_joins_lines() {
        let mut input = ScriptedInput::new(["first\\", "second\\", "third", "next"]);
        assert_eq!(
            read_input(&mut input).unwrap(),
            Some("first\nsecond\nthird".to_string())
        );
        assert_eq!(read_input(&mut input).unwrap(), Some("next".to_string()));
        assert_eq!(read_input(&mut input).unwrap(), None);
    }

    #[test]
    fn eof_mid_continuation_ends_input() {
        let mut input = ScriptedInput::new(["dangling\\"]);
        assert_eq!(read_input(&mut input).unwrap(), None);
    }
}
