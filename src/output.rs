use anyhow::Result;
use std::io::{self, Write};

/// Highest display intensity. Levels map onto the 256-color grayscale ramp.
pub const MAX_CONFIDENCE: u8 = 16;
const GRAYSCALE_BASE: u16 = 239;
pub const RESET: &str = "\x1b[0m";

/// Perceptual display intensity for a token probability.
///
/// The square root spreads low probabilities over more visible shades.
pub fn confidence_level(probability: f32) -> u8 {
    let level = (probability.max(0.0).sqrt() * MAX_CONFIDENCE as f32).round();
    if level.is_nan() {
        return 0;
    }
    level.min(MAX_CONFIDENCE as f32) as u8
}

/// A token wrapped in its confidence color, followed by a style reset.
pub fn colorize(text: &str, confidence: u8) -> String {
    let color = GRAYSCALE_BASE + confidence.min(MAX_CONFIDENCE) as u16;
    format!("\x1b[1;38;5;{color}m{text}{RESET}")
}

/// Where streamed tokens and command replies go.
pub enum OutputTarget {
    Terminal(TerminalOutput),
    /// Collects everything written, for tests and scripted runs.
    Buffer(Vec<u8>),
}

impl OutputTarget {
    pub fn terminal() -> Self {
        OutputTarget::Terminal(TerminalOutput::new())
    }

    pub fn buffer() -> Self {
        OutputTarget::Buffer(Vec::new())
    }

    /// Stream one generated token.
    pub fn write_token(&mut self, text: &str, confidence: u8) -> Result<()> {
        self.write_raw(&colorize(text, confidence))
    }

    /// Restore default styling and end the streamed line.
    pub fn end_stream(&mut self) -> Result<()> {
        self.write_raw(RESET)?;
        self.write_raw("\n")
    }

    /// A full line of plain text, e.g. a command reply.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        self.write_raw(text)?;
        self.write_raw("\n")
    }

    pub fn write_raw(&mut self, text: &str) -> Result<()> {
        match self {
            OutputTarget::Terminal(inner) => inner.write(text),
            OutputTarget::Buffer(buf) => {
                buf.extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }

    /// Everything buffered so far. Empty for the terminal.
    pub fn contents(&self) -> String {
        match self {
            OutputTarget::Terminal(_) => String::new(),
            OutputTarget::Buffer(buf) => String::from_utf8_lossy(buf).into_owned(),
        }
    }
}

pub struct TerminalOutput;

impl TerminalOutput {
    pub fn new() -> Self {
        Self
    }

    pub fn write(&mut self, text: &str) -> Result<()> {
        print!("{}", text);
        io::stdout().flush()?;
        Ok(())
    }
}

impl Default for TerminalOutput {
    fn default() -> Self {
        Self::new()
    }
}
