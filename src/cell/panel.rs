//! Operator Panel
//!
//! Line-oriented button box: it sends `white` (start) and `red` (stop) and
//! accepts `buzz_<freq>_<ms>` commands for audible feedback. Tokens are read
//! on a dedicated thread so the supervisor can keep polling the stop signal.

use crate::Result;
use crossbeam::channel::{unbounded, Receiver};
use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelEvent {
    Start,
    Stop,
}

impl PanelEvent {
    /// Parse one panel line; unknown tokens are ignored
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "white" => Some(PanelEvent::Start),
            "red" => Some(PanelEvent::Stop),
            _ => None,
        }
    }
}

/// One buzzer tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub freq_hz: u32,
    pub duration_ms: u64,
}

const fn tone(freq_hz: u32) -> Tone {
    Tone {
        freq_hz,
        duration_ms: 250,
    }
}

/// Perception model ready
pub const READY_CHIME: [Tone; 2] = [tone(300), tone(600)];

/// Robot connected
pub const ONLINE_CHIME: [Tone; 1] = [tone(900)];

/// Cell shut down
pub const SHUTDOWN_CHIME: [Tone; 2] = [tone(600), tone(300)];

/// Extra pause after each tone
const TONE_GAP: Duration = Duration::from_millis(50);

/// Buzzer side of the panel
pub struct Panel<W: Write> {
    output: W,
    wait_for_tones: bool,
}

impl<W: Write> Panel<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            wait_for_tones: true,
        }
    }

    /// Don't sleep while tones play
    pub fn without_delays(mut self) -> Self {
        self.wait_for_tones = false;
        self
    }

    /// Play one tone and wait for it to finish
    pub fn buzz(&mut self, tone: Tone) -> Result<()> {
        writeln!(self.output, "buzz_{}_{}", tone.freq_hz, tone.duration_ms)?;
        self.output.flush()?;
        debug!(freq = tone.freq_hz, ms = tone.duration_ms, "Buzz");
        if self.wait_for_tones {
            thread::sleep(Duration::from_millis(tone.duration_ms) + TONE_GAP);
        }
        Ok(())
    }

    pub fn chime(&mut self, tones: &[Tone]) -> Result<()> {
        tones.iter().try_for_each(|&t| self.buzz(t))
    }

    pub fn output(&self) -> &W {
        &self.output
    }
}

/// Read panel tokens on a background thread.
///
/// The channel disconnects when the input reaches end of file or fails.
pub fn spawn_token_reader<R>(input: R) -> Result<Receiver<PanelEvent>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("panel".to_string())
        .spawn(move || {
            for line in input.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Panel read failed: {}", e);
                        break;
                    }
                };
                match PanelEvent::parse(&line) {
                    Some(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    None if !line.trim().is_empty() => debug!(token = %line.trim(), "Ignoring panel token"),
                    None => {}
                }
            }
        })?;
    Ok(rx)
}
