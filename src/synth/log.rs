use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{SynthAdapter, SynthCommand};
use crate::error::SynthError;

/// Oldest half is dropped past this, so a headless session stays bounded.
const MAX_COMMANDS: usize = 1 << 16;

/// Synth that only remembers what it was told.
///
/// Used when no audio device is available, and by tests to inspect dispatch.
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    commands: Arc<Mutex<Vec<SynthCommand>>>,
    failing: Arc<AtomicBool>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<SynthCommand> {
        self.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    /// Makes every following call fail as if the device went away.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn push(&self, command: SynthCommand) -> Result<(), SynthError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(SynthError::StreamClosed);
        }
        let command = command.validate()?;
        let mut commands = self.commands.lock();
        if commands.len() >= MAX_COMMANDS {
            commands.drain(..MAX_COMMANDS / 2);
        }
        commands.push(command);
        Ok(())
    }
}

impl SynthAdapter for CommandLog {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), SynthError> {
        self.push(SynthCommand::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn note_off(&mut self, channel: u8, note: u8) -> Result<(), SynthError> {
        self.push(SynthCommand::NoteOff { channel, note })
    }

    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), SynthError> {
        self.push(SynthCommand::ProgramChange { channel, program })
    }

    fn all_notes_off(&mut self) -> Result<(), SynthError> {
        self.push(SynthCommand::AllNotesOff)
    }
}
