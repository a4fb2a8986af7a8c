mod instrument;
mod log;
mod soft;
mod voice;

pub use instrument::{Instrument, InstrumentBank, OscConfig, Wave};
pub use log::CommandLog;
pub use soft::{AudioOutput, SoftSynth};
pub use voice::{ADSRConfig, EnvelopeState, Voice};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SynthError;

pub const CHANNELS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthCommand {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ProgramChange { channel: u8, program: u8 },
    AllNotesOff,
}

impl SynthCommand {
    pub fn validate(self) -> Result<Self, SynthError> {
        let (channel, data) = match self {
            SynthCommand::NoteOn {
                channel,
                note,
                velocity,
            } => (channel, note.max(velocity)),
            SynthCommand::NoteOff { channel, note } => (channel, note),
            SynthCommand::ProgramChange { channel, program } => (channel, program),
            SynthCommand::AllNotesOff => return Ok(self),
        };
        if channel >= CHANNELS || data > 127 {
            return Err(SynthError::InvalidCommand(format!("{:?}", self)));
        }
        Ok(self)
    }
}

/// Something that makes sound from note commands.
pub trait SynthAdapter {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), SynthError>;

    fn note_off(&mut self, channel: u8, note: u8) -> Result<(), SynthError>;

    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), SynthError>;

    fn all_notes_off(&mut self) -> Result<(), SynthError> {
        for channel in 0..CHANNELS {
            for note in 0..=127 {
                self.note_off(channel, note)?;
            }
        }
        Ok(())
    }
}

/// Shared access to one synthesizer. Every call takes the lock for its own
/// duration, so the tick loop and the replay worker never interleave inside
/// a single command.
#[derive(Clone)]
pub struct SynthHandle {
    inner: Arc<Mutex<dyn SynthAdapter + Send>>,
}

impl SynthHandle {
    pub fn new<S: SynthAdapter + Send + 'static>(synth: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(synth)),
        }
    }

    pub fn note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<(), SynthError> {
        self.inner.lock().note_on(channel, note, velocity)
    }

    pub fn note_off(&self, channel: u8, note: u8) -> Result<(), SynthError> {
        self.inner.lock().note_off(channel, note)
    }

    pub fn program_change(&self, channel: u8, program: u8) -> Result<(), SynthError> {
        self.inner.lock().program_change(channel, program)
    }

    pub fn all_notes_off(&self) -> Result<(), SynthError> {
        self.inner.lock().all_notes_off()
    }
}

impl std::fmt::Debug for SynthHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_channel() {
        let cmd = SynthCommand::NoteOn {
            channel: 16,
            note: 60,
            velocity: 100,
        };
        assert!(matches!(cmd.validate(), Err(SynthError::InvalidCommand(_))));
    }

    #[test]
    fn test_validate_rejects_bad_note() {
        let cmd = SynthCommand::NoteOff {
            channel: 0,
            note: 200,
        };
        assert!(cmd.validate().is_err());
        assert!(SynthCommand::AllNotesOff.validate().is_ok());
    }

    #[test]
    fn test_handle_serializes_into_one_synth() {
        let log = CommandLog::new();
        let handle = SynthHandle::new(log.clone());
        let other = handle.clone();

        let worker = std::thread::spawn(move || {
            for note in 0..50 {
                other.note_on(1, note, 100).unwrap();
            }
        });
        for note in 0..50 {
            handle.note_off(0, note).unwrap();
        }
        worker.join().unwrap();

        assert_eq!(log.commands().len(), 100);
    }
}
