use serde::{Deserialize, Serialize};

use crate::synth::CHANNELS;

/// Channel whose program is fixed by convention (General MIDI drums).
pub const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// Meta, sysex and controller data. Kept for timing, never dispatched.
    Ignored,
}

impl Event {
    /// A note-on with velocity 0 is the conventional note-off alias.
    pub fn is_note_off(&self) -> bool {
        matches!(
            self,
            Event::NoteOff { .. } | Event::NoteOn { velocity: 0, .. }
        )
    }

    pub fn channel(&self) -> Option<u8> {
        match self {
            Event::NoteOn { channel, .. }
            | Event::NoteOff { channel, .. }
            | Event::ProgramChange { channel, .. } => Some(*channel),
            Event::Ignored => None,
        }
    }

    /// Channel below 16, data bytes within 7 bits.
    pub fn in_range(&self) -> bool {
        let data = match *self {
            Event::NoteOn { note, velocity, .. } => note.max(velocity),
            Event::NoteOff { note, .. } => note,
            Event::ProgramChange { program, .. } => program,
            Event::Ignored => return true,
        };
        self.channel().is_some_and(|c| c < CHANNELS) && data <= 127
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    /// Seconds from the start of the song, before speed scaling.
    pub time: f64,
    pub event: Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteKind {
    On,
    Off,
}

/// One captured key press or release from interactive play.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedEvent {
    pub kind: NoteKind,
    /// Note number before octave shift.
    pub note: u8,
    /// Wall-clock seconds.
    pub timestamp: f64,
}

/// Shifts `note` by whole octaves, or `None` when the result leaves the MIDI range.
pub fn transpose(note: u8, octave_shift: i32) -> Option<u8> {
    let shifted = note as i32 + octave_shift * 12;
    u8::try_from(shifted).ok().filter(|n| *n <= 127)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_zero_is_note_off() {
        let alias = Event::NoteOn {
            channel: 0,
            note: 60,
            velocity: 0,
        };
        assert!(alias.is_note_off());
        assert!(Event::NoteOff { channel: 3, note: 60 }.is_note_off());
        assert!(
            !Event::NoteOn {
                channel: 0,
                note: 60,
                velocity: 1
            }
            .is_note_off()
        );
        assert!(!Event::Ignored.is_note_off());
    }

    #[test]
    fn test_transpose_range() {
        assert_eq!(transpose(60, 1), Some(72));
        assert_eq!(transpose(60, -1), Some(48));
        assert_eq!(transpose(120, 1), None);
        assert_eq!(transpose(5, -1), None);
        assert_eq!(transpose(127, 0), Some(127));
    }
}
