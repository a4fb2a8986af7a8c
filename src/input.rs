use crossbeam::channel::Sender;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use midir::{MidiInput, MidiInputConnection};
use tracing::{debug, info, warn};

use crate::error::InputError;
use crate::session::Command;

/// What a terminal key means outside of any picker.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Command(Command),
    /// A character that may be bound to a note, pressed or auto-repeated.
    KeyDown(char),
    KeyUp(char),
    OpenSongPicker,
    OpenInstrumentPicker,
    /// Stops a playing song or replay, quits when nothing is playing.
    StopOrQuit,
    Quit,
}

/// Control keys. Lowercase letters and punctuation stay free for notes.
pub fn map_key(key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }
    if key.kind == KeyEventKind::Release {
        return match key.code {
            KeyCode::Char(c) => Some(Action::KeyUp(c)),
            _ => None,
        };
    }
    let repeat = key.kind == KeyEventKind::Repeat;

    let action = match key.code {
        KeyCode::Esc => Action::Quit,
        KeyCode::Char('Q') => Action::StopOrQuit,
        KeyCode::Char('R') => Action::Command(Command::ToggleRecording),
        KeyCode::Char('P') => Action::Command(Command::Replay),
        KeyCode::Char('S') => Action::Command(Command::StopPlayback),
        KeyCode::Char('1') => Action::OpenSongPicker,
        KeyCode::Char('2') => Action::OpenInstrumentPicker,
        KeyCode::Char('3') => Action::Command(Command::ToggleLoop),
        KeyCode::Char(' ') => Action::Command(Command::AllNotesOff),
        KeyCode::Enter => Action::Command(Command::TogglePause),
        KeyCode::Left => Action::Command(Command::SeekBackward),
        KeyCode::Right => Action::Command(Command::SeekForward),
        KeyCode::Up | KeyCode::Char('+') => Action::Command(Command::SpeedUp),
        KeyCode::Down | KeyCode::Char('-') => Action::Command(Command::SpeedDown),
        KeyCode::Char(']') | KeyCode::PageUp => Action::Command(Command::OctaveUp),
        KeyCode::Char('[') | KeyCode::PageDown => Action::Command(Command::OctaveDown),
        KeyCode::Char(c) => return Some(Action::KeyDown(c)),
        _ => return None,
    };
    // Holding a control key should not fire it over and over.
    if repeat { None } else { Some(action) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
}

impl ControllerEvent {
    /// Parses a raw channel message. Anything but note on/off is dropped.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        match (status & 0xF0, data) {
            (0x90, [note, velocity, ..]) if *velocity > 0 => Some(ControllerEvent::NoteOn {
                note: note & 0x7F,
                velocity: velocity & 0x7F,
            }),
            (0x80 | 0x90, [note, _, ..]) => Some(ControllerEvent::NoteOff { note: note & 0x7F }),
            _ => None,
        }
    }
}

/// Open connection to a MIDI controller. Events arrive on the channel given
/// to [`MidiController::connect`] from midir's callback thread.
pub struct MidiController {
    port_name: String,
    _connection: MidiInputConnection<()>,
}

impl MidiController {
    pub fn connect(port_filter: &str, tx: Sender<ControllerEvent>) -> Result<Self, InputError> {
        let midi_in = MidiInput::new("pianola")?;

        let ports = midi_in.ports();
        for port in &ports {
            debug!("MIDI input: {}", midi_in.port_name(port).unwrap_or_default());
        }
        let port = ports
            .iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .unwrap_or_default()
                    .contains(port_filter)
            })
            .ok_or_else(|| InputError::PortNotFound(port_filter.to_string()))?;
        let port_name = midi_in.port_name(port).unwrap_or_default();

        let connection = midi_in
            .connect(
                port,
                "pianola-input",
                move |_, message, _| {
                    if let Some(event) = ControllerEvent::from_bytes(message) {
                        if tx.send(event).is_err() {
                            warn!("MIDI event dropped, receiver gone");
                        }
                    }
                },
                (),
            )
            .map_err(|e| InputError::Connect(e.to_string()))?;

        info!("connected to MIDI input {}", port_name);
        Ok(Self {
            port_name,
            _connection: connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}
