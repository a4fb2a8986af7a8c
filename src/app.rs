use std::collections::BTreeSet;
use std::path::PathBuf;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use tracing::{debug, warn};

use crate::input::{Action, ControllerEvent, map_key};
use crate::session::{Command, Session, SessionStatus};
use crate::song::list_songs;
use crate::ui::{Picker, PickerOutcome, View};

enum OpenPicker {
    Song(Vec<PathBuf>, Picker),
    Instrument(Picker),
}

/// Routes terminal and controller input either to an open picker or to the
/// session, and tells the main loop when to quit.
pub struct App {
    session: Session,
    picker: Option<OpenPicker>,
    quit: bool,
}

impl App {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            picker: None,
            quit: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn handle_key(&mut self, key: KeyEvent, now: f64) {
        // Releases always reach the session, or a note held while a picker
        // opens would never end.
        if key.kind == KeyEventKind::Release {
            if let KeyCode::Char(c) = key.code {
                self.session.key_up(c, now);
            }
            return;
        }
        if let Some(open) = &mut self.picker {
            let outcome = match open {
                OpenPicker::Song(_, picker) | OpenPicker::Instrument(picker) => {
                    picker.handle_key(key)
                }
            };
            self.finish_picker(outcome);
            return;
        }

        let Some(action) = map_key(key) else {
            return;
        };
        match action {
            Action::Command(command) => self.session.handle(command),
            Action::KeyDown(c) => self.session.key_down(c, now),
            Action::KeyUp(c) => self.session.key_up(c, now),
            Action::OpenSongPicker => self.open_song_picker(),
            Action::OpenInstrumentPicker => {
                let names = self
                    .session
                    .settings()
                    .bank
                    .names()
                    .map(str::to_string)
                    .collect();
                self.session.handle(Command::BeginInstrumentChange);
                self.picker = Some(OpenPicker::Instrument(Picker::new(
                    "Select an instrument:",
                    names,
                )));
            }
            Action::StopOrQuit if self.session.is_playing() => {
                self.session.handle(Command::StopPlayback)
            }
            Action::StopOrQuit | Action::Quit => self.quit = true,
        }
    }

    pub fn handle_controller(&mut self, event: ControllerEvent, now: f64) {
        debug!(?event, "controller");
        match event {
            ControllerEvent::NoteOn { note, .. } => self.session.controller_note_on(note, now),
            ControllerEvent::NoteOff { note } => self.session.controller_note_off(note, now),
        }
    }

    fn open_song_picker(&mut self) {
        let dir = self.session.settings().song_dir.clone();
        match list_songs(&dir) {
            Ok(songs) => {
                let names = songs
                    .iter()
                    .map(|p| {
                        p.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    })
                    .collect();
                self.picker = Some(OpenPicker::Song(
                    songs,
                    Picker::new("Select a song to play:", names),
                ));
            }
            Err(e) => {
                warn!("cannot list songs in {}: {}", dir.display(), e);
                self.session
                    .notify(format!("Cannot read {}: {}", dir.display(), e));
            }
        }
    }

    fn finish_picker(&mut self, outcome: PickerOutcome) {
        if outcome == PickerOutcome::Pending {
            return;
        }
        let Some(open) = self.picker.take() else {
            return;
        };
        match (open, outcome) {
            (OpenPicker::Song(songs, _), PickerOutcome::Chosen(idx)) => {
                if let Some(path) = songs.into_iter().nth(idx) {
                    self.session.handle(Command::OpenSong(path));
                }
            }
            (OpenPicker::Instrument(_), PickerOutcome::Chosen(idx)) => {
                let program = u8::try_from(idx).unwrap_or(u8::MAX).min(127);
                self.session.handle(Command::SelectInstrument(program));
            }
            (OpenPicker::Instrument(_), _) => {
                self.session.handle(Command::CancelInstrumentChange);
            }
            (OpenPicker::Song(..), _) => {}
        }
    }

    pub fn view<'a>(&'a self, status: &'a SessionStatus, lit: &'a BTreeSet<u8>) -> View<'a> {
        let picker = self.picker.as_ref().map(|open| match open {
            OpenPicker::Song(_, picker) | OpenPicker::Instrument(picker) => picker,
        });
        View {
            status,
            lit,
            picker,
        }
    }
}
