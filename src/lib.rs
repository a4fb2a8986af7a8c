pub mod app;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod input;
pub mod recording;
pub mod session;
pub mod song;
pub mod synth;
pub mod timing;
pub mod ui;

pub use app::App;
pub use config::{DEFAULT_SETTINGS_FILE, Settings, SettingsSource};
pub use error::{ConfigError, Error, InputError, LoadError, SynthError};
pub use events::{Event, TimedEvent};
pub use recording::{Recorder, Recording, ReplayHandle, ReplayOptions, ReplayOutcome, Replayer};
pub use session::{Command, Session, SessionContext, SessionStatus};
pub use song::Song;
pub use synth::{CommandLog, SoftSynth, SynthAdapter, SynthHandle};
pub use timing::{EventSequence, Transport, TransportOptions, TransportState};
