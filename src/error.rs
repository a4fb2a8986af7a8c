use std::path::PathBuf;
use thiserror::Error;

use crate::events::Event;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read song {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid MIDI file: {0}")]
    Midi(#[from] midly::Error),
    #[error("invalid song file: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unsupported song format: {0}")]
    UnsupportedFormat(String),
    #[error("event {index} out of range: {event:?}")]
    InvalidEvent { index: usize, event: Event },
}

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("invalid synth command: {0}")]
    InvalidCommand(String),
    #[error("synth command queue is full")]
    QueueFull,
    #[error("no audio output device available")]
    NoDevice,
    #[error("audio stream is gone")]
    StreamClosed,
    #[error("replay worker panicked")]
    ReplayPanicked,
    #[error("failed to query output config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings file: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to encode settings: {0}")]
    Encode(#[from] ron::Error),
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to open MIDI input: {0}")]
    Init(#[from] midir::InitError),
    #[error("failed to connect MIDI input: {0}")]
    Connect(String),
    #[error("no MIDI input port matching {0:?}")]
    PortNotFound(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Synth(#[from] SynthError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("failed to open log file {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}
