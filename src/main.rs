use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossterm::event::{self, Event as TermEvent};
use pianola::input::MidiController;
use pianola::synth::AudioOutput;
use pianola::timing::{Clock, SystemClock};
use pianola::ui::Screen;
use pianola::{
    App, CommandLog, DEFAULT_SETTINGS_FILE, Error, Session, SessionContext, Settings,
    SoftSynth, SynthHandle,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        error!("{}", e);
        eprintln!("pianola: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let settings_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

    // Logging goes to the file named in the settings, so read them first.
    let (settings, source) = Settings::load_or_default(&settings_path);
    init_logging(&settings.log_file)?;
    source.report(&settings_path);

    let settings = Arc::new(settings);
    let (synth, _audio) = start_synth(&settings);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let ctx = SessionContext::new(synth, clock.clone(), settings.clone());
    let mut app = App::new(Session::new(ctx));

    let (midi_tx, midi_rx) = crossbeam::channel::unbounded();
    let _controller = match &settings.midi_input {
        Some(filter) => match MidiController::connect(filter, midi_tx) {
            Ok(controller) => {
                app.session_mut()
                    .notify(format!("MIDI input: {}", controller.port_name()));
                Some(controller)
            }
            Err(e) => {
                warn!("MIDI input unavailable: {}", e);
                app.session_mut().notify(e.to_string());
                None
            }
        },
        None => None,
    };

    let mut screen = Screen::enter()?;
    app.session_mut()
        .set_explicit_release(screen.reports_key_release());

    let tick = Duration::from_millis(settings.tick_ms);
    info!("running, tick {:?}", tick);
    while !app.should_quit() {
        let deadline = Instant::now() + tick;
        while let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
            if !event::poll(timeout)? {
                break;
            }
            if let TermEvent::Key(key) = event::read()? {
                app.handle_key(key, clock.now());
                if app.should_quit() {
                    break;
                }
            }
        }
        while let Ok(controller_event) = midi_rx.try_recv() {
            app.handle_controller(controller_event, clock.now());
        }

        app.session_mut().tick();

        let status = app.session().status();
        let lit = app.session().lit_notes();
        screen.draw(&app.view(&status, &lit))?;
    }

    app.session_mut().shutdown();
    info!("bye");
    Ok(())
}

fn init_logging(path: &Path) -> Result<(), Error> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::Log {
            path: path.to_path_buf(),
            source,
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Falls back to a silent synth when there is no usable audio device.
fn start_synth(settings: &Settings) -> (SynthHandle, Option<AudioOutput>) {
    let bank = Arc::new(ArcSwap::from_pointee(settings.bank.clone()));
    match SoftSynth::start(bank) {
        Ok((synth, output)) => (SynthHandle::new(synth), Some(output)),
        Err(e) => {
            warn!("audio output unavailable, running silent: {}", e);
            (SynthHandle::new(CommandLog::new()), None)
        }
    }
}
