use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use tracing::{error, info};

use super::{CHANNELS, Instrument, InstrumentBank, SynthAdapter, SynthCommand, Voice};
use crate::error::SynthError;
use crate::events::PERCUSSION_CHANNEL;

const QUEUE_CAPACITY: usize = 4096;
const MAX_VOICES: usize = 64;
const MASTER_GAIN: f32 = 0.5;

/// Built-in polyphonic synth. Commands travel to the audio thread through a
/// lock-free queue; the audio callback owns all voice state.
pub struct SoftSynth {
    producer: HeapProd<SynthCommand>,
    alive: Arc<AtomicBool>,
}

/// Keeps the output stream running. Dropping it silences the synth.
pub struct AudioOutput {
    _stream: cpal::Stream,
    pub sample_rate: u32,
    pub channels: usize,
}

impl SoftSynth {
    pub fn start(bank: Arc<ArcSwap<InstrumentBank>>) -> Result<(Self, AudioOutput), SynthError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SynthError::NoDevice)?;
        let config = device.default_output_config()?;
        let stream_config: cpal::StreamConfig = config.into();

        let channels = stream_config.channels as usize;
        let sample_rate = stream_config.sample_rate;
        info!(channels, sample_rate, "audio output opened");

        let (synth, mut renderer) = Self::queue(bank, sample_rate as f32);
        let alive = synth.alive.clone();

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                renderer.render(data, channels);
            },
            move |err| {
                error!("audio stream error: {}", err);
                alive.store(false, Ordering::Relaxed);
            },
            None,
        )?;
        stream.play()?;

        Ok((
            synth,
            AudioOutput {
                _stream: stream,
                sample_rate,
                channels,
            },
        ))
    }

    /// Synth front end plus the renderer that drains it, without any device.
    pub fn queue(bank: Arc<ArcSwap<InstrumentBank>>, sample_rate: f32) -> (Self, Renderer) {
        let (producer, consumer) = HeapRb::<SynthCommand>::new(QUEUE_CAPACITY).split();
        let synth = Self {
            producer,
            alive: Arc::new(AtomicBool::new(true)),
        };
        (synth, Renderer::new(consumer, bank, sample_rate))
    }

    fn send(&mut self, command: SynthCommand) -> Result<(), SynthError> {
        if !self.alive.load(Ordering::Relaxed) {
            return Err(SynthError::StreamClosed);
        }
        let command = command.validate()?;
        self.producer
            .try_push(command)
            .map_err(|_| SynthError::QueueFull)
    }
}

impl SynthAdapter for SoftSynth {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), SynthError> {
        self.send(SynthCommand::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn note_off(&mut self, channel: u8, note: u8) -> Result<(), SynthError> {
        self.send(SynthCommand::NoteOff { channel, note })
    }

    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), SynthError> {
        self.send(SynthCommand::ProgramChange { channel, program })
    }

    fn all_notes_off(&mut self) -> Result<(), SynthError> {
        self.send(SynthCommand::AllNotesOff)
    }
}

struct ActiveVoice {
    voice: Voice,
    /// `None` on the percussion channel.
    program: Option<u8>,
}

/// Audio-thread side of [`SoftSynth`].
pub struct Renderer {
    consumer: HeapCons<SynthCommand>,
    bank: Arc<ArcSwap<InstrumentBank>>,
    percussion: Instrument,
    programs: [u8; CHANNELS as usize],
    voices: Vec<ActiveVoice>,
    sample_rate: f32,
}

impl Renderer {
    fn new(
        consumer: HeapCons<SynthCommand>,
        bank: Arc<ArcSwap<InstrumentBank>>,
        sample_rate: f32,
    ) -> Self {
        Self {
            consumer,
            bank,
            percussion: Instrument::percussion(),
            programs: [0; CHANNELS as usize],
            voices: Vec::with_capacity(MAX_VOICES),
            sample_rate,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.voice.is_held()).count()
    }

    /// Fills an interleaved buffer, applying queued commands first.
    pub fn render(&mut self, data: &mut [f32], channels: usize) {
        while let Some(command) = self.consumer.try_pop() {
            self.apply(command);
        }

        let bank = self.bank.load();
        let channels = channels.max(1);
        for frame in data.chunks_mut(channels) {
            let (mut left, mut right) = (0.0, 0.0);
            for active in &mut self.voices {
                let instrument = match active.program {
                    Some(program) => match bank.select(program) {
                        Some(instrument) => instrument,
                        None => continue,
                    },
                    None => &self.percussion,
                };
                let sample = active.voice.render_sample(instrument, self.sample_rate);
                let (l_gain, r_gain) = pan_to_gains(instrument.pan);
                left += sample * l_gain;
                right += sample * r_gain;
            }
            let left = (left * MASTER_GAIN).tanh();
            let right = (right * MASTER_GAIN).tanh();
            match frame {
                [mono] => *mono = (left + right) * std::f32::consts::FRAC_1_SQRT_2,
                [l, r, rest @ ..] => {
                    *l = left;
                    *r = right;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }

        self.voices.retain(|v| !v.voice.is_done());
    }

    fn apply(&mut self, command: SynthCommand) {
        match command {
            SynthCommand::NoteOn {
                channel,
                note,
                velocity: 0,
            }
            | SynthCommand::NoteOff { channel, note } => self.release(channel, note),
            SynthCommand::NoteOn {
                channel,
                note,
                velocity,
            } => {
                self.release(channel, note);
                if self.voices.len() >= MAX_VOICES {
                    let victim = self
                        .voices
                        .iter()
                        .position(|v| !v.voice.is_held())
                        .unwrap_or(0);
                    self.voices.remove(victim);
                }
                let program = if channel == PERCUSSION_CHANNEL {
                    None
                } else {
                    Some(self.programs[channel as usize])
                };
                let bank = self.bank.load();
                let instrument = match program {
                    Some(program) => match bank.select(program) {
                        Some(instrument) => instrument,
                        None => return,
                    },
                    None => &self.percussion,
                };
                self.voices.push(ActiveVoice {
                    voice: Voice::new(channel, note, velocity, instrument),
                    program,
                });
            }
            SynthCommand::ProgramChange { channel, program } => {
                self.programs[channel as usize] = program;
            }
            SynthCommand::AllNotesOff => {
                for active in &mut self.voices {
                    active.voice.release();
                }
            }
        }
    }

    fn release(&mut self, channel: u8, note: u8) {
        for active in &mut self.voices {
            if active.voice.channel == channel && active.voice.note == note {
                active.voice.release();
            }
        }
    }
}

fn pan_to_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}
