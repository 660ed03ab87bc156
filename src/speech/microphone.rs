//! # Microphone Capture
//!
//! Records a single utterance from the default input device for one-shot
//! recognition.
//!
//! ## Endpointing:
//! Audio is split into 20 ms frames and each frame's RMS energy is compared
//! with a threshold. The utterance ends after a run of trailing silence that
//! follows detected speech, or when the maximum duration is reached.
//!
//! ## Threading:
//! `cpal::Stream` is not `Send`, so `capture_utterance` blocks and must be
//! run on a blocking thread. It polls the shared stop flag between frames.

use crate::error::{SessionError, SessionResult};
use crate::speech::pcm;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error};

/// Capture rate expected by the recognition endpoint.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

const FRAME_SAMPLES: usize = (CAPTURE_SAMPLE_RATE as usize) / 50;

#[derive(Debug, Clone)]
pub struct CaptureLimits {
    pub max_duration: Duration,
    pub trailing_silence: Duration,
    /// Frame RMS at or above this counts as speech
    pub speech_threshold: f32,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(15),
            trailing_silence: Duration::from_millis(800),
            speech_threshold: 0.02,
        }
    }
}

/// Energy-based utterance detector fed with raw device samples.
pub struct UtteranceDetector {
    limits: CaptureLimits,
    samples: Vec<f32>,
    pending: Vec<f32>,
    heard_speech: bool,
    silent_samples: usize,
}

impl UtteranceDetector {
    pub fn new(limits: CaptureLimits) -> Self {
        Self {
            limits,
            samples: Vec::new(),
            pending: Vec::with_capacity(FRAME_SAMPLES),
            heard_speech: false,
            silent_samples: 0,
        }
    }

    /// Feed newly captured samples.
    pub fn push(&mut self, data: &[f32]) {
        for &sample in data {
            self.pending.push(sample);
            if self.pending.len() == FRAME_SAMPLES {
                self.consume_frame();
            }
        }
    }

    fn consume_frame(&mut self) {
        if pcm::rms(&self.pending) >= self.limits.speech_threshold {
            self.heard_speech = true;
            self.silent_samples = 0;
        } else if self.heard_speech {
            self.silent_samples += self.pending.len();
        }

        self.samples.extend_from_slice(&self.pending);
        self.pending.clear();
    }

    pub fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    /// Whether the utterance is complete.
    pub fn is_finished(&self) -> bool {
        let silence_limit = samples_for(self.limits.trailing_silence);
        let total_limit = samples_for(self.limits.max_duration);

        (self.heard_speech && self.silent_samples >= silence_limit)
            || self.samples.len() >= total_limit
    }

    /// The captured utterance as 16-bit PCM, empty if no speech was heard.
    pub fn into_samples(self) -> Vec<i16> {
        if !self.heard_speech {
            return Vec::new();
        }
        pcm::float_to_pcm(&self.samples)
    }
}

fn samples_for(duration: Duration) -> usize {
    (duration.as_millis() as usize) * (CAPTURE_SAMPLE_RATE as usize) / 1000
}

/// Record one utterance from the default input device.
///
/// ## Returns:
/// - **Ok(samples)**: 16 kHz mono PCM; empty when nothing was said or `stop`
///   was raised
/// - **Err(SessionError::Recognition)**: no usable input device
pub fn capture_utterance(stop: &AtomicBool, limits: CaptureLimits) -> SessionResult<Vec<i16>> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SessionError::Recognition("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| SessionError::Recognition(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
        })
        .ok_or_else(|| SessionError::Recognition("no 16 kHz mono input config".to_string()))?;
    let config: StreamConfig = supported
        .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
        .config();

    let (tx, rx) = mpsc::channel::<Vec<f32>>();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(data.to_vec());
            },
            |err| error!(error = %err, "Audio capture error"),
            None,
        )
        .map_err(|e| SessionError::Recognition(e.to_string()))?;
    stream
        .play()
        .map_err(|e| SessionError::Recognition(e.to_string()))?;

    debug!(device = %device.name().unwrap_or_default(), "Microphone capture started");

    let mut detector = UtteranceDetector::new(limits);
    while !detector.is_finished() {
        if stop.load(Ordering::SeqCst) {
            debug!("Microphone capture stopped");
            return Ok(Vec::new());
        }

        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => detector.push(&chunk),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(SessionError::Recognition("input stream ended".to_string()))
            }
        }
    }
    drop(stream);

    debug!(heard_speech = detector.heard_speech(), "Microphone capture finished");
    Ok(detector.into_samples())
}
