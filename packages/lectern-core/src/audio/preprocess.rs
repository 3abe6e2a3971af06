//! Optional audio preprocessing: voice activity detection and gain control.
//!
//! Runs ahead of normalization when enabled. VAD classifies chunks as speech
//! or silence from RMS energy, letting the transport skip sending silence
//! upstream; AGC normalizes level toward a target so quiet speakers remain
//! recognizable without clipping loud ones.

use serde::Serialize;

/// Audio activity classification for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioActivity {
    Speech,
    Silence,
    Unknown,
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Energy threshold for speech detection (dBFS).
    pub energy_threshold_db: f64,
    /// Minimum speech duration before the state flips to Speech (seconds).
    pub min_speech_duration: f64,
    /// Minimum silence duration before the state flips to Silence (seconds).
    pub min_silence_duration: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold_db: -40.0,
            min_speech_duration: 0.3,
            min_silence_duration: 2.0,
        }
    }
}

/// Automatic gain control configuration.
#[derive(Debug, Clone, Copy)]
pub struct AgcConfig {
    /// Target RMS level (dBFS).
    pub target_db: f64,
    /// Maximum gain adjustment (dB).
    pub max_gain_db: f64,
    /// Minimum gain adjustment (dB).
    pub min_gain_db: f64,
    /// Smoothing factor for gain changes (0.0-1.0).
    pub smoothing_factor: f64,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            target_db: -1.0,
            max_gain_db: 30.0,
            min_gain_db: -10.0,
            smoothing_factor: 0.1,
        }
    }
}

/// Statistics exported with the session summary.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PreprocessStats {
    pub total_chunks: u64,
    pub speech_chunks: u64,
    pub silence_chunks: u64,
    pub current_gain_db: f64,
}

/// RMS energy of an i16 PCM buffer in dBFS. Returns -100.0 for silence.
fn energy_db(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return -100.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms < 1e-10 {
        return -100.0;
    }
    20.0 * rms.log10()
}

/// Energy-based voice activity detector with duration hysteresis.
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: AudioActivity,
    speech_run_secs: f64,
    silence_run_secs: f64,
}

impl VoiceActivityDetector {
    #[must_use]
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: AudioActivity::Unknown,
            speech_run_secs: 0.0,
            silence_run_secs: 0.0,
        }
    }

    /// Classifies one chunk, updating the hysteresis state.
    pub fn process(&mut self, samples: &[i16]) -> AudioActivity {
        let duration = samples.len() as f64 / crate::protocol_constants::SAMPLE_RATE as f64;
        let is_speech = energy_db(samples) > self.config.energy_threshold_db;

        if is_speech {
            self.speech_run_secs += duration;
            self.silence_run_secs = 0.0;
        } else {
            self.silence_run_secs += duration;
            self.speech_run_secs = 0.0;
        }

        if self.speech_run_secs >= self.config.min_speech_duration {
            self.state = AudioActivity::Speech;
        } else if self.silence_run_secs >= self.config.min_silence_duration {
            self.state = AudioActivity::Silence;
        }
        self.state
    }

    pub fn reset(&mut self) {
        self.state = AudioActivity::Unknown;
        self.speech_run_secs = 0.0;
        self.silence_run_secs = 0.0;
    }
}

/// Automatic gain control with smoothed adjustments.
pub struct AutomaticGainControl {
    config: AgcConfig,
    current_gain_db: f64,
}

impl AutomaticGainControl {
    #[must_use]
    pub fn new(config: AgcConfig) -> Self {
        Self {
            config,
            current_gain_db: 0.0,
        }
    }

    /// Applies gain toward the target level, in place.
    ///
    /// Silent chunks are left untouched and do not move the gain state.
    pub fn process(&mut self, samples: &mut [i16]) {
        let current_db = energy_db(samples);
        if current_db <= -100.0 {
            return;
        }

        let required = (self.config.target_db - current_db)
            .clamp(self.config.min_gain_db, self.config.max_gain_db);
        self.current_gain_db = self.config.smoothing_factor * required
            + (1.0 - self.config.smoothing_factor) * self.current_gain_db;

        let gain = 10f64.powf(self.current_gain_db / 20.0);
        for sample in samples.iter_mut() {
            let amplified = (*sample as f64 / 32768.0 * gain).clamp(-1.0, 1.0);
            *sample = (amplified * 32767.0) as i16;
        }
    }

    #[must_use]
    pub fn current_gain_db(&self) -> f64 {
        self.current_gain_db
    }
}

/// Combined preprocessing pipeline: AGC first (better detection), then VAD.
pub struct AudioPreprocessor {
    vad: VoiceActivityDetector,
    agc: AutomaticGainControl,
    stats: PreprocessStats,
}

impl AudioPreprocessor {
    #[must_use]
    pub fn new(vad_config: VadConfig, agc_config: AgcConfig) -> Self {
        Self {
            vad: VoiceActivityDetector::new(vad_config),
            agc: AutomaticGainControl::new(agc_config),
            stats: PreprocessStats::default(),
        }
    }

    /// Processes one raw PCM chunk in place and classifies its activity.
    ///
    /// Odd trailing bytes (not a whole sample) are passed through untouched;
    /// the normalizer repairs alignment downstream.
    pub fn process(&mut self, chunk: &mut [u8]) -> AudioActivity {
        let whole = chunk.len() - chunk.len() % 2;
        // Byte buffers are not guaranteed 2-aligned, so decode explicitly
        // rather than reinterpreting the slice.
        let mut samples = decode_samples(&chunk[..whole]);

        self.agc.process(&mut samples);
        let activity = self.vad.process(&samples);

        for (dst, sample) in chunk[..whole].chunks_exact_mut(2).zip(&samples) {
            dst.copy_from_slice(&sample.to_le_bytes());
        }

        self.stats.total_chunks += 1;
        match activity {
            AudioActivity::Speech => self.stats.speech_chunks += 1,
            AudioActivity::Silence => self.stats.silence_chunks += 1,
            AudioActivity::Unknown => {}
        }
        self.stats.current_gain_db = self.agc.current_gain_db();
        activity
    }

    /// Returns true if a chunk with this activity should be sent upstream.
    #[must_use]
    pub fn should_send(&self, activity: AudioActivity) -> bool {
        activity != AudioActivity::Silence
    }

    #[must_use]
    pub fn stats(&self) -> PreprocessStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.vad.reset();
    }
}

/// Decodes little-endian 16-bit samples from a byte buffer.
fn decode_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Classifies a chunk's energy without mutating it (read-only VAD path).
#[must_use]
pub fn chunk_energy_db(chunk: &[u8]) -> f64 {
    let whole = chunk.len() - chunk.len() % 2;
    energy_db(&decode_samples(&chunk[..whole]))
}
