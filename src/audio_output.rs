use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{error, info};
use std::sync::Arc;

use crate::synth::{HapticSynth, PhaseCell, SynthParams};

/// Haptic drive playback via cpal.
///
/// Holds the cpal `Stream` alive. Drop this to stop output.
/// The synthesizer lives inside the render callback; the rest of the
/// system talks to it only through the shared parameter cells and the
/// exported phase.
pub struct AudioOutput {
    _stream: Stream,
    pub sample_rate: u32,
}

impl AudioOutput {
    /// Open the default output device and start rendering.
    /// Returns immediately — audio runs on the device's callback thread.
    pub fn start(params: Arc<SynthParams>, phase: Arc<PhaseCell>) -> Result<Self, String> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| "No default audio output device found".to_string())?;

        info!(
            "Audio output: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let supported = device
            .default_output_config()
            .map_err(|e| format!("No supported output config: {e}"))?;

        // Prefer 48kHz — the synthesizer's band centers assume it, and it
        // keeps phase bookkeeping aligned with the documented rates.
        // Fall back to the device default if unavailable.
        let preferred = cpal::SampleRate(48_000);
        let config_48k = device.supported_output_configs().ok().and_then(|configs| {
            configs
                .filter(|c| {
                    c.channels() == supported.channels()
                        && c.min_sample_rate() <= preferred
                        && c.max_sample_rate() >= preferred
                })
                .max_by_key(|c| c.max_sample_rate())
                .map(|c| c.with_sample_rate(preferred))
        });

        let (config, sample_rate, format): (StreamConfig, u32, SampleFormat) =
            if let Some(cfg) = config_48k {
                let sr = cfg.sample_rate().0;
                let fmt = cfg.sample_format();
                (cfg.into(), sr, fmt)
            } else {
                let sr = supported.sample_rate().0;
                let fmt = supported.sample_format();
                (supported.into(), sr, fmt)
            };

        let channels = config.channels as usize;

        info!(
            "Output config: {}Hz  {} ch  {:?}",
            sample_rate, channels, format
        );

        let mut synth = HapticSynth::new(sample_rate, params, phase);

        let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

        let stream = match format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        synth.render(data, channels);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            fmt => {
                return Err(format!(
                    "Unsupported sample format {fmt:?}. Use an F32 output device."
                ))
            }
        };

        stream.play().map_err(|e| e.to_string())?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }
}
