use crate::synth::HapticSynth;
use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;
use std::path::Path;

/// Frames rendered per chunk while exporting.
const CHUNK_FRAMES: usize = 1024;

/// Render `seconds` of the synthesizer to a stereo float WAV.
///
/// Intended for offline inspection: render each signal type and check the
/// spectrum in an editor before strapping the shaker to the plate.
pub fn render_wav(
    path: &Path,
    synth: &mut HapticSynth,
    sample_rate: u32,
    seconds: f64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = (seconds * sample_rate as f64) as usize;
    let mut buf = vec![0.0f32; CHUNK_FRAMES * 2];

    let mut remaining = total_frames;
    while remaining > 0 {
        let frames = remaining.min(CHUNK_FRAMES);
        let chunk = &mut buf[..frames * 2];
        synth.render(chunk, 2);
        for &s in chunk.iter() {
            writer.write_sample(s)?;
        }
        remaining -= frames;
    }

    writer.finalize()?;
    info!(
        "Rendered {:.1}s ({} frames) → {:?}",
        seconds, total_frames, path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{PhaseCell, SignalKind, SynthParams, AUDIO_SAMPLE_RATE};
    use std::sync::Arc;

    #[test]
    fn test_render_wav_writes_file() {
        let params = Arc::new(SynthParams::new(30.0, 0.8));
        params.set_playing(true);
        params.set_signal(SignalKind::Sine);
        let cell = Arc::new(PhaseCell::new());
        let mut synth = HapticSynth::new(AUDIO_SAMPLE_RATE, params, cell);

        let dir = std::env::temp_dir();
        let path = dir.join("balance_capture_render_test.wav");
        render_wav(&path, &mut synth, AUDIO_SAMPLE_RATE, 0.25).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, AUDIO_SAMPLE_RATE);
        assert_eq!(reader.len(), (AUDIO_SAMPLE_RATE as f64 * 0.25) as u32 * 2);
        let _ = std::fs::remove_file(&path);
    }
}
