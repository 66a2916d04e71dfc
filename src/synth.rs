use crate::filters::ResonantBandpass;
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Default audio sample rate. The device may negotiate something else;
/// the synthesizer takes the actual rate at construction.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Default bandwidth of the band-limited-noise resonator.
pub const DEFAULT_NOISE_BANDWIDTH_HZ: f64 = 20.0;

/// Snow texture bands: (center Hz, bandwidth Hz).
/// Low = ski bending, mid = snow grain, high = ice crystal.
const SNOW_BANDS: [(f64, f64); 3] = [(20.0, 8.0), (32.0, 15.0), (100.0, 40.0)];

/// Post-scale compensating the band-noise resonator's gain.
const BAND_NOISE_SCALE: f64 = 0.3;

// ─── Signal type ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Pure sine at the drive frequency
    Sine,
    /// White noise through one resonant bandpass at the drive frequency
    BandNoise,
    /// Three-band noise mix voiced like ski-on-snow contact
    Snow,
}

impl SignalKind {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SignalKind::BandNoise,
            2 => SignalKind::Snow,
            _ => SignalKind::Sine,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SignalKind::Sine => 0,
            SignalKind::BandNoise => 1,
            SignalKind::Snow => 2,
        }
    }
}

// ─── Shared parameter cells ─────────────────────────────────────────────────

/// Synthesizer configuration, shared between the control domain (writer)
/// and the audio domain (reader). Every field is one atomic word, so the
/// audio callback never takes a lock; there is no cross-field consistency
/// requirement, only tear-freedom per field.
pub struct SynthParams {
    playing: AtomicBool,
    frequency_bits: AtomicU32,
    amplitude_bits: AtomicU32,
    velocity_bits: AtomicU32,
    noise_bandwidth_bits: AtomicU32,
    signal: AtomicU8,
    ch_enabled: [AtomicBool; 2],
    ch_gain_bits: [AtomicU32; 2],
}

impl SynthParams {
    pub fn new(frequency_hz: f64, amplitude: f64) -> Self {
        Self {
            playing: AtomicBool::new(false),
            frequency_bits: AtomicU32::new((frequency_hz.max(0.0) as f32).to_bits()),
            amplitude_bits: AtomicU32::new((amplitude.clamp(0.0, 1.0) as f32).to_bits()),
            velocity_bits: AtomicU32::new(0.0f32.to_bits()),
            noise_bandwidth_bits: AtomicU32::new((DEFAULT_NOISE_BANDWIDTH_HZ as f32).to_bits()),
            signal: AtomicU8::new(SignalKind::Sine.as_u8()),
            ch_enabled: [AtomicBool::new(true), AtomicBool::new(true)],
            ch_gain_bits: [
                AtomicU32::new(1.0f32.to_bits()),
                AtomicU32::new(1.0f32.to_bits()),
            ],
        }
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_frequency(&self, hz: f64) {
        self.frequency_bits
            .store((hz.max(0.0) as f32).to_bits(), Ordering::Release);
    }

    pub fn frequency(&self) -> f64 {
        f32::from_bits(self.frequency_bits.load(Ordering::Acquire)) as f64
    }

    /// Clamped to [0, 1] — these arrive from UI sliders and surviving a
    /// bad value beats signaling it.
    pub fn set_amplitude(&self, amplitude: f64) {
        self.amplitude_bits
            .store((amplitude.clamp(0.0, 1.0) as f32).to_bits(), Ordering::Release);
    }

    pub fn amplitude(&self) -> f64 {
        f32::from_bits(self.amplitude_bits.load(Ordering::Acquire)) as f64
    }

    /// Clamped to [0, 1]. Only the snow texture uses it.
    pub fn set_velocity(&self, velocity: f64) {
        self.velocity_bits
            .store((velocity.clamp(0.0, 1.0) as f32).to_bits(), Ordering::Release);
    }

    pub fn velocity(&self) -> f64 {
        f32::from_bits(self.velocity_bits.load(Ordering::Acquire)) as f64
    }

    pub fn set_noise_bandwidth(&self, hz: f64) {
        self.noise_bandwidth_bits
            .store((hz.max(0.1) as f32).to_bits(), Ordering::Release);
    }

    pub fn noise_bandwidth(&self) -> f64 {
        f32::from_bits(self.noise_bandwidth_bits.load(Ordering::Acquire)) as f64
    }

    pub fn set_signal(&self, kind: SignalKind) {
        self.signal.store(kind.as_u8(), Ordering::Release);
    }

    pub fn signal(&self) -> SignalKind {
        SignalKind::from_u8(self.signal.load(Ordering::Acquire))
    }

    pub fn set_channel_enabled(&self, channel: usize, enabled: bool) {
        if channel < 2 {
            self.ch_enabled[channel].store(enabled, Ordering::Release);
        }
    }

    pub fn channel_enabled(&self, channel: usize) -> bool {
        channel < 2 && self.ch_enabled[channel].load(Ordering::Acquire)
    }

    /// Clamped to [0, 1].
    pub fn set_channel_gain(&self, channel: usize, gain: f64) {
        if channel < 2 {
            self.ch_gain_bits[channel]
                .store((gain.clamp(0.0, 1.0) as f32).to_bits(), Ordering::Release);
        }
    }

    pub fn channel_gain(&self, channel: usize) -> f64 {
        if channel < 2 {
            f32::from_bits(self.ch_gain_bits[channel].load(Ordering::Acquire)) as f64
        } else {
            0.0
        }
    }
}

impl Default for SynthParams {
    fn default() -> Self {
        Self::new(30.0, 0.5)
    }
}

// ─── Phase export ───────────────────────────────────────────────────────────

/// The oscillator phase, written by the audio domain each sample and read
/// by the sensor domain at ~60 Hz. Single writer, single reader, one word:
/// a bit-cast atomic gives a tear-free scalar without locking. The reader
/// may observe a value up to one audio buffer stale, which is negligible
/// against the two-orders-of-magnitude rate gap.
pub struct PhaseCell(AtomicU64);

impl PhaseCell {
    pub fn new() -> Self {
        Self(AtomicU64::new(0.0f64.to_bits()))
    }

    #[inline]
    pub fn store(&self, phase: f64) {
        self.0.store(phase.to_bits(), Ordering::Release);
    }

    /// Current phase in [0, 2π).
    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Synthesizer ────────────────────────────────────────────────────────────

/// Phase-coherent stereo sample generator for the haptic drive.
///
/// Owns all oscillator and filter state; reads configuration live from the
/// shared [`SynthParams`] cells. The sine phase advances every sample
/// regardless of the selected signal type, so the canceller can track the
/// fundamental even while noise textures play. Nothing here allocates,
/// locks, logs, or panics once constructed — it runs inside the audio
/// callback.
pub struct HapticSynth {
    sample_rate: f64,
    params: Arc<SynthParams>,
    phase_cell: Arc<PhaseCell>,
    phase: f64,
    band_noise: ResonantBandpass,
    snow: [ResonantBandpass; 3],
    noise_rng: SmallRng,
    snow_rngs: [SmallRng; 3],
    /// Last values the bandpass coefficients were derived from
    tuned_frequency: f64,
    tuned_bandwidth: f64,
}

impl HapticSynth {
    pub fn new(sample_rate: u32, params: Arc<SynthParams>, phase_cell: Arc<PhaseCell>) -> Self {
        let sr = sample_rate as f64;
        let frequency = params.frequency();
        let bandwidth = params.noise_bandwidth();
        debug!("HapticSynth: {} Hz sample rate, drive {:.1} Hz", sample_rate, frequency);
        Self {
            sample_rate: sr,
            phase: 0.0,
            band_noise: ResonantBandpass::new(frequency, bandwidth, sr),
            snow: [
                ResonantBandpass::new(SNOW_BANDS[0].0, SNOW_BANDS[0].1, sr),
                ResonantBandpass::new(SNOW_BANDS[1].0, SNOW_BANDS[1].1, sr),
                ResonantBandpass::new(SNOW_BANDS[2].0, SNOW_BANDS[2].1, sr),
            ],
            noise_rng: SmallRng::seed_from_u64(0x5eed_0001),
            snow_rngs: [
                SmallRng::seed_from_u64(0x5eed_0002),
                SmallRng::seed_from_u64(0x5eed_0003),
                SmallRng::seed_from_u64(0x5eed_0004),
            ],
            tuned_frequency: frequency,
            tuned_bandwidth: bandwidth,
            params,
            phase_cell,
        }
    }

    /// Fill `out` with interleaved frames at `channels` per frame.
    /// Returns the number of frames written (always the full request).
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> usize {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        if !self.params.playing() {
            out.fill(0.0);
            return frames;
        }

        // Coefficient re-derivation happens here, at buffer granularity,
        // never inside the per-sample loop. Filter state is preserved — a
        // click is tolerable, losing the cancellation lock is not.
        let frequency = self.params.frequency();
        let bandwidth = self.params.noise_bandwidth();
        if frequency != self.tuned_frequency {
            self.band_noise.set_center(frequency);
            self.tuned_frequency = frequency;
        }
        if bandwidth != self.tuned_bandwidth {
            self.band_noise.set_bandwidth(bandwidth);
            self.tuned_bandwidth = bandwidth;
        }

        let phase_step = TAU * frequency / self.sample_rate;

        for frame in out.chunks_exact_mut(channels) {
            // Parameters are read live, per sample — a momentary mismatch
            // between, say, frequency and amplitude carries no invariant.
            let amplitude = self.params.amplitude();
            let sample = match self.params.signal() {
                SignalKind::Sine => amplitude * self.phase.sin(),
                SignalKind::BandNoise => {
                    let white = self.noise_rng.gen_range(-1.0..1.0);
                    amplitude * BAND_NOISE_SCALE * self.band_noise.process(white)
                }
                SignalKind::Snow => {
                    let velocity = self.params.velocity();
                    let low = self.snow[0].process(self.snow_rngs[0].gen_range(-1.0..1.0));
                    let mid = self.snow[1].process(self.snow_rngs[1].gen_range(-1.0..1.0));
                    let high = self.snow[2].process(self.snow_rngs[2].gen_range(-1.0..1.0));
                    let (g_low, g_mid, g_high) = snow_gains(velocity);
                    amplitude
                        * (low * g_low + mid * g_mid + high * g_high)
                        * 0.25
                        * (0.5 + velocity)
                }
            };

            let left = sample
                * self.params.channel_enabled(0) as u8 as f64
                * self.params.channel_gain(0);
            let right = sample
                * self.params.channel_enabled(1) as u8 as f64
                * self.params.channel_gain(1);

            frame[0] = left as f32;
            if channels >= 2 {
                frame[1] = right as f32;
                for extra in frame.iter_mut().skip(2) {
                    *extra = 0.0;
                }
            }

            // The sine phase always advances — even under noise textures —
            // so the exported reference stays coherent with the fundamental.
            self.phase += phase_step;
            if self.phase >= TAU {
                self.phase %= TAU;
            }
            self.phase_cell.store(self.phase);
        }

        frames
    }

    /// Zero the oscillator phase and all filter state.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.phase_cell.store(0.0);
        self.band_noise.reset();
        for bp in &mut self.snow {
            bp.reset();
        }
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }
}

/// Velocity-dependent band gains of the snow texture. The low band is
/// always audible (structural rumble), the mid grows linearly with speed,
/// the high band fades in quadratically so ice hiss dominates only at
/// high velocity.
#[inline]
fn snow_gains(velocity: f64) -> (f64, f64, f64) {
    (
        0.5 + 0.3 * velocity,
        0.2 + 0.5 * velocity,
        0.4 * velocity * velocity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_synth(frequency: f64, amplitude: f64) -> (HapticSynth, Arc<SynthParams>, Arc<PhaseCell>) {
        let params = Arc::new(SynthParams::new(frequency, amplitude));
        let cell = Arc::new(PhaseCell::new());
        let synth = HapticSynth::new(AUDIO_SAMPLE_RATE, params.clone(), cell.clone());
        (synth, params, cell)
    }

    fn render_frames(synth: &mut HapticSynth, frames: usize) -> Vec<f32> {
        let mut buf = vec![0.0f32; frames * 2];
        let written = synth.render(&mut buf, 2);
        assert_eq!(written, frames);
        buf
    }

    #[test]
    fn test_silent_when_not_playing() {
        let (mut synth, _params, _cell) = make_synth(30.0, 1.0);
        let buf = render_frames(&mut synth, 512);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_sine_amplitude_and_rate() {
        let (mut synth, params, _cell) = make_synth(30.0, 0.8);
        params.set_playing(true);
        let buf = render_frames(&mut synth, 48000);

        let peak = buf.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!((peak - 0.8).abs() < 0.01, "peak={peak}, amplitude=0.8");

        // ~30 cycles per second → ~60 zero crossings on the left channel.
        let left: Vec<f32> = buf.chunks(2).map(|f| f[0]).collect();
        let crossings = left
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        assert!(
            (58..=62).contains(&crossings),
            "expected ~60 zero crossings at 30 Hz, got {crossings}"
        );
    }

    #[test]
    fn test_phase_export_tracks_oscillator() {
        let (mut synth, params, cell) = make_synth(30.0, 0.5);
        params.set_playing(true);
        render_frames(&mut synth, 1000);
        let expected = (1000.0 * TAU * 30.0 / 48000.0) % TAU;
        assert!(
            (cell.load() - expected).abs() < 1e-9,
            "exported {:.6}, expected {:.6}",
            cell.load(),
            expected
        );
        assert!((0.0..TAU).contains(&cell.load()));
    }

    #[test]
    fn test_phase_continuous_across_parameter_changes() {
        let (mut synth, params, cell) = make_synth(30.0, 0.5);
        params.set_playing(true);

        let f_max: f64 = 60.0;
        let max_step = TAU * f_max / 48000.0 + 1e-9;
        let mut prev = cell.load();
        let mut buf = [0.0f32; 2];

        for n in 0..4000 {
            // Poke every parameter mid-stream except reset.
            match n {
                500 => params.set_amplitude(0.1),
                1000 => params.set_signal(SignalKind::Snow),
                1500 => params.set_velocity(0.9),
                2000 => params.set_frequency(60.0),
                2500 => params.set_signal(SignalKind::BandNoise),
                3000 => params.set_noise_bandwidth(45.0),
                3500 => params.set_frequency(12.0),
                _ => {}
            }
            synth.render(&mut buf, 2);
            let phase = cell.load();
            let delta = (phase - prev).rem_euclid(TAU);
            assert!(
                delta <= max_step,
                "phase jumped by {delta:.6} rad at sample {n}"
            );
            prev = phase;
        }
    }

    #[test]
    fn test_snow_gain_contract() {
        let (g_low0, g_mid0, g_high0) = snow_gains(0.0);
        assert_eq!(g_high0, 0.0, "high band must vanish at v=0");
        assert!((g_low0 - 0.5).abs() < 1e-12);
        assert!((g_mid0 - 0.2).abs() < 1e-12);

        let (_, _, g_high1) = snow_gains(1.0);
        assert!((g_high1 - 0.4).abs() < 1e-12, "high gain at v=1 must be 0.4");
    }

    #[test]
    fn test_snow_louder_at_high_velocity() {
        let (mut slow, params_slow, _c1) = make_synth(30.0, 1.0);
        params_slow.set_playing(true);
        params_slow.set_signal(SignalKind::Snow);
        params_slow.set_velocity(0.0);
        let quiet = render_frames(&mut slow, 4096);

        let (mut fast, params_fast, _c2) = make_synth(30.0, 1.0);
        params_fast.set_playing(true);
        params_fast.set_signal(SignalKind::Snow);
        params_fast.set_velocity(1.0);
        let loud = render_frames(&mut fast, 4096);

        let energy = |buf: &[f32]| buf.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
        assert!(
            energy(&loud) > energy(&quiet),
            "v=1 should carry more energy than v=0"
        );
    }

    #[test]
    fn test_band_noise_produces_output() {
        let (mut synth, params, _cell) = make_synth(30.0, 0.7);
        params.set_playing(true);
        params.set_signal(SignalKind::BandNoise);
        let buf = render_frames(&mut synth, 4096);
        assert!(buf.iter().any(|&s| s != 0.0));
        assert!(buf.iter().all(|&s| s.is_finite()));
    }

    #[test]
    fn test_channel_gating() {
        let (mut synth, params, _cell) = make_synth(30.0, 0.8);
        params.set_playing(true);
        params.set_channel_enabled(1, false);
        params.set_channel_gain(0, 0.5);
        let buf = render_frames(&mut synth, 256);

        for frame in buf.chunks(2) {
            assert_eq!(frame[1], 0.0, "disabled channel must be silent");
        }
        let peak_left = buf.chunks(2).map(|f| f[0].abs()).fold(0.0f32, f32::max);
        assert!(peak_left <= 0.8 * 0.5 + 1e-3, "gain should scale the output");
    }

    #[test]
    fn test_gain_clamping() {
        let params = SynthParams::new(30.0, 0.5);
        params.set_amplitude(7.0);
        assert_eq!(params.amplitude(), 1.0);
        params.set_amplitude(-2.0);
        assert_eq!(params.amplitude(), 0.0);
        params.set_channel_gain(0, 3.0);
        assert_eq!(params.channel_gain(0), 1.0);
        params.set_velocity(1.5);
        assert_eq!(params.velocity(), 1.0);
    }

    #[test]
    fn test_reset_zeroes_phase() {
        let (mut synth, params, cell) = make_synth(30.0, 0.5);
        params.set_playing(true);
        render_frames(&mut synth, 100);
        assert!(synth.phase() > 0.0);
        synth.reset();
        assert_eq!(synth.phase(), 0.0);
        assert_eq!(cell.load(), 0.0);
    }
}
