use crate::filters::NotchFilter;
use crate::types::SENSOR_RATE_HZ;
use log::{debug, info};
use std::f64::consts::TAU;

/// Harmonics of the drive frequency the canceller models. The reference
/// vector and weight arrays are sized from this constant, so changing the
/// harmonic count touches no hot-path code.
pub const HARMONICS: usize = 3;
/// One (sin, cos) coefficient pair per harmonic.
const REF_LEN: usize = 2 * HARMONICS;

/// Hard weight clip, in mm — prevents divergence under transient spikes.
pub const WEIGHT_LIMIT: f64 = 100.0;
/// Allowed NLMS step-size range. Values outside are clamped.
pub const STEP_MIN: f64 = 0.001;
pub const STEP_MAX: f64 = 1.9;
const DEFAULT_STEP: f64 = 0.5;
/// Keeps the normalized step finite when the reference power vanishes.
const REGULARIZATION: f64 = 1e-6;

const INPUT_POWER_ALPHA: f64 = 0.99;
const ERROR_POWER_ALPHA: f64 = 0.95;

/// Residual-MSE observation window (one second at the nominal sensor rate).
pub const MSE_WINDOW: usize = 60;
/// Converged when the windowed residual is both small and steady.
/// Both thresholds are in mm² and are tuning knobs, not physics.
const CONVERGED_VARIANCE_MM2: f64 = 0.01;
const CONVERGED_MEAN_MM2: f64 = 1.0;

/// Called once on each unconverged → converged transition, with the
/// current SNR-improvement estimate in dB.
pub type ConvergenceCallback = Box<dyn FnMut(f64) + Send>;

/// Running quality metrics, readable from the control domain as a
/// relaxed snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CancellerMetrics {
    /// See [`HarmonicCanceller::snr_improvement_db`] for what this is (and
    /// is not).
    pub snr_improvement_db: f64,
    pub input_power: f64,
    pub error_power: f64,
    pub converged: bool,
    pub samples: u64,
}

/// Adaptive multi-harmonic interference canceller.
///
/// One NLMS adapter per CoP axis, both driven by a shared reference of
/// sin/cos pairs at the first [`HARMONICS`] multiples of the haptic drive
/// frequency. This is the standard adaptive-noise-canceller arrangement:
/// weights are updated from the *corrected* signal, which converges to the
/// interference-free CoP provided the true CoP is uncorrelated with the
/// drive sinusoids — true here, since postural sway lives well below the
/// drive frequency.
///
/// The preferred phase source is the synthesizer's exported oscillator
/// phase, which is coherent with the emitted waveform by construction. An
/// internal phase accumulator at the configured frequency is the fallback
/// for standalone operation.
///
/// A per-axis resonant notch at the drive frequency is available as a
/// runtime-selected fallback for sessions too short for NLMS learning.
pub struct HarmonicCanceller {
    sensor_rate_hz: f64,
    drive_hz: f64,
    step_size: f64,
    enabled: bool,
    use_notch: bool,
    weights_x: [f64; REF_LEN],
    weights_y: [f64; REF_LEN],
    input_power: f64,
    error_power: f64,
    mse_window: [f64; MSE_WINDOW],
    mse_index: usize,
    samples: u64,
    converged: bool,
    internal_phase: f64,
    notch_x: NotchFilter,
    notch_y: NotchFilter,
    on_converged: Option<ConvergenceCallback>,
}

impl HarmonicCanceller {
    pub fn new(drive_hz: f64) -> Self {
        Self::with_sensor_rate(drive_hz, SENSOR_RATE_HZ as f64)
    }

    pub fn with_sensor_rate(drive_hz: f64, sensor_rate_hz: f64) -> Self {
        Self {
            sensor_rate_hz,
            drive_hz,
            step_size: DEFAULT_STEP,
            enabled: true,
            use_notch: false,
            weights_x: [0.0; REF_LEN],
            weights_y: [0.0; REF_LEN],
            input_power: 0.0,
            error_power: 0.0,
            mse_window: [0.0; MSE_WINDOW],
            mse_index: 0,
            samples: 0,
            converged: false,
            internal_phase: 0.0,
            notch_x: NotchFilter::new(drive_hz, sensor_rate_hz),
            notch_y: NotchFilter::new(drive_hz, sensor_rate_hz),
            on_converged: Some(Box::new(|snr| {
                info!("Canceller converged (snr {:.1} dB)", snr);
            })),
        }
    }

    /// Replace the convergence callback. There is exactly one consumer,
    /// so a single function value stands in for any subscription registry.
    pub fn set_convergence_callback(&mut self, cb: ConvergenceCallback) {
        self.on_converged = Some(cb);
    }

    /// Enable or disable compensation. Disabled → bit-exact pass-through.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled != self.enabled {
            debug!("compensation {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Select the notch backend instead of NLMS.
    pub fn set_use_notch(&mut self, use_notch: bool) {
        self.use_notch = use_notch;
    }

    /// Set the NLMS step size μ, clamped to [`STEP_MIN`, `STEP_MAX`].
    pub fn set_step_size(&mut self, mu: f64) {
        self.step_size = mu.clamp(STEP_MIN, STEP_MAX);
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Retune the drive frequency: moves the internal phase rate and both
    /// notch centers (which zero their own state on retune).
    pub fn set_frequency(&mut self, drive_hz: f64) {
        self.drive_hz = drive_hz;
        self.notch_x.set_center(drive_hz);
        self.notch_y.set_center(drive_hz);
    }

    pub fn frequency(&self) -> f64 {
        self.drive_hz
    }

    /// Zero all weights, metrics, the internal phase, and the notch state.
    /// The converged flag returns to false.
    pub fn reset(&mut self) {
        self.weights_x = [0.0; REF_LEN];
        self.weights_y = [0.0; REF_LEN];
        self.input_power = 0.0;
        self.error_power = 0.0;
        self.mse_window = [0.0; MSE_WINDOW];
        self.mse_index = 0;
        self.samples = 0;
        self.converged = false;
        self.internal_phase = 0.0;
        self.notch_x.reset();
        self.notch_y.reset();
    }

    /// Process one CoP sample.
    ///
    /// `phase` is the synthesizer's oscillator phase if available;
    /// `haptic_active` gates the whole canceller — with the shaker off
    /// there is nothing to cancel and the output equals the input exactly.
    pub fn process(
        &mut self,
        x: f64,
        y: f64,
        phase: Option<f64>,
        haptic_active: bool,
    ) -> (f64, f64) {
        if !haptic_active {
            // Known state for the next engagement.
            self.internal_phase = 0.0;
            return (x, y);
        }
        if !self.enabled {
            return (x, y);
        }

        let phi = match phase {
            Some(p) => p,
            None => self.advance_internal_phase(),
        };

        self.input_power =
            INPUT_POWER_ALPHA * self.input_power + (1.0 - INPUT_POWER_ALPHA) * (x * x + y * y);

        let (ex, ey) = if self.use_notch {
            (self.notch_x.process(x), self.notch_y.process(y))
        } else {
            self.nlms_step(x, y, phi)
        };

        self.error_power =
            ERROR_POWER_ALPHA * self.error_power + (1.0 - ERROR_POWER_ALPHA) * (ex * ex + ey * ey);

        self.mse_window[self.mse_index] = ex * ex + ey * ey;
        self.mse_index = (self.mse_index + 1) % MSE_WINDOW;
        self.samples += 1;
        self.update_convergence();

        (ex, ey)
    }

    fn nlms_step(&mut self, x: f64, y: f64, phi: f64) -> (f64, f64) {
        let r = reference(phi);

        let mut y_hat_x = 0.0;
        let mut y_hat_y = 0.0;
        for k in 0..REF_LEN {
            y_hat_x += self.weights_x[k] * r[k];
            y_hat_y += self.weights_y[k] * r[k];
        }

        let ex = x - y_hat_x;
        let ey = y - y_hat_y;

        // Normalizing by the reference power decouples convergence speed
        // from drive amplitude.
        let power: f64 = r.iter().map(|v| v * v).sum();
        let step = self.step_size / (power + REGULARIZATION);
        for k in 0..REF_LEN {
            self.weights_x[k] =
                (self.weights_x[k] + step * ex * r[k]).clamp(-WEIGHT_LIMIT, WEIGHT_LIMIT);
            self.weights_y[k] =
                (self.weights_y[k] + step * ey * r[k]).clamp(-WEIGHT_LIMIT, WEIGHT_LIMIT);
        }

        (ex, ey)
    }

    fn advance_internal_phase(&mut self) -> f64 {
        let phi = self.internal_phase;
        self.internal_phase += TAU * self.drive_hz / self.sensor_rate_hz;
        if self.internal_phase >= TAU {
            self.internal_phase -= TAU;
        }
        phi
    }

    fn update_convergence(&mut self) {
        if self.samples < MSE_WINDOW as u64 {
            return;
        }
        let n = MSE_WINDOW as f64;
        let mean = self.mse_window.iter().sum::<f64>() / n;
        let variance = self
            .mse_window
            .iter()
            .map(|&m| (m - mean) * (m - mean))
            .sum::<f64>()
            / n;

        let now = variance < CONVERGED_VARIANCE_MM2 && mean < CONVERGED_MEAN_MM2;
        if now && !self.converged {
            let snr = self.snr_improvement_db();
            if let Some(cb) = self.on_converged.as_mut() {
                cb(snr);
            }
        }
        self.converged = now;
    }

    /// Ratio of smoothed input power to smoothed residual power, in dB.
    ///
    /// This lower-bounds cancellation quality by what is *left* rather
    /// than measuring what was removed — a useful monitor, not a classical
    /// SNR, hence the "estimate" in the name.
    pub fn snr_improvement_db(&self) -> f64 {
        10.0 * ((self.input_power + REGULARIZATION) / (self.error_power + REGULARIZATION)).log10()
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn metrics(&self) -> CancellerMetrics {
        CancellerMetrics {
            snr_improvement_db: self.snr_improvement_db(),
            input_power: self.input_power,
            error_power: self.error_power,
            converged: self.converged,
            samples: self.samples,
        }
    }

    /// Learned interference amplitude per harmonic on the X axis.
    pub fn harmonic_amplitudes_x(&self) -> [f64; HARMONICS] {
        harmonic_amplitudes(&self.weights_x)
    }

    /// Learned interference amplitude per harmonic on the Y axis.
    pub fn harmonic_amplitudes_y(&self) -> [f64; HARMONICS] {
        harmonic_amplitudes(&self.weights_y)
    }

    #[cfg(test)]
    fn weights(&self) -> ([f64; REF_LEN], [f64; REF_LEN]) {
        (self.weights_x, self.weights_y)
    }
}

/// Reference vector [sin φ, cos φ, sin 2φ, cos 2φ, …] for the first
/// [`HARMONICS`] multiples of the drive phase.
#[inline]
fn reference(phi: f64) -> [f64; REF_LEN] {
    let mut r = [0.0; REF_LEN];
    for h in 0..HARMONICS {
        let (s, c) = ((h + 1) as f64 * phi).sin_cos();
        r[2 * h] = s;
        r[2 * h + 1] = c;
    }
    r
}

fn harmonic_amplitudes(weights: &[f64; REF_LEN]) -> [f64; HARMONICS] {
    let mut amps = [0.0; HARMONICS];
    for h in 0..HARMONICS {
        let ws = weights[2 * h];
        let wc = weights[2 * h + 1];
        amps[h] = (ws * ws + wc * wc).sqrt();
    }
    amps
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const FS: f64 = 60.0;

    /// Drive phase at sample n for frequency f.
    fn drive_phase(f: f64, n: u64) -> f64 {
        (TAU * f * n as f64 / FS).rem_euclid(TAU)
    }

    /// Contaminated Y input: slow sway plus a sinusoid at the drive
    /// frequency with arbitrary phase offset theta.
    fn contaminated(f: f64, amp: f64, theta: f64, n: u64) -> f64 {
        let t = n as f64 / FS;
        2.0 * (TAU * 0.3 * t).sin() + amp * (TAU * f * t + theta).sin()
    }

    #[test]
    fn test_pass_through_when_disabled() {
        let mut c = HarmonicCanceller::new(30.0);
        c.set_enabled(false);
        for n in 0..100u64 {
            let y = contaminated(30.0, 5.0, 0.4, n);
            let (ox, oy) = c.process(1.25, y, Some(drive_phase(30.0, n)), true);
            assert_eq!(ox, 1.25, "disabled canceller must be bit-exact");
            assert_eq!(oy, y);
        }
        assert!(!c.converged());
    }

    #[test]
    fn test_pass_through_when_haptic_inactive() {
        let mut c = HarmonicCanceller::new(30.0);
        let (ox, oy) = c.process(3.0, -4.0, None, false);
        assert_eq!((ox, oy), (3.0, -4.0));
        // Internal phase is reset so re-engagement starts from zero.
        let mut reengaged = HarmonicCanceller::new(15.0);
        for _ in 0..10 {
            reengaged.process(0.0, 0.0, None, true);
        }
        reengaged.process(0.0, 0.0, None, false);
        assert_eq!(reengaged.internal_phase, 0.0);
    }

    #[test]
    fn test_converges_on_single_harmonic() {
        // Property: for any contamination phase theta, 10 s of samples is
        // enough to reach 10 dB and the converged flag.
        for theta in [0.0, 0.4, 1.57, 3.0, 5.9] {
            let mut c = HarmonicCanceller::new(30.0);
            for n in 0..600u64 {
                let y = contaminated(30.0, 5.0, theta, n);
                c.process(0.0, y, Some(drive_phase(30.0, n)), true);
            }
            assert!(
                c.snr_improvement_db() >= 10.0,
                "theta={theta}: snr={:.1} dB",
                c.snr_improvement_db()
            );
            assert!(c.converged(), "theta={theta}: should be converged");
        }
    }

    #[test]
    fn test_rejects_multiple_harmonics() {
        let f = 12.0; // keep all three harmonics below Nyquist at 60 Hz
        let mut c = HarmonicCanceller::new(f);
        for n in 0..600u64 {
            let t = n as f64 / FS;
            let y = 2.0 * (TAU * 0.3 * t).sin()
                + 5.0 * (TAU * f * t + 0.4).sin()
                + 5.0 * (TAU * 2.0 * f * t + 1.1).sin()
                + 5.0 * (TAU * 3.0 * f * t + 2.2).sin();
            c.process(0.0, y, Some(drive_phase(f, n)), true);
        }
        assert!(
            c.snr_improvement_db() >= 8.0,
            "snr={:.1} dB with 3 harmonics",
            c.snr_improvement_db()
        );
    }

    #[test]
    fn test_internal_phase_fallback_converges() {
        // No external phase: the internal accumulator at the configured
        // frequency must still lock onto a pure drive-frequency tone.
        let f = 15.0;
        let mut c = HarmonicCanceller::new(f);
        for n in 0..600u64 {
            let t = n as f64 / FS;
            let y = 5.0 * (TAU * f * t + 1.0).sin();
            c.process(0.0, y, None, true);
        }
        assert!(
            c.snr_improvement_db() >= 10.0,
            "snr={:.1} dB via internal phase",
            c.snr_improvement_db()
        );
        assert!(c.converged());
    }

    #[test]
    fn test_weights_stay_bounded() {
        let mut c = HarmonicCanceller::new(30.0);
        c.set_step_size(1.9);
        for n in 0..500u64 {
            // Absurd inputs, including spikes.
            let y = if n % 7 == 0 { 1e6 } else { 500.0 };
            c.process(y, -y, Some(drive_phase(30.0, n)), true);
            let (wx, wy) = c.weights();
            for w in wx.iter().chain(wy.iter()) {
                assert!(
                    w.abs() <= WEIGHT_LIMIT,
                    "weight {w} escaped ±{WEIGHT_LIMIT}"
                );
            }
        }
    }

    #[test]
    fn test_learned_amplitude_matches_contamination() {
        // All three harmonics distinct and below Nyquist, so the learned
        // fundamental amplitude is not split across aliased pairs.
        let f = 8.0;
        let amp = 5.0;
        let mut c = HarmonicCanceller::new(f);
        for n in 0..1200u64 {
            let t = n as f64 / FS;
            let y = amp * (TAU * f * t + 0.7).sin();
            c.process(0.0, y, Some(drive_phase(f, n)), true);
        }
        let fundamental = c.harmonic_amplitudes_y()[0];
        assert!(
            (fundamental - amp).abs() < 0.5,
            "learned |H1|={fundamental:.2}, contamination was {amp}"
        );
    }

    #[test]
    fn test_notch_mode_attenuates_drive() {
        let f = 30.0;
        let mut c = HarmonicCanceller::new(f);
        c.set_use_notch(true);

        let mut in_energy = 0.0;
        let mut out_energy = 0.0;
        for n in 0..300u64 {
            let t = n as f64 / FS;
            let y = 20.0 * (TAU * f * t + 0.4).sin();
            let (_, ey) = c.process(0.0, y, Some(drive_phase(f, n)), true);
            if n >= 150 {
                in_energy += y * y;
                out_energy += ey * ey;
            }
        }
        let reduction_db = 10.0 * (in_energy / out_energy.max(1e-12)).log10();
        assert!(
            reduction_db >= 20.0,
            "notch reduction {:.1} dB, wanted ≥20",
            reduction_db
        );
    }

    #[test]
    fn test_step_size_clamped() {
        let mut c = HarmonicCanceller::new(30.0);
        c.set_step_size(5.0);
        assert_eq!(c.step_size(), STEP_MAX);
        c.set_step_size(0.0);
        assert_eq!(c.step_size(), STEP_MIN);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut c = HarmonicCanceller::new(30.0);
        for n in 0..200u64 {
            let y = contaminated(30.0, 5.0, 0.4, n);
            c.process(y, y, Some(drive_phase(30.0, n)), true);
        }
        c.reset();
        let once = (c.weights(), c.metrics(), c.internal_phase);
        c.reset();
        let twice = (c.weights(), c.metrics(), c.internal_phase);
        assert_eq!(once, twice);
        assert!(!c.converged());
        assert_eq!(c.metrics().samples, 0);
    }

    #[test]
    fn test_convergence_event_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let mut c = HarmonicCanceller::new(30.0);
        c.set_convergence_callback(Box::new(move |_snr| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for n in 0..1200u64 {
            let y = contaminated(30.0, 5.0, 0.4, n);
            c.process(0.0, y, Some(drive_phase(30.0, n)), true);
        }
        assert!(c.converged());
        assert_eq!(
            fired.load(Ordering::SeqCst),
            1,
            "event must fire exactly once while converged"
        );
    }

    #[test]
    fn test_retune_updates_notches() {
        let mut c = HarmonicCanceller::new(30.0);
        c.set_frequency(22.0);
        assert_eq!(c.frequency(), 22.0);
        assert_eq!(c.notch_x.center_hz(), 22.0);
        assert_eq!(c.notch_y.center_hz(), 22.0);
    }
}
