//! Two-pole IIR primitives shared by the synthesizer and the canceller's
//! notch fallback. Coefficients are derived on construction or parameter
//! change, never per sample.

use std::f64::consts::{PI, TAU};

// ─── Resonant bandpass ──────────────────────────────────────────────────────

/// Two-pole resonant bandpass.
///
/// Pole radius `a = exp(-π·bw/Fs)`, pole angle `ω_c = 2π·f_c/Fs`:
///
/// ```text
/// y[n] = x[n] + a·b·y[n-1] − a²·y[n-2],   b = 2·cos(ω_c)
/// ```
///
/// Narrow bandwidths give substantial resonant gain at the center; callers
/// compensate with a fixed post-scale rather than normalizing here.
#[derive(Debug, Clone, Copy)]
pub struct ResonantBandpass {
    sample_rate: f64,
    center_hz: f64,
    bandwidth_hz: f64,
    a: f64,
    b: f64,
    y1: f64,
    y2: f64,
}

impl ResonantBandpass {
    pub fn new(center_hz: f64, bandwidth_hz: f64, sample_rate: f64) -> Self {
        let mut f = Self {
            sample_rate,
            center_hz,
            bandwidth_hz,
            a: 0.0,
            b: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        f.recalc();
        f
    }

    fn recalc(&mut self) {
        let omega = TAU * self.center_hz / self.sample_rate;
        let bw = PI * self.bandwidth_hz / self.sample_rate;
        self.a = (-bw).exp();
        self.b = 2.0 * omega.cos();
    }

    /// Retune the center frequency. IIR state is preserved — a click is
    /// tolerable, losing the resonator's ring is not.
    pub fn set_center(&mut self, center_hz: f64) {
        if center_hz != self.center_hz {
            self.center_hz = center_hz;
            self.recalc();
        }
    }

    pub fn set_bandwidth(&mut self, bandwidth_hz: f64) {
        if bandwidth_hz != self.bandwidth_hz {
            self.bandwidth_hz = bandwidth_hz;
            self.recalc();
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.recalc();
        }
    }

    pub fn reset(&mut self) {
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = x + self.a * self.b * self.y1 - self.a * self.a * self.y2;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

// ─── Resonant notch ─────────────────────────────────────────────────────────

/// Pole radius of the notch — close to the unit circle for a narrow stop band.
pub const NOTCH_POLE_RADIUS: f64 = 0.95;

/// Two-pole resonant notch with unity DC gain.
///
/// Zeros on the unit circle at ±ω, poles at radius `r` behind them:
///
/// ```text
///          1 − 2·cos(ω)·z⁻¹ + z⁻²
/// H(z) = ────────────────────────────,   a1 = −2·r·cos(ω),  a2 = r²
///          1 + a1·z⁻¹ + a2·z⁻²
/// ```
///
/// The raw filter's DC gain is `(2 − 2·cos ω)/(1 + a1 + a2)`; the output is
/// scaled by its reciprocal so a constant input passes through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct NotchFilter {
    sample_rate: f64,
    center_hz: f64,
    b1: f64,
    a1: f64,
    a2: f64,
    gain: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl NotchFilter {
    pub fn new(center_hz: f64, sample_rate: f64) -> Self {
        let mut f = Self {
            sample_rate,
            center_hz,
            b1: 0.0,
            a1: 0.0,
            a2: 0.0,
            gain: 1.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        f.recalc();
        f
    }

    fn recalc(&mut self) {
        let omega = TAU * self.center_hz / self.sample_rate;
        let cos_w = omega.cos();
        let r = NOTCH_POLE_RADIUS;
        self.b1 = -2.0 * cos_w;
        self.a1 = -2.0 * r * cos_w;
        self.a2 = r * r;
        let dc_num = 2.0 - 2.0 * cos_w;
        self.gain = if dc_num.abs() > 1e-12 {
            (1.0 + self.a1 + self.a2) / dc_num
        } else {
            // Notch at DC: normalization is meaningless, pass unscaled.
            1.0
        };
    }

    /// Retune the stop band. Re-derives coefficients and zeros the filter
    /// state so stale resonance at the old frequency cannot ring on.
    pub fn set_center(&mut self, center_hz: f64) {
        if center_hz != self.center_hz {
            self.center_hz = center_hz;
            self.recalc();
            self.reset();
        }
    }

    pub fn center_hz(&self) -> f64 {
        self.center_hz
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = x + self.b1 * self.x1 + self.x2 - self.a1 * self.y1 - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        self.gain * y
    }
}
