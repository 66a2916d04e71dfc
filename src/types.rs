use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Plate geometry ─────────────────────────────────────────────────────────

/// Y span of the plate in millimeters (front-to-back).
pub const PLATE_LENGTH_MM: f64 = 433.0;
/// X span of the plate in millimeters (left-to-right).
pub const PLATE_WIDTH_MM: f64 = 238.0;
/// Total weight below this is indistinguishable from an empty plate.
pub const MIN_VALID_WEIGHT_KG: f64 = 5.0;
/// Nominal sensor callback rate.
pub const SENSOR_RATE_HZ: u32 = 60;

// ─── Load-cell data ─────────────────────────────────────────────────────────

/// Raw readings from the four corner load cells, in kilograms.
/// TL/TR are the forward (toe-side) cells, BL/BR the rear (heel-side) cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadSample {
    /// Milliseconds since capture session start
    pub timestamp_ms: u64,
    pub tl: f64,
    pub tr: f64,
    pub bl: f64,
    pub br: f64,
}

impl LoadSample {
    pub fn new(timestamp_ms: u64, tl: f64, tr: f64, bl: f64, br: f64) -> Self {
        Self {
            timestamp_ms,
            tl,
            tr,
            bl,
            br,
        }
    }

    /// Sum of all four cells.
    pub fn total(&self) -> f64 {
        self.tl + self.tr + self.bl + self.br
    }
}

impl fmt::Display for LoadSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>8}ms  TL={:.2} TR={:.2} BL={:.2} BR={:.2}  Σ={:.2}kg",
            self.timestamp_ms,
            self.tl,
            self.tr,
            self.bl,
            self.br,
            self.total(),
        )
    }
}

// ─── Center of pressure ─────────────────────────────────────────────────────

/// CoP position produced by the estimator. Plate center is the origin,
/// X positive toward the right edge, Y positive toward the front edge.
/// `x_mm`/`y_mm` carry the calibrated position; `raw_x_mm`/`raw_y_mm` keep
/// the uncalibrated values for diagnostics. Coordinates are only physically
/// meaningful when `valid` is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CopSample {
    pub timestamp_ms: u64,
    pub x_mm: f64,
    pub y_mm: f64,
    pub raw_x_mm: f64,
    pub raw_y_mm: f64,
    pub weight_kg: f64,
    pub valid: bool,
}

impl CopSample {
    /// An invalid sample (insufficient weight on the plate).
    pub fn empty(timestamp_ms: u64, weight_kg: f64) -> Self {
        Self {
            timestamp_ms,
            x_mm: 0.0,
            y_mm: 0.0,
            raw_x_mm: 0.0,
            raw_y_mm: 0.0,
            weight_kg,
            valid: false,
        }
    }
}

// ─── Unified output frame ───────────────────────────────────────────────────

/// Complete state snapshot for one sensor tick.
/// Produced by the coordinator, consumed by the console display, data
/// logger, and any downstream game logic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CopFrame {
    pub timestamp_ms: u64,
    /// Compensated CoP (calibration + interference cancellation applied)
    pub x_mm: f64,
    pub y_mm: f64,
    /// Uncompensated CoP as the estimator produced it
    pub raw_x_mm: f64,
    pub raw_y_mm: f64,
    pub weight_kg: f64,
    pub valid: bool,
    /// Canceller quality estimate in dB (see `snr_improvement_estimate`)
    pub snr_db: f64,
    pub converged: bool,
    pub calibrated: bool,
    pub calibration_in_progress: bool,
    /// Whether the haptic drive was active for this sample
    pub haptic_active: bool,
}

impl fmt::Display for CopFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = if self.valid { " " } else { "!" };
        write!(
            f,
            "t={:>8}ms{}  cop=({:+7.2}, {:+7.2})mm  raw=({:+7.2}, {:+7.2})  w={:5.1}kg  snr={:5.1}dB{}",
            self.timestamp_ms,
            v,
            self.x_mm,
            self.y_mm,
            self.raw_x_mm,
            self.raw_y_mm,
            self.weight_kg,
            self.snr_db,
            if self.converged { " ✓" } else { "" },
        )
    }
}

// ─── Compact serialization ──────────────────────────────────────────────────

/// Short-key representation for JSONL session logs.
/// Field mapping: t=timestamp_ms, x/y=compensated mm, rx/ry=raw mm,
/// w=weight_kg, v=valid, s=snr_db, cv=converged, cb=calibrated,
/// ci=calibration_in_progress, h=haptic_active
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactFrame {
    pub t: u64,
    pub x: f64,
    pub y: f64,
    pub rx: f64,
    pub ry: f64,
    pub w: f64,
    pub v: bool,
    pub s: f64,
    pub cv: bool,
    pub cb: bool,
    pub ci: bool,
    pub h: bool,
}

impl From<&CopFrame> for CompactFrame {
    fn from(f: &CopFrame) -> Self {
        Self {
            t: f.timestamp_ms,
            x: f.x_mm,
            y: f.y_mm,
            rx: f.raw_x_mm,
            ry: f.raw_y_mm,
            w: f.weight_kg,
            v: f.valid,
            s: f.snr_db,
            cv: f.converged,
            cb: f.calibrated,
            ci: f.calibration_in_progress,
            h: f.haptic_active,
        }
    }
}

impl From<CompactFrame> for CopFrame {
    fn from(c: CompactFrame) -> Self {
        Self {
            timestamp_ms: c.t,
            x_mm: c.x,
            y_mm: c.y,
            raw_x_mm: c.rx,
            raw_y_mm: c.ry,
            weight_kg: c.w,
            valid: c.v,
            snr_db: c.s,
            converged: c.cv,
            calibrated: c.cb,
            calibration_in_progress: c.ci,
            haptic_active: c.h,
        }
    }
}

// ─── Control commands ───────────────────────────────────────────────────────

/// Mutations of sensor-domain state, sent from the control domain and
/// drained at the top of the next sample. All are idempotent; operations
/// on an already-active resource are no-ops.
#[derive(Debug, Clone, Copy)]
pub enum ControlCommand {
    CompensationEnable(bool),
    CompensationUseNotch(bool),
    CompensationSetStep(f64),
    CompensationSetFrequency(f64),
    StartCalibration,
    CancelCalibration,
    ResetCalibration,
    ResetCompensation,
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the capture session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_frame_roundtrip() {
        let frame = CopFrame {
            timestamp_ms: 1234,
            x_mm: 12.5,
            y_mm: -3.25,
            raw_x_mm: 13.0,
            raw_y_mm: -2.75,
            weight_kg: 61.2,
            valid: true,
            snr_db: 14.7,
            converged: true,
            calibrated: true,
            calibration_in_progress: false,
            haptic_active: true,
        };
        let json = serde_json::to_string(&CompactFrame::from(&frame)).unwrap();
        let back: CopFrame = serde_json::from_str::<CompactFrame>(&json).unwrap().into();
        assert_eq!(back.timestamp_ms, frame.timestamp_ms);
        assert!((back.x_mm - frame.x_mm).abs() < 1e-12);
        assert!((back.snr_db - frame.snr_db).abs() < 1e-12);
        assert_eq!(back.converged, frame.converged);
    }

    #[test]
    fn test_load_total() {
        let s = LoadSample::new(0, 10.0, 11.0, 12.0, 13.0);
        assert!((s.total() - 46.0).abs() < 1e-12);
    }
}
