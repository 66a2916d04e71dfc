use crate::types::*;
use log::{debug, info, warn};

/// Calibration window: 3 s of samples at the nominal 60 Hz sensor rate.
pub const CALIBRATION_TICKS: u32 = 180;
/// Fewer accepted samples than this at window end → calibration failed.
pub const CALIBRATION_MIN_SAMPLES: u32 = 10;

// ─── Raw estimator ──────────────────────────────────────────────────────────

/// Convert four load-cell readings into a center of pressure.
///
/// The CoP is the weighted mean of the cell positions: the left/right
/// imbalance maps to X over the plate width, the front/back imbalance to Y
/// over the plate length. Totals below `MIN_VALID_WEIGHT_KG` are reported
/// as an invalid sample at the origin rather than an error — an empty
/// plate is a normal state, not a failure.
///
/// One division per sample, no allocation, deterministic.
pub fn compute_cop(sample: &LoadSample) -> CopSample {
    let total = sample.total();
    if total < MIN_VALID_WEIGHT_KG {
        return CopSample::empty(sample.timestamp_ms, total);
    }

    let x = (PLATE_WIDTH_MM / 2.0) * ((sample.tr + sample.br) - (sample.tl + sample.bl)) / total;
    let y = (PLATE_LENGTH_MM / 2.0) * ((sample.tl + sample.tr) - (sample.bl + sample.br)) / total;

    CopSample {
        timestamp_ms: sample.timestamp_ms,
        x_mm: x,
        y_mm: y,
        raw_x_mm: x,
        raw_y_mm: y,
        weight_kg: total,
        valid: true,
    }
}

// ─── Calibration ────────────────────────────────────────────────────────────

/// One-shot facts about calibration transitions, delivered synchronously
/// from the sensor domain through a single callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationEvent {
    /// Emitted once per second while accumulating.
    Progress { accepted: u32, ticks: u32 },
    Completed {
        offset_x_mm: f64,
        offset_y_mm: f64,
        tare_kg: f64,
    },
    /// Window elapsed with too few valid samples. Prior calibration, if
    /// any, remains in effect.
    Failed { accepted: u32 },
    Cancelled,
}

pub type CalibrationCallback = Box<dyn FnMut(CalibrationEvent) + Send>;

/// Snapshot of the latched calibration, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationStatus {
    pub offset_x_mm: f64,
    pub offset_y_mm: f64,
    pub tare_kg: f64,
    pub calibrated: bool,
    pub in_progress: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum_x: f64,
    sum_y: f64,
    sum_weight: f64,
    /// Valid samples folded into the sums
    accepted: u32,
    /// All samples seen since start, valid or not — the window clock
    ticks: u32,
}

/// Load-cell → CoP conversion with a clinical-style zero-offset calibration.
///
/// Calibration averages the raw CoP and total weight over a 3 s window
/// while the subject stands still; the mean becomes the new origin and
/// tare. Samples below the weight threshold are skipped but still advance
/// the window, so stepping off mid-calibration ends in `Failed` rather
/// than hanging. Output keeps flowing with the previously latched offsets
/// for the whole window; newly latched values take effect on the sample
/// after completion.
pub struct CopEstimator {
    offset_x_mm: f64,
    offset_y_mm: f64,
    tare_kg: f64,
    calibrated: bool,
    accumulator: Option<Accumulator>,
    on_calibration: Option<CalibrationCallback>,
}

impl CopEstimator {
    pub fn new() -> Self {
        Self {
            offset_x_mm: 0.0,
            offset_y_mm: 0.0,
            tare_kg: 0.0,
            calibrated: false,
            accumulator: None,
            on_calibration: None,
        }
    }

    /// Install the calibration event callback. One consumer, one function
    /// value — no subscription registry.
    pub fn set_calibration_callback(&mut self, cb: CalibrationCallback) {
        self.on_calibration = Some(cb);
    }

    pub fn status(&self) -> CalibrationStatus {
        CalibrationStatus {
            offset_x_mm: self.offset_x_mm,
            offset_y_mm: self.offset_y_mm,
            tare_kg: self.tare_kg,
            calibrated: self.calibrated,
            in_progress: self.accumulator.is_some(),
        }
    }

    /// Begin accumulating. Only honored from Idle; returns false (and
    /// changes nothing) if a calibration is already running.
    pub fn start_calibration(&mut self) -> bool {
        if self.accumulator.is_some() {
            debug!("start_calibration ignored: already accumulating");
            return false;
        }
        info!(
            "Calibration started ({} samples, {:.1}s)",
            CALIBRATION_TICKS,
            CALIBRATION_TICKS as f64 / SENSOR_RATE_HZ as f64
        );
        self.accumulator = Some(Accumulator::default());
        true
    }

    /// Discard the accumulator. Previously latched values are untouched.
    /// Returns false if no calibration was running.
    pub fn cancel_calibration(&mut self) -> bool {
        if self.accumulator.take().is_none() {
            return false;
        }
        info!("Calibration cancelled");
        self.emit(CalibrationEvent::Cancelled);
        true
    }

    /// Clear latched offsets and tare, returning to the uncalibrated state.
    /// Any running accumulation is discarded as well.
    pub fn reset_calibration(&mut self) {
        self.offset_x_mm = 0.0;
        self.offset_y_mm = 0.0;
        self.tare_kg = 0.0;
        self.calibrated = false;
        self.accumulator = None;
        info!("Calibration reset");
    }

    /// Process one load sample: convert to CoP, feed the calibration
    /// accumulator if one is running, and apply the latched offsets.
    pub fn process(&mut self, sample: &LoadSample) -> CopSample {
        let raw = compute_cop(sample);

        // Offsets as latched *before* this sample — a completing window
        // takes effect starting with the next sample.
        let (offset_x, offset_y) = (self.offset_x_mm, self.offset_y_mm);

        if let Some(acc) = self.accumulator.as_mut() {
            acc.ticks += 1;
            if raw.valid {
                acc.sum_x += raw.raw_x_mm;
                acc.sum_y += raw.raw_y_mm;
                acc.sum_weight += raw.weight_kg;
                acc.accepted += 1;
            }
        }

        match self.accumulator {
            Some(acc) if acc.ticks >= CALIBRATION_TICKS => {
                self.accumulator = None;
                self.finish_calibration(acc);
            }
            Some(acc) if acc.ticks % SENSOR_RATE_HZ == 0 => {
                self.emit(CalibrationEvent::Progress {
                    accepted: acc.accepted,
                    ticks: acc.ticks,
                });
            }
            _ => {}
        }

        if !raw.valid {
            return raw;
        }

        CopSample {
            x_mm: raw.raw_x_mm - offset_x,
            y_mm: raw.raw_y_mm - offset_y,
            ..raw
        }
    }

    fn finish_calibration(&mut self, acc: Accumulator) {
        if acc.accepted < CALIBRATION_MIN_SAMPLES {
            warn!(
                "Calibration failed: only {} valid samples of {} required",
                acc.accepted, CALIBRATION_MIN_SAMPLES
            );
            self.emit(CalibrationEvent::Failed {
                accepted: acc.accepted,
            });
            return;
        }

        let n = acc.accepted as f64;
        self.offset_x_mm = acc.sum_x / n;
        self.offset_y_mm = acc.sum_y / n;
        self.tare_kg = acc.sum_weight / n;
        self.calibrated = true;

        info!(
            "Calibration complete: offset=({:.2}, {:.2})mm tare={:.2}kg from {} samples",
            self.offset_x_mm, self.offset_y_mm, self.tare_kg, acc.accepted
        );
        self.emit(CalibrationEvent::Completed {
            offset_x_mm: self.offset_x_mm,
            offset_y_mm: self.offset_y_mm,
            tare_kg: self.tare_kg,
        });
    }

    fn emit(&mut self, event: CalibrationEvent) {
        if let Some(cb) = self.on_calibration.as_mut() {
            cb(event);
        }
    }
}

impl Default for CopEstimator {
    fn default() -> Self {
        Self::new()
    }
}
