use crate::synth::{PhaseCell, SynthParams};
use crate::types::*;
use crossbeam_channel::Sender;
use log::info;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Generates realistic simulated load-cell data that exercises the full
/// capture pipeline without any hardware: a subject stepping on, standing,
/// leaning, and swaying — with optional shaker contamination derived from
/// the live synthesizer phase so the canceller has something real to learn.
pub struct Simulator {
    clock: SessionClock,
    tx: Sender<LoadSample>,
    sensor_rate_hz: u32,
    /// Stop after this much session time; None = run until the channel closes.
    duration_ms: Option<u64>,
    /// Synth handles for contamination. None = clean signal.
    synth_params: Option<Arc<SynthParams>>,
    phase: Option<Arc<PhaseCell>>,
    /// Peak cell-level wobble in kg per unit synth amplitude.
    coupling_kg: f64,
    stopped: bool,
}

/// Mutable subject state that evolves as gestures are applied.
#[derive(Clone, Copy)]
struct SimState {
    weight_kg: f64,
    x_mm: f64,
    y_mm: f64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            weight_kg: 0.0,
            x_mm: 0.0,
            y_mm: 0.0,
        }
    }
}

/// Distribute a target CoP and total weight across the four cells —
/// the exact inverse of the estimator's mapping.
pub fn distribute_load(timestamp_ms: u64, x_mm: f64, y_mm: f64, weight_kg: f64) -> LoadSample {
    let fx_right = (0.5 + x_mm / PLATE_WIDTH_MM).clamp(0.0, 1.0);
    let fy_front = (0.5 + y_mm / PLATE_LENGTH_MM).clamp(0.0, 1.0);
    LoadSample::new(
        timestamp_ms,
        weight_kg * (1.0 - fx_right) * fy_front,
        weight_kg * fx_right * fy_front,
        weight_kg * (1.0 - fx_right) * (1.0 - fy_front),
        weight_kg * fx_right * (1.0 - fy_front),
    )
}

impl Simulator {
    pub fn new(clock: SessionClock, tx: Sender<LoadSample>, sensor_rate_hz: u32) -> Self {
        Self {
            clock,
            tx,
            sensor_rate_hz,
            duration_ms: None,
            synth_params: None,
            phase: None,
            coupling_kg: 1.5,
            stopped: false,
        }
    }

    /// Couple the simulated plate to the synthesizer: while it plays, the
    /// cells pick up a wobble at the drive frequency and its harmonics.
    pub fn with_shaker(mut self, params: Arc<SynthParams>, phase: Arc<PhaseCell>) -> Self {
        self.synth_params = Some(params);
        self.phase = Some(phase);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Run the demo sequence, then hold the final stance. Blocks the
    /// calling thread; returns when the duration elapses or the
    /// coordinator side of the channel closes.
    pub fn run(&mut self) {
        info!("Simulator starting demo sequence...");
        let mut state = SimState::default();
        let tick_us = 1_000_000 / self.sensor_rate_hz as u64;

        for gesture in demo_sequence() {
            self.execute(&gesture, &mut state, tick_us);
            if self.stopped {
                info!("Simulator stopped mid-sequence");
                return;
            }
        }

        info!("Demo sequence complete. Holding final stance...");
        while !self.stopped {
            self.emit_tick(&state, tick_us);
        }
    }

    fn execute(&mut self, gesture: &Gesture, state: &mut SimState, tick_us: u64) {
        match gesture {
            Gesture::Wait { ms } => {
                info!("  empty plate {}ms", ms);
                let target = SimState::default();
                self.ramp(state, target, *ms, tick_us);
            }

            Gesture::StepOn { weight_kg, ms } => {
                info!("  step on → {:.0}kg over {}ms", weight_kg, ms);
                let target = SimState {
                    weight_kg: *weight_kg,
                    x_mm: 0.0,
                    y_mm: 0.0,
                };
                self.ramp(state, target, *ms, tick_us);
            }

            Gesture::Hold { ms } => {
                info!("  hold {}ms", ms);
                let ticks = (*ms as u64 * 1000) / tick_us;
                for _ in 0..ticks {
                    self.emit_tick(state, tick_us);
                }
            }

            Gesture::LeanTo { x_mm, y_mm, ms } => {
                info!("  lean → ({:+.0}, {:+.0})mm over {}ms", x_mm, y_mm, ms);
                let target = SimState {
                    weight_kg: state.weight_kg,
                    x_mm: *x_mm,
                    y_mm: *y_mm,
                };
                self.ramp(state, target, *ms, tick_us);
            }

            Gesture::Sway {
                x_amp_mm,
                y_amp_mm,
                rate_hz,
                ms,
            } => {
                info!(
                    "  sway amp=({:.0}, {:.0})mm rate={:.1}Hz for {}ms",
                    x_amp_mm, y_amp_mm, rate_hz, ms
                );
                let center = *state;
                let ticks = (*ms as u64 * 1000) / tick_us;
                for i in 0..ticks {
                    let t = (i as f64 * tick_us as f64) / 1_000_000.0;
                    let swing = (TAU * rate_hz * t).sin();
                    state.x_mm = center.x_mm + x_amp_mm * swing;
                    state.y_mm = center.y_mm + y_amp_mm * swing;
                    self.emit_tick(state, tick_us);
                }
                *state = center;
            }

            Gesture::StepOff { ms } => {
                info!("  step off over {}ms", ms);
                let target = SimState::default();
                self.ramp(state, target, *ms, tick_us);
            }
        }
    }

    fn ramp(&mut self, state: &mut SimState, target: SimState, ms: u32, tick_us: u64) {
        let from = *state;
        let ticks = ((ms as u64 * 1000) / tick_us).max(1);
        for i in 0..ticks {
            let t = smoothstep(i as f64 / ticks as f64);
            state.weight_kg = lerp(from.weight_kg, target.weight_kg, t);
            state.x_mm = lerp(from.x_mm, target.x_mm, t);
            state.y_mm = lerp(from.y_mm, target.y_mm, t);
            self.emit_tick(state, tick_us);
        }
        *state = target;
    }

    /// Emit one load sample and sleep until the next tick.
    fn emit_tick(&mut self, state: &SimState, tick_us: u64) {
        if self.stopped {
            return;
        }
        let ts = self.clock.now_ms();
        if let Some(limit) = self.duration_ms {
            if ts >= limit {
                self.stopped = true;
                return;
            }
        }

        let mut sample = distribute_load(ts, state.x_mm, state.y_mm, state.weight_kg);

        // Shaker coupling: the drive and its first harmonics show up as a
        // front/back moment on the cells, exactly what the canceller is for.
        if let (Some(params), Some(phase)) = (self.synth_params.as_ref(), self.phase.as_ref()) {
            if params.playing() && state.weight_kg > 0.0 {
                let phi = phase.load();
                let wobble = self.coupling_kg
                    * params.amplitude()
                    * (phi.sin() + 0.3 * (2.0 * phi).sin() + 0.15 * (3.0 * phi).sin());
                sample.tl = (sample.tl + wobble / 2.0).max(0.0);
                sample.tr = (sample.tr + wobble / 2.0).max(0.0);
                sample.bl = (sample.bl - wobble / 2.0).max(0.0);
                sample.br = (sample.br - wobble / 2.0).max(0.0);
            }
        }

        if self.tx.send(sample).is_err() {
            // Coordinator shut down — stop generating.
            self.stopped = true;
            return;
        }

        thread::sleep(Duration::from_micros(tick_us));
    }
}

// ─── Gesture types ──────────────────────────────────────────────────────────

enum Gesture {
    /// Empty plate
    Wait { ms: u32 },
    /// Ramp the subject's weight onto the plate, centered
    StepOn { weight_kg: f64, ms: u32 },
    /// Keep the current stance
    Hold { ms: u32 },
    /// Shift the CoP to a target position
    LeanTo { x_mm: f64, y_mm: f64, ms: u32 },
    /// Sinusoidal CoP oscillation around the current stance
    Sway {
        x_amp_mm: f64,
        y_amp_mm: f64,
        rate_hz: f64,
        ms: u32,
    },
    /// Ramp back to an empty plate
    StepOff { ms: u32 },
}

/// A demo balance session: step on, settle, lean in each direction, sway,
/// step off. Roughly 30 seconds.
fn demo_sequence() -> Vec<Gesture> {
    vec![
        Gesture::Wait { ms: 1000 },
        Gesture::StepOn {
            weight_kg: 70.0,
            ms: 600,
        },
        // Quiet standing — long enough for a calibration window
        Gesture::Hold { ms: 5000 },
        // Lean forward, hold, return
        Gesture::LeanTo {
            x_mm: 0.0,
            y_mm: 60.0,
            ms: 1200,
        },
        Gesture::Hold { ms: 1500 },
        Gesture::LeanTo {
            x_mm: 0.0,
            y_mm: 0.0,
            ms: 1200,
        },
        // Side lean
        Gesture::LeanTo {
            x_mm: -45.0,
            y_mm: 0.0,
            ms: 1000,
        },
        Gesture::Hold { ms: 1500 },
        Gesture::LeanTo {
            x_mm: 0.0,
            y_mm: 0.0,
            ms: 1000,
        },
        // Slow postural sway, the signal the canceller must preserve
        Gesture::Sway {
            x_amp_mm: 25.0,
            y_amp_mm: 0.0,
            rate_hz: 0.4,
            ms: 6000,
        },
        Gesture::Sway {
            x_amp_mm: 0.0,
            y_amp_mm: 35.0,
            rate_hz: 0.3,
            ms: 6000,
        },
        Gesture::Hold { ms: 3000 },
        Gesture::StepOff { ms: 800 },
        Gesture::Wait { ms: 1000 },
    ]
}

// ─── Math helpers ───────────────────────────────────────────────────────────

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Smooth interpolation (ease in/out)
fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
