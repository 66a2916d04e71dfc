use crate::canceller::{CancellerMetrics, HarmonicCanceller};
use crate::estimator::{CalibrationStatus, CopEstimator};
use crate::synth::{PhaseCell, SynthParams};
use crate::types::*;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, trace};
use std::sync::Arc;

/// The sensor-domain processing chain: estimator → calibration → canceller.
///
/// Owned by the host (or by a [`Coordinator`] thread) and driven one
/// sample at a time — no channels, no locking, no allocation per sample.
/// The synthesizer is attached by handle: the pipeline reads its `playing`
/// flag and exported phase, nothing more.
pub struct SensorPipeline {
    estimator: CopEstimator,
    canceller: HarmonicCanceller,
    synth_params: Option<Arc<SynthParams>>,
    phase: Option<Arc<PhaseCell>>,
}

impl SensorPipeline {
    pub fn new(drive_hz: f64) -> Self {
        Self {
            estimator: CopEstimator::new(),
            canceller: HarmonicCanceller::new(drive_hz),
            synth_params: None,
            phase: None,
        }
    }

    /// Attach the live synthesizer: its `playing` flag gates the canceller
    /// and its exported phase becomes the cancellation reference.
    pub fn with_synth(mut self, params: Arc<SynthParams>, phase: Arc<PhaseCell>) -> Self {
        self.synth_params = Some(params);
        self.phase = Some(phase);
        self
    }

    pub fn estimator_mut(&mut self) -> &mut CopEstimator {
        &mut self.estimator
    }

    pub fn canceller_mut(&mut self) -> &mut HarmonicCanceller {
        &mut self.canceller
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        self.estimator.status()
    }

    pub fn canceller_metrics(&self) -> CancellerMetrics {
        self.canceller.metrics()
    }

    /// Apply one control mutation. Runs in the sensor domain, between
    /// samples, so no state is touched mid-update.
    pub fn apply(&mut self, cmd: ControlCommand) {
        trace!("control: {:?}", cmd);
        match cmd {
            ControlCommand::CompensationEnable(on) => self.canceller.set_enabled(on),
            ControlCommand::CompensationUseNotch(on) => self.canceller.set_use_notch(on),
            ControlCommand::CompensationSetStep(mu) => self.canceller.set_step_size(mu),
            ControlCommand::CompensationSetFrequency(hz) => self.canceller.set_frequency(hz),
            ControlCommand::StartCalibration => {
                self.estimator.start_calibration();
            }
            ControlCommand::CancelCalibration => {
                self.estimator.cancel_calibration();
            }
            ControlCommand::ResetCalibration => self.estimator.reset_calibration(),
            ControlCommand::ResetCompensation => self.canceller.reset(),
        }
    }

    /// Process one load-cell sample into a complete output frame.
    pub fn process(&mut self, sample: &LoadSample) -> CopFrame {
        let cop = self.estimator.process(sample);

        let haptic_active = self
            .synth_params
            .as_ref()
            .map(|p| p.playing())
            .unwrap_or(false);

        // Invalid samples carry no position — nothing for the canceller to
        // learn from, so they bypass it entirely.
        let (x, y) = if cop.valid {
            let phase = if haptic_active {
                self.phase.as_ref().map(|c| c.load())
            } else {
                None
            };
            self.canceller.process(cop.x_mm, cop.y_mm, phase, haptic_active)
        } else {
            (cop.x_mm, cop.y_mm)
        };

        let cal = self.estimator.status();
        CopFrame {
            timestamp_ms: cop.timestamp_ms,
            x_mm: x,
            y_mm: y,
            raw_x_mm: cop.raw_x_mm,
            raw_y_mm: cop.raw_y_mm,
            weight_kg: cop.weight_kg,
            valid: cop.valid,
            snr_db: self.canceller.snr_improvement_db(),
            converged: self.canceller.converged(),
            calibrated: cal.calibrated,
            calibration_in_progress: cal.in_progress,
            haptic_active,
        }
    }
}

/// Channel-driven wrapper around [`SensorPipeline`]: receives load samples,
/// drains pending control commands at the top of each sample, and fans the
/// resulting frames out to every registered consumer.
///
/// Consumers that fall behind lose frames silently — the sample path never
/// blocks on a slow display or logger.
pub struct Coordinator {
    input_rx: Receiver<LoadSample>,
    control_rx: Receiver<ControlCommand>,
    frame_txs: Vec<Sender<CopFrame>>,
    pipeline: SensorPipeline,
}

impl Coordinator {
    pub fn new(
        input_rx: Receiver<LoadSample>,
        control_rx: Receiver<ControlCommand>,
        frame_txs: Vec<Sender<CopFrame>>,
        pipeline: SensorPipeline,
    ) -> Self {
        Self {
            input_rx,
            control_rx,
            frame_txs,
            pipeline,
        }
    }

    /// Run until the input channel closes. Blocks the calling thread.
    pub fn run(&mut self) {
        info!("Coordinator running");
        let mut frame_count: u64 = 0;

        for sample in self.input_rx.iter() {
            // Control mutations take effect at the top of the next sample;
            // in-flight work is never interrupted.
            while let Ok(cmd) = self.control_rx.try_recv() {
                self.pipeline.apply(cmd);
            }

            let frame = self.pipeline.process(&sample);
            for tx in &self.frame_txs {
                let _ = tx.try_send(frame);
            }

            frame_count += 1;
            if frame_count % 600 == 0 {
                debug!("Coordinator: {} frames processed", frame_count);
                trace!("Latest: {}", frame);
            }
        }

        info!("Coordinator shutting down after {} frames", frame_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pipeline_produces_frames() {
        let mut pipeline = SensorPipeline::new(30.0);
        let frame = pipeline.process(&LoadSample::new(7, 15.0, 15.0, 15.0, 15.0));
        assert!(frame.valid);
        assert_eq!(frame.timestamp_ms, 7);
        assert_eq!(frame.x_mm, 0.0);
        assert_eq!(frame.y_mm, 0.0);
        assert!(!frame.haptic_active, "no synth attached");
    }

    #[test]
    fn test_pipeline_applies_control() {
        let mut pipeline = SensorPipeline::new(30.0);
        pipeline.apply(ControlCommand::CompensationSetStep(0.25));
        assert_eq!(pipeline.canceller_metrics().samples, 0);
        pipeline.apply(ControlCommand::StartCalibration);
        assert!(pipeline.calibration_status().in_progress);
        pipeline.apply(ControlCommand::CancelCalibration);
        assert!(!pipeline.calibration_status().in_progress);
    }

    #[test]
    fn test_coordinator_fans_out() {
        let (input_tx, input_rx) = bounded::<LoadSample>(256);
        let (_control_tx, control_rx) = bounded::<ControlCommand>(16);
        let (frame_tx, frame_rx) = bounded::<CopFrame>(256);
        let (frame_tx2, frame_rx2) = bounded::<CopFrame>(256);

        let handle = thread::Builder::new()
            .name("test-coordinator".into())
            .spawn(move || {
                let pipeline = SensorPipeline::new(30.0);
                Coordinator::new(input_rx, control_rx, vec![frame_tx, frame_tx2], pipeline).run();
            })
            .unwrap();

        for n in 0..10 {
            input_tx
                .send(LoadSample::new(n, 15.0, 15.0, 15.0, 15.0))
                .unwrap();
        }
        drop(input_tx);
        handle.join().unwrap();

        let mut count = 0;
        while frame_rx.recv_timeout(Duration::from_millis(100)).is_ok() {
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(frame_rx2.try_iter().count(), 10, "both consumers get frames");
    }

    #[test]
    fn test_control_takes_effect_next_sample() {
        let (input_tx, input_rx) = bounded::<LoadSample>(16);
        let (control_tx, control_rx) = bounded::<ControlCommand>(16);
        let (frame_tx, frame_rx) = bounded::<CopFrame>(16);

        let handle = thread::Builder::new()
            .name("test-coordinator".into())
            .spawn(move || {
                let pipeline = SensorPipeline::new(30.0);
                Coordinator::new(input_rx, control_rx, vec![frame_tx], pipeline).run();
            })
            .unwrap();

        control_tx.send(ControlCommand::StartCalibration).unwrap();
        input_tx.send(LoadSample::new(0, 15.0, 15.0, 15.0, 15.0)).unwrap();
        drop(input_tx);
        handle.join().unwrap();

        let frame = frame_rx.recv().unwrap();
        assert!(
            frame.calibration_in_progress,
            "command sent before the sample must be visible in its frame"
        );
    }
}
