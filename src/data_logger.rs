use crate::types::*;
use crossbeam_channel::Receiver;
use log::{error, info};
use serde_json::json;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes each session to its own directory: a manifest, the frame stream
/// as JSONL (compact keys), and closing stats.
pub struct DataLogger {
    rx: Receiver<CopFrame>,
    session_dir: PathBuf,
}

impl DataLogger {
    pub fn new(rx: Receiver<CopFrame>, output_dir: &Path) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let session_dir = output_dir.join(format!("session_{}", timestamp));
        fs::create_dir_all(&session_dir).expect("create session dir");

        Self { rx, session_dir }
    }

    /// Run the logger. Blocks the calling thread until the frame channel
    /// closes.
    pub fn run(&self) {
        info!("Data logger → {:?}", self.session_dir);

        self.write_manifest();

        let frames_path = self.session_dir.join("frames.jsonl");
        let frames_file = File::create(&frames_path).expect("create frames file");
        let mut frames_writer = BufWriter::new(frames_file);

        let mut frame_count: u64 = 0;
        let mut valid_count: u64 = 0;
        let mut converged_ms: Option<u64> = None;

        for frame in self.rx.iter() {
            let compact = CompactFrame::from(&frame);
            let line = serde_json::to_string(&compact).unwrap();
            let _ = writeln!(frames_writer, "{}", line);

            frame_count += 1;
            if frame.valid {
                valid_count += 1;
            }
            if frame.converged && converged_ms.is_none() {
                converged_ms = Some(frame.timestamp_ms);
            }

            if frame_count % 1000 == 0 {
                let _ = frames_writer.flush();
                info!("Logged {} frames", frame_count);
            }
        }

        let _ = frames_writer.flush();

        let stats_path = self.session_dir.join("stats.json");
        let stats = json!({
            "total_frames": frame_count,
            "valid_frames": valid_count,
            "first_converged_ms": converged_ms,
        });
        fs::write(&stats_path, serde_json::to_string_pretty(&stats).unwrap())
            .unwrap_or_else(|e| error!("Failed to write stats: {}", e));

        info!(
            "Session saved: {} frames → {:?}",
            frame_count, self.session_dir
        );
    }

    fn write_manifest(&self) {
        let manifest = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "system": "balance-capture",
            "plate": {
                "length_mm": PLATE_LENGTH_MM,
                "width_mm": PLATE_WIDTH_MM,
                "min_valid_weight_kg": MIN_VALID_WEIGHT_KG,
            },
            "sensor_config": {
                "cells": ["tl", "tr", "bl", "br"],
                "rate_hz": SENSOR_RATE_HZ,
                "units": "kg",
            },
            "frame_keys": {
                "t": "timestamp_ms",
                "x": "compensated_x_mm",
                "y": "compensated_y_mm",
                "rx": "raw_x_mm",
                "ry": "raw_y_mm",
                "w": "weight_kg",
                "v": "valid",
                "s": "snr_improvement_db",
                "cv": "converged",
                "cb": "calibrated",
                "ci": "calibration_in_progress",
                "h": "haptic_active",
            },
        });

        let path = self.session_dir.join("manifest.json");
        fs::write(&path, serde_json::to_string_pretty(&manifest).unwrap())
            .expect("write manifest");
    }
}
