use crate::types::*;
use crossbeam_channel::Receiver;
use std::io::{self, Write};

/// Renders a live ASCII dashboard of the capture state.
pub struct ConsoleDisplay {
    rx: Receiver<CopFrame>,
    update_hz: u32,
}

/// Plate map dimensions in characters.
const MAP_COLS: usize = 25;
const MAP_ROWS: usize = 11;

impl ConsoleDisplay {
    pub fn new(rx: Receiver<CopFrame>, update_hz: u32) -> Self {
        Self { rx, update_hz }
    }

    pub fn run(&self) {
        let skip = if self.update_hz == 0 {
            6
        } else {
            (SENSOR_RATE_HZ / self.update_hz).max(1) as u64
        };
        let mut count: u64 = 0;
        let mut stdout = io::stdout();

        for frame in self.rx.iter() {
            count += 1;
            if count % skip != 0 {
                continue;
            }

            // Clear screen and move cursor home
            print!("\x1b[2J\x1b[H");

            println!("╔══════════════════════════════════════════════════════════╗");
            println!("║  BALANCE CAPTURE — Live Monitor                          ║");
            println!("╠══════════════════════════════════════════════════════════╣");

            let secs = frame.timestamp_ms as f64 / 1000.0;
            println!("║  Time: {:>8.2}s                                         ║", secs);
            println!("║                                                          ║");

            // Plate map with the CoP crosshair
            if frame.valid {
                for line in plate_map(frame.x_mm, frame.y_mm) {
                    println!("║       {}                          ║", line);
                }
                println!("║                                                          ║");
                println!(
                    "║  CoP: ({:+7.1}, {:+7.1}) mm   raw: ({:+7.1}, {:+7.1})  ║",
                    frame.x_mm, frame.y_mm, frame.raw_x_mm, frame.raw_y_mm
                );
            } else {
                for line in plate_map_empty() {
                    println!("║       {}                          ║", line);
                }
                println!("║                                                          ║");
                println!("║  CoP: --- (plate empty)                                  ║");
            }

            // Weight bar (0–120 kg span)
            let wbar = make_bar((frame.weight_kg / 120.0).clamp(0.0, 1.0), 30);
            println!("║  Weight: {} {:5.1} kg                 ║", wbar, frame.weight_kg);

            // Canceller status
            println!("║                                                          ║");
            let conv = if frame.converged { "converged" } else { "adapting " };
            let haptic = if frame.haptic_active { "ON " } else { "off" };
            println!(
                "║  Haptic: {}   SNR: {:+6.1} dB   Canceller: {}     ║",
                haptic, frame.snr_db, conv
            );

            let cal = if frame.calibration_in_progress {
                "calibrating…"
            } else if frame.calibrated {
                "calibrated  "
            } else {
                "uncalibrated"
            };
            println!("║  Calibration: {}                              ║", cal);

            println!("╚══════════════════════════════════════════════════════════╝");
            let _ = stdout.flush();
        }
    }
}

fn make_bar(val: f64, width: usize) -> String {
    let filled = (val * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Top-down plate outline with the CoP marked. Row 0 is the front edge
/// (positive Y), column 0 the left edge (negative X).
fn plate_map(x_mm: f64, y_mm: f64) -> Vec<String> {
    let col = ((x_mm / PLATE_WIDTH_MM + 0.5) * (MAP_COLS - 1) as f64)
        .round()
        .clamp(0.0, (MAP_COLS - 1) as f64) as usize;
    let row = ((0.5 - y_mm / PLATE_LENGTH_MM) * (MAP_ROWS - 1) as f64)
        .round()
        .clamp(0.0, (MAP_ROWS - 1) as f64) as usize;

    let mut lines = Vec::with_capacity(MAP_ROWS);
    for r in 0..MAP_ROWS {
        let mut line = String::with_capacity(MAP_COLS);
        for c in 0..MAP_COLS {
            if r == row && c == col {
                line.push('●');
            } else if r == MAP_ROWS / 2 && c == MAP_COLS / 2 {
                line.push('+');
            } else {
                line.push('·');
            }
        }
        lines.push(line);
    }
    lines
}

fn plate_map_empty() -> Vec<String> {
    let mut lines = Vec::with_capacity(MAP_ROWS);
    for r in 0..MAP_ROWS {
        let mut line = String::with_capacity(MAP_COLS);
        for c in 0..MAP_COLS {
            if r == MAP_ROWS / 2 && c == MAP_COLS / 2 {
                line.push('+');
            } else {
                line.push('·');
            }
        }
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_map_centers_origin() {
        let lines = plate_map(0.0, 0.0);
        assert_eq!(lines.len(), MAP_ROWS);
        let center = &lines[MAP_ROWS / 2];
        assert_eq!(center.chars().nth(MAP_COLS / 2), Some('●'));
    }

    #[test]
    fn test_plate_map_forward_is_up() {
        let lines = plate_map(0.0, PLATE_LENGTH_MM / 2.0);
        assert!(lines[0].contains('●'), "front edge should map to the top row");
    }

    #[test]
    fn test_plate_map_right_is_right() {
        let lines = plate_map(PLATE_WIDTH_MM / 2.0, 0.0);
        let row = &lines[MAP_ROWS / 2];
        assert_eq!(row.chars().last(), Some('●'));
    }
}
