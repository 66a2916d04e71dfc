use balance_capture::console_display;
use balance_capture::coordinator::{Coordinator, SensorPipeline};
use balance_capture::data_logger;
use balance_capture::simulator;
use balance_capture::synth::{HapticSynth, PhaseCell, SignalKind, SynthParams, AUDIO_SAMPLE_RATE};
use balance_capture::types::*;
use balance_capture::wav_export;

use clap::Parser;
use crossbeam_channel::{bounded, unbounded};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "balance-capture")]
#[command(about = "Balance plate CoP capture with adaptive haptic interference cancellation")]
struct Cli {
    /// Run in simulator mode (no hardware required). This is currently the
    /// only input source; the balance-plate reader plugs in externally.
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true")]
    simulate: bool,

    /// Haptic drive frequency (Hz)
    #[arg(long, default_value_t = 30.0)]
    freq: f64,

    /// Haptic drive amplitude (0..1)
    #[arg(long, default_value_t = 0.5)]
    amplitude: f64,

    /// Haptic signal type: "sine", "noise", or "snow"
    #[arg(long, default_value = "sine")]
    signal: String,

    /// Velocity for the snow texture (0..1)
    #[arg(long, default_value_t = 0.5)]
    velocity: f64,

    /// Band-limited-noise bandwidth (Hz)
    #[arg(long, default_value_t = 20.0)]
    noise_bw: f64,

    /// Disable the haptic drive entirely (canceller becomes a pass-through)
    #[arg(long)]
    no_haptic: bool,

    /// Disable interference compensation
    #[arg(long)]
    no_compensation: bool,

    /// Use the IIR notch fallback instead of NLMS
    #[arg(long)]
    notch: bool,

    /// NLMS step size μ
    #[arg(long, default_value_t = 0.5)]
    step: f64,

    /// Sensor sample rate (Hz)
    #[arg(long, default_value_t = 60)]
    sensor_rate: u32,

    /// Start a zero-offset calibration this many seconds into the session
    #[arg(long)]
    calibrate_at: Option<f64>,

    /// Enable console display (terminal dashboard)
    #[arg(long)]
    console: bool,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,

    /// Enable data logging
    #[arg(long)]
    log_data: bool,

    /// Output directory for logged sessions
    #[arg(long, default_value = "./sessions")]
    output_dir: PathBuf,

    /// Stop after this many seconds (0 = run until Ctrl+C)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Render the synthesizer to a WAV file and exit (no capture session)
    #[arg(long)]
    render_wav: Option<PathBuf>,

    /// Length of the WAV render in seconds
    #[arg(long, default_value_t = 5.0)]
    render_secs: f64,

    /// Play the haptic drive on the default audio output device.
    /// Requires: --features audio.
    #[cfg(feature = "audio")]
    #[arg(long)]
    audio: bool,
}

fn parse_signal(name: &str) -> Option<SignalKind> {
    match name {
        "sine" => Some(SignalKind::Sine),
        "noise" => Some(SignalKind::BandNoise),
        "snow" => Some(SignalKind::Snow),
        _ => None,
    }
}

/// Drive the synthesizer at real-time pace without an audio device, so the
/// exported phase keeps advancing for the canceller and the simulator's
/// shaker coupling. Stands in for the device callback in headless runs.
fn run_headless_synth(mut synth: HapticSynth) {
    const FRAMES: usize = 480; // 10ms at 48kHz
    let mut buf = vec![0.0f32; FRAMES * 2];
    let chunk_dur = Duration::from_micros(10_000);
    let start = Instant::now();
    let mut chunks: u32 = 0;

    loop {
        synth.render(&mut buf, 2);
        chunks = chunks.wrapping_add(1);
        let target = chunk_dur * chunks;
        let elapsed = start.elapsed();
        if elapsed < target {
            thread::sleep(target - elapsed);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let signal = match parse_signal(&cli.signal) {
        Some(s) => s,
        None => {
            error!("Unknown signal type {:?} (use sine, noise, or snow)", cli.signal);
            std::process::exit(1);
        }
    };

    let params = Arc::new(SynthParams::new(cli.freq, cli.amplitude));
    params.set_signal(signal);
    params.set_velocity(cli.velocity);
    params.set_noise_bandwidth(cli.noise_bw);
    let phase = Arc::new(PhaseCell::new());

    // ─── WAV render mode ────────────────────────────────────────────
    if let Some(path) = cli.render_wav {
        params.set_playing(true);
        let mut synth = HapticSynth::new(AUDIO_SAMPLE_RATE, params, phase);
        match wav_export::render_wav(&path, &mut synth, AUDIO_SAMPLE_RATE, cli.render_secs) {
            Ok(_) => println!("Rendered to {:?}", path),
            Err(e) => {
                error!("WAV render failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    params.set_playing(!cli.no_haptic);

    info!("═══════════════════════════════════════════════");
    info!("  BALANCE CAPTURE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Mode: {}", if cli.simulate { "SIMULATOR" } else { "SIMULATOR (hardware reader not wired)" });
    info!(
        "  Haptic: {} {:.1} Hz amp {:.2}{}",
        cli.signal,
        cli.freq,
        cli.amplitude,
        if cli.no_haptic { " (OFF)" } else { "" }
    );
    info!(
        "  Compensation: {}",
        if cli.no_compensation {
            "off"
        } else if cli.notch {
            "notch"
        } else {
            "NLMS"
        }
    );
    info!("═══════════════════════════════════════════════");

    let clock = SessionClock::new();

    // Channel: load samples → coordinator
    let (input_tx, input_rx) = bounded::<LoadSample>(256);
    // Channel: control commands → coordinator
    let (control_tx, control_rx) = unbounded::<ControlCommand>();
    // Channels: coordinator → consumers
    let mut frame_txs: Vec<crossbeam_channel::Sender<CopFrame>> = Vec::new();

    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if cli.console {
        let (tx, rx) = bounded::<CopFrame>(256);
        frame_txs.push(tx);
        let hz = cli.display_hz;
        handles.push(
            thread::Builder::new()
                .name("display".into())
                .spawn(move || {
                    console_display::ConsoleDisplay::new(rx, hz).run();
                })
                .unwrap(),
        );
    }

    // ─── Data logger ────────────────────────────────────────────────
    if cli.log_data {
        let (tx, rx) = bounded::<CopFrame>(4096);
        frame_txs.push(tx);
        let output_dir = cli.output_dir.clone();
        handles.push(
            thread::Builder::new()
                .name("logger".into())
                .spawn(move || {
                    data_logger::DataLogger::new(rx, &output_dir).run();
                })
                .unwrap(),
        );
    }

    // ─── Initial compensation configuration ─────────────────────────
    let _ = control_tx.send(ControlCommand::CompensationSetStep(cli.step));
    if cli.notch {
        let _ = control_tx.send(ControlCommand::CompensationUseNotch(true));
    }
    if cli.no_compensation {
        let _ = control_tx.send(ControlCommand::CompensationEnable(false));
    }

    // ─── Coordinator ────────────────────────────────────────────────
    let pipeline = SensorPipeline::new(cli.freq).with_synth(params.clone(), phase.clone());
    handles.push(
        thread::Builder::new()
            .name("coordinator".into())
            .spawn(move || {
                Coordinator::new(input_rx, control_rx, frame_txs, pipeline).run();
            })
            .unwrap(),
    );

    // ─── Scheduled calibration ──────────────────────────────────────
    if let Some(secs) = cli.calibrate_at {
        let cal_tx = control_tx.clone();
        thread::Builder::new()
            .name("calibrate-at".into())
            .spawn(move || {
                thread::sleep(Duration::from_secs_f64(secs));
                info!("Requesting calibration");
                let _ = cal_tx.send(ControlCommand::StartCalibration);
            })
            .unwrap();
    }

    // ─── Synthesizer host ───────────────────────────────────────────
    // With the audio feature and --audio, the device callback owns the
    // synth. Otherwise a paced headless thread stands in so the phase
    // export stays live.
    #[cfg(feature = "audio")]
    let audio_requested = cli.audio;
    #[cfg(not(feature = "audio"))]
    let audio_requested = false;

    #[cfg(feature = "audio")]
    let mut _audio_output = None;
    if audio_requested {
        #[cfg(feature = "audio")]
        {
            use balance_capture::audio_output::AudioOutput;
            match AudioOutput::start(params.clone(), phase.clone()) {
                Ok(out) => {
                    info!("Audio output running at {} Hz", out.sample_rate);
                    _audio_output = Some(out);
                }
                Err(e) => {
                    error!("Audio output failed: {}", e);
                    error!("Falling back to headless synthesis.");
                    let synth =
                        HapticSynth::new(AUDIO_SAMPLE_RATE, params.clone(), phase.clone());
                    thread::Builder::new()
                        .name("synth".into())
                        .spawn(move || run_headless_synth(synth))
                        .unwrap();
                }
            }
        }
    } else {
        let synth = HapticSynth::new(AUDIO_SAMPLE_RATE, params.clone(), phase.clone());
        thread::Builder::new()
            .name("synth".into())
            .spawn(move || run_headless_synth(synth))
            .unwrap();
    }

    // ─── Input source ───────────────────────────────────────────────
    info!("Starting simulator...");
    let sim_clock = clock.clone();
    let sim_params = params.clone();
    let sim_phase = phase.clone();
    let rate = cli.sensor_rate;
    let duration = cli.duration;
    handles.push(
        thread::Builder::new()
            .name("simulator".into())
            .spawn(move || {
                let mut sim = simulator::Simulator::new(sim_clock, input_tx, rate)
                    .with_shaker(sim_params, sim_phase);
                if duration > 0 {
                    sim = sim.with_duration_ms(duration * 1000);
                }
                sim.run();
            })
            .unwrap(),
    );

    if cli.duration == 0 {
        info!("Running until Ctrl+C.");
    }
    for h in handles {
        let _ = h.join();
    }
}
