pub mod canceller;
pub mod console_display;
pub mod coordinator;
pub mod data_logger;
pub mod estimator;
pub mod filters;
pub mod simulator;
pub mod synth;
pub mod types;
pub mod wav_export;

#[cfg(feature = "audio")]
pub mod audio_output;
