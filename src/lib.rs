//! # Trigger Logger
//!
//! A Rust library for triggered data acquisition from bench instruments with
//! rotating CSV logs.
//!
//! The acquisition controller arms an instrument, polls its status, evaluates
//! an analog or digital edge trigger, reduces every captured buffer to
//! per-channel statistics and appends one row per capture to time-stamped
//! log files.
//!
//! ## Features
//!
//! - **Driver agnostic**: any instrument binding implementing [`SampleSource`] can be driven
//! - **Trigger configuration**: analog edge, DIO edge and free-running triggers with builders
//! - **Channel statistics**: DC mean, total RMS and AC RMS per channel
//! - **Log rotation**: one file per run, or time-windowed files with a duration ceiling
//! - **Clean shutdown**: log closed, outputs off and device released on every exit path
//!
//! ## Examples
//!
//! ### Analog Trigger
//!
//! ```rust
//! use trigger_logger::{AnalogEdgeTrigger, AnalogSlope, TriggerConfig};
//!
//! let trigger = AnalogEdgeTrigger::start_capturing_when(2.5)
//!     .rising_edge()
//!     .into_trigger()?;
//! assert_eq!(trigger.slope, AnalogSlope::Rising);
//!
//! let setup = trigger.trigger_setup();
//! println!("Analog trigger: {:?}", setup);
//! # Ok::<(), trigger_logger::ConfigError>(())
//! ```
//!
//! ### Digital Trigger
//!
//! ```rust
//! use trigger_logger::{DigitalEdgeTrigger, EdgeDetector};
//!
//! let trigger = DigitalEdgeTrigger::start_capturing_when_pin(3).goes_high();
//! let mut detector = EdgeDetector::new(trigger.mask()?, trigger.slope);
//!
//! let fired: Vec<bool> = [0x00, 0x08, 0x08].iter().map(|&b| detector.observe(b)).collect();
//! assert_eq!(fired, vec![false, true, false]);
//! # Ok::<(), trigger_logger::ConfigError>(())
//! ```
//!
//! ### Channel Statistics
//!
//! ```rust
//! use trigger_logger::SampleStats;
//!
//! let stats = SampleStats::from_samples(&[1.0, -1.0, 1.0, -1.0])?;
//! assert_eq!(stats.mean, 0.0);
//! assert_eq!(stats.rms_ac, 1.0);
//! # Ok::<(), trigger_logger::StatsError>(())
//! ```
//!
//! ### Running an Acquisition
//!
//! ```rust,no_run
//! use trigger_logger::{
//!     AcquisitionController, AnalogEdgeTrigger, CancelToken, InstrumentStatus, RunConfig,
//!     SimulatedSource, SystemClock,
//! };
//!
//! let trigger = AnalogEdgeTrigger::start_capturing_when(2.5)
//!     .rising_edge()
//!     .into_trigger()?;
//! let config = RunConfig::analog_triggered("./data", trigger);
//! let source = SimulatedSource::new(2)
//!     .with_statuses([InstrumentStatus::Armed, InstrumentStatus::Done])
//!     .with_samples(0, vec![2.6; 10]);
//!
//! let mut controller =
//!     AcquisitionController::new(source, SystemClock::default(), config, CancelToken::new())?;
//! let summary = controller.run()?;
//! println!("Logged {} rows", summary.rows_logged);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acquisition;
pub mod clock;
pub mod log_session;
pub mod sample_source;
pub mod simulated_source;
pub mod statistics;
pub mod trigger_config;
pub mod trigger_evaluator;

// Re-export the main types for convenience
pub use trigger_config::{
    AnalogEdgeTrigger, AnalogEdgeTriggerBuilder, AnalogSlope, ConfigError, DigitalEdgeTrigger,
    DigitalSlope, PinTriggerBuilder, Trigger, TriggerConfig,
};

pub use trigger_evaluator::{EdgeDetector, TriggerEvaluator};

pub use statistics::{Channel, SampleStats, StatsError};

pub use sample_source::{
    AcquisitionMode, AcquisitionSetup, ChannelSetup, DeviceError, InstrumentStatus, SampleSource,
    TriggerSetup,
};

pub use simulated_source::{DeviceCall, ScriptEnd, SimulatedSource};

pub use clock::{Clock, ManualClock, SystemClock};

pub use log_session::{LogError, LogSession, RotatingLog, RotationPolicy, Row, RowFormat};

pub use acquisition::{
    AcquisitionController, AcquisitionState, CancelToken, RunConfig, RunSummary, StartupError,
    StopReason,
};
