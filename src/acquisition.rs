//! The triggered-acquisition run loop.
//!
//! [`AcquisitionController`] owns the instrument, the trigger evaluator and
//! the rotating log, and walks them through
//! `Idle → Armed → WaitingForTrigger → Captured → LoggedRow → WaitingForTrigger`
//! until cancellation or a device error moves it to `ShuttingDown`.
//! Teardown (close the log, switch outputs off, release the device) runs
//! exactly once, from [`AcquisitionController::run`] or on drop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset};

use crate::clock::{Clock, DEFAULT_UTC_OFFSET_SECS};
use crate::log_session::{LogError, RotatingLog, RotationPolicy, Row, RowFormat};
use crate::sample_source::{
    AcquisitionMode, AcquisitionSetup, ChannelSetup, DeviceError, SampleSource, TriggerSource,
};
use crate::statistics::{Channel, StatsError};
use crate::trigger_config::{
    AnalogEdgeTrigger, ConfigError, DigitalEdgeTrigger, Trigger, TriggerConfig,
};
use crate::trigger_evaluator::TriggerEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Armed,
    WaitingForTrigger,
    Captured,
    LoggedRow,
    ShuttingDown,
}

/// Externally set request to stop the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Errors that abort the run before the first capture. Nothing has been
/// logged when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid run configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Failed to open device: {0}")]
    DeviceOpen(#[source] DeviceError),

    #[error("Failed to configure device: {0}")]
    DeviceConfig(#[source] DeviceError),

    #[error("Failed to create log file: {0}")]
    Log(#[from] LogError),
}

/// Why a started run ended.
#[derive(Debug)]
pub enum StopReason {
    Cancelled,
    /// The instrument reported an invalid parameter; treated as end of run.
    DeviceReleased(DeviceError),
    DeviceFault(DeviceError),
    LogFailure(LogError),
    Statistics(StatsError),
}

impl StopReason {
    /// Cancellation and a released device are the expected ways for a run
    /// to end.
    pub fn is_graceful(&self) -> bool {
        matches!(self, StopReason::Cancelled | StopReason::DeviceReleased(_))
    }
}

impl From<DeviceError> for StopReason {
    fn from(error: DeviceError) -> Self {
        if error.is_recoverable() {
            StopReason::DeviceReleased(error)
        } else {
            StopReason::DeviceFault(error)
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub rows_logged: u64,
    pub files_opened: usize,
    pub reason: StopReason,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub trigger: Trigger,
    pub channels: Vec<ChannelSetup>,
    pub sample_count: usize,
    /// Time to fill one buffer; the sample rate is `sample_count / sample_period`.
    pub sample_period: Duration,
    pub acquisition_mode: AcquisitionMode,
    pub poll_interval: Duration,
    /// Wait after configuration for the input offset to stabilise.
    pub settle_time: Duration,
    /// Pause after every logged row.
    pub holdoff: Duration,
    /// The instrument restarts by itself after `Done`; otherwise it is armed
    /// again after every row.
    pub auto_rearm: bool,
    pub rotation: RotationPolicy,
    pub row_format: RowFormat,
    pub precision: usize,
    pub utc_offset: FixedOffset,
}

impl RunConfig {
    fn base(output_dir: impl Into<PathBuf>, trigger: Trigger) -> Self {
        Self {
            output_dir: output_dir.into(),
            trigger,
            channels: vec![ChannelSetup::new(0)],
            sample_count: 10,
            sample_period: Duration::from_millis(10),
            acquisition_mode: AcquisitionMode::Single,
            poll_interval: Duration::from_millis(1),
            settle_time: Duration::from_secs(2),
            holdoff: Duration::ZERO,
            auto_rearm: true,
            rotation: RotationPolicy::Unbounded,
            row_format: RowFormat::TimeOfDay,
            precision: 2,
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS)
                .unwrap_or_else(|| chrono::Utc.fix()),
        }
    }

    /// Log the mean of channel 0 each time the instrument's analog trigger fires.
    pub fn analog_triggered(output_dir: impl Into<PathBuf>, trigger: AnalogEdgeTrigger) -> Self {
        let mut config = Self::base(output_dir, trigger.into());
        if trigger.channel != 0 {
            config.channels.push(ChannelSetup::new(trigger.channel));
        }
        config
    }

    /// Log both channels on every edge of a DIO pin.
    pub fn digital_triggered(output_dir: impl Into<PathBuf>, trigger: DigitalEdgeTrigger) -> Self {
        Self {
            channels: vec![ChannelSetup::new(0), ChannelSetup::new(1)],
            acquisition_mode: AcquisitionMode::ScanShift,
            holdoff: Duration::from_millis(500),
            ..Self::base(output_dir, trigger.into())
        }
    }

    /// Free-running logging of both channels into quarter-hour files.
    pub fn scheduled(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            channels: vec![ChannelSetup::new(0), ChannelSetup::new(1)],
            sample_period: Duration::from_millis(1),
            acquisition_mode: AcquisitionMode::ScanShift,
            settle_time: Duration::from_secs(1),
            holdoff: Duration::from_millis(1),
            rotation: RotationPolicy::quarter_hourly(),
            row_format: RowFormat::RowIndex,
            precision: 3,
            ..Self::base(output_dir, Trigger::FreeRunning)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trigger.validate()?;
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.sample_count == 0 {
            return Err(ConfigError::ZeroSamples);
        }
        if self.sample_period.is_zero() {
            return Err(ConfigError::ZeroDuration("Sample period"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("Poll interval"));
        }
        if let Trigger::Analog(trigger) = &self.trigger {
            if !self.channels.iter().any(|c| c.index == trigger.channel) {
                return Err(ConfigError::TriggerChannelDisabled {
                    channel: trigger.channel,
                });
            }
        }
        Ok(())
    }
}

pub struct AcquisitionController<S: SampleSource, C: Clock> {
    source: S,
    clock: C,
    config: RunConfig,
    cancel: CancelToken,
    evaluator: TriggerEvaluator,
    channels: Vec<Channel>,
    log: Option<RotatingLog>,
    state: AcquisitionState,
    device_open: bool,
    torn_down: bool,
    rows_logged: u64,
    stop_reason: Option<StopReason>,
}

impl<S: SampleSource, C: Clock> AcquisitionController<S, C> {
    /// Validate the run parameters. No device call is made here.
    pub fn new(
        source: S,
        clock: C,
        config: RunConfig,
        cancel: CancelToken,
    ) -> Result<Self, StartupError> {
        config.validate()?;
        let evaluator = TriggerEvaluator::new(&config.trigger)?;
        let channels = config
            .channels
            .iter()
            .map(|setup| Channel::new(setup.index, config.sample_count))
            .collect();

        Ok(Self {
            source,
            clock,
            config,
            cancel,
            evaluator,
            channels,
            log: None,
            state: AcquisitionState::Idle,
            device_open: false,
            torn_down: false,
            rows_logged: 0,
            stop_reason: None,
        })
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn rows_logged(&self) -> u64 {
        self.rows_logged
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn log(&self) -> Option<&RotatingLog> {
        self.log.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Open and configure the instrument and create the first log file.
    ///
    /// On failure the device is released again and no row has been written.
    pub fn start(&mut self) -> Result<(), StartupError> {
        if self.state != AcquisitionState::Idle {
            return Ok(());
        }
        let result = self.try_start();
        if result.is_err() {
            self.state = AcquisitionState::ShuttingDown;
            self.teardown();
        }
        result
    }

    fn try_start(&mut self) -> Result<(), StartupError> {
        let mut rotating = RotatingLog::new(
            &self.config.output_dir,
            self.config.rotation,
            self.config.row_format,
            self.config.precision,
        )?;

        log::debug!("Opening first device");
        self.source.open().map_err(StartupError::DeviceOpen)?;
        self.device_open = true;

        self.configure_instrument()
            .map_err(StartupError::DeviceConfig)?;

        rotating.rotate(self.clock.now().with_timezone(&self.config.utc_offset))?;
        self.log = Some(rotating);

        if !self.config.settle_time.is_zero() {
            log::debug!(
                "Waiting {:?} for the input offset to stabilise",
                self.config.settle_time
            );
            // A cancel here is picked up by the next `step`.
            self.pause(self.config.settle_time);
        }
        self.state = AcquisitionState::Armed;
        Ok(())
    }

    fn configure_instrument(&mut self) -> Result<(), DeviceError> {
        let acquisition = AcquisitionSetup::spread_over(
            self.config.sample_count,
            self.config.sample_period,
            self.config.acquisition_mode,
        );
        log::debug!(
            "Acquiring {} samples at {:.1}Hz ({})",
            acquisition.buffer_size,
            acquisition.sample_rate_hz,
            acquisition.mode.as_str()
        );
        self.source.configure_acquisition(&acquisition)?;

        for setup in &self.config.channels {
            self.source.configure_channel(true, setup)?;
        }

        let trigger = self.config.trigger.trigger_setup();
        if trigger.source != TriggerSource::None {
            self.source.disable_auto_timeout()?;
        }
        self.source.configure_trigger(&trigger)?;
        log::info!("Trigger: {}", self.config.trigger.describe());
        Ok(())
    }

    /// Advance the state machine by one transition.
    pub fn step(&mut self) -> AcquisitionState {
        if self.state == AcquisitionState::ShuttingDown {
            self.teardown();
            return self.state;
        }
        if self.cancel.is_cancelled() {
            log::info!("Acquisition cancelled");
            self.stop(StopReason::Cancelled);
            return self.state;
        }

        let outcome = match self.state {
            AcquisitionState::Idle => match self.start() {
                Ok(()) => Ok(AcquisitionState::Armed),
                Err(e) => {
                    log::error!("{}", e);
                    return self.state;
                }
            },
            AcquisitionState::Armed => self.arm(),
            AcquisitionState::WaitingForTrigger => self.wait_for_trigger(),
            AcquisitionState::Captured => self.capture(),
            AcquisitionState::LoggedRow => self.rearm(),
            AcquisitionState::ShuttingDown => Ok(AcquisitionState::ShuttingDown),
        };

        match outcome {
            Ok(next) => self.state = next,
            Err(reason) => self.stop(reason),
        }
        self.state
    }

    fn arm(&mut self) -> Result<AcquisitionState, StopReason> {
        log::debug!("Starting repeated acquisitions");
        self.source.configure(false, true)?;
        Ok(AcquisitionState::WaitingForTrigger)
    }

    fn wait_for_trigger(&mut self) -> Result<AcquisitionState, StopReason> {
        if self.evaluator.poll(&mut self.source)? {
            return Ok(AcquisitionState::Captured);
        }
        self.clock.sleep(self.config.poll_interval);
        Ok(AcquisitionState::WaitingForTrigger)
    }

    fn capture(&mut self) -> Result<AcquisitionState, StopReason> {
        #[cfg(feature = "cpu-profiling")]
        let _tracy_span = tracy_client::span!("capture");
        let _span = tracing::debug_span!("capture", row = self.rows_logged + 1).entered();

        let timestamp = self.clock.now().with_timezone(&self.config.utc_offset);
        let mut values = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            let samples = self
                .source
                .read_channel_samples(channel.index, self.config.sample_count)?;
            let stats = channel.load(samples).map_err(StopReason::Statistics)?;
            log::debug!(
                "CH:{} DC:{:.3}V DCRMS:{:.3}V ACRMS:{:.3}V",
                channel.index,
                stats.mean,
                stats.rms_total,
                stats.rms_ac
            );
            values.push(stats.mean);
        }

        let row = Row::new(timestamp, values);
        let rotating = self.log.as_mut().ok_or_else(|| {
            StopReason::LogFailure(LogError::Closed {
                path: self.config.output_dir.clone(),
            })
        })?;
        rotating.append(&row).map_err(StopReason::LogFailure)?;
        self.rows_logged += 1;

        for (channel, mean) in self.channels.iter().zip(&row.values) {
            log::info!(
                "Acq ch{} at {} average: {:.prec$}V",
                channel.index,
                row.timestamp.format("%H:%M:%S"),
                mean,
                prec = self.config.precision
            );
        }
        Ok(AcquisitionState::LoggedRow)
    }

    fn rearm(&mut self) -> Result<AcquisitionState, StopReason> {
        // Never poll again straight after a row, even when every poll has data.
        let holdoff = self.config.holdoff.max(self.config.poll_interval);
        if !self.pause(holdoff) {
            log::info!("Acquisition cancelled during hold-off");
            return Err(StopReason::Cancelled);
        }
        if !self.config.auto_rearm {
            self.source.configure(false, true)?;
        }
        Ok(AcquisitionState::WaitingForTrigger)
    }

    /// Sleep for `total` in poll-interval slices. Returns `false` as soon as
    /// the run is cancelled.
    fn pause(&mut self, total: Duration) -> bool {
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.cancel.is_cancelled() {
                return false;
            }
            let slice = remaining.min(self.config.poll_interval);
            self.clock.sleep(slice);
            remaining -= slice;
        }
        !self.cancel.is_cancelled()
    }

    /// Step until the next row is logged and the instrument is waiting again.
    /// Returns `false` once the run has ended.
    pub fn capture_next(&mut self) -> bool {
        let target = self.rows_logged + 1;
        loop {
            match self.step() {
                AcquisitionState::ShuttingDown => return false,
                AcquisitionState::WaitingForTrigger if self.rows_logged >= target => return true,
                _ => {}
            }
        }
    }

    /// Run until cancelled or the device ends the run, then tear down.
    pub fn run(&mut self) -> Result<RunSummary, StartupError> {
        let _span = tracing::info_span!("acquisition", trigger = %self.config.trigger.describe())
            .entered();
        self.start()?;
        while self.step() != AcquisitionState::ShuttingDown {}
        self.teardown();

        let reason = self.stop_reason.take().unwrap_or(StopReason::Cancelled);
        if reason.is_graceful() {
            log::info!("Run ended after {} rows: {:?}", self.rows_logged, reason);
        } else {
            log::warn!("Run aborted after {} rows: {:?}", self.rows_logged, reason);
        }
        Ok(RunSummary {
            rows_logged: self.rows_logged,
            files_opened: self.log.as_ref().map_or(0, RotatingLog::files_opened),
            reason,
        })
    }

    fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
        self.state = AcquisitionState::ShuttingDown;
        self.teardown();
    }

    /// Close the log, switch outputs off and release the device. Runs once;
    /// failures are logged and swallowed so every step is attempted.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.state = AcquisitionState::ShuttingDown;

        if let Some(rotating) = self.log.as_mut() {
            if let Err(e) = rotating.close() {
                log::warn!("Failed to close log file: {}", e);
            }
        }
        if self.device_open {
            if let Err(e) = self.source.outputs_off() {
                log::warn!("Failed to switch outputs off: {}", e);
            }
            if let Err(e) = self.source.close_all() {
                log::warn!("Failed to release device: {}", e);
            }
            self.device_open = false;
        }
    }
}

impl<S: SampleSource, C: Clock> Drop for AcquisitionController<S, C> {
    fn drop(&mut self) {
        self.teardown();
    }
}
