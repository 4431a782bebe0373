//! The instrument side of the acquisition loop.
//!
//! The driver binding itself lives outside this crate; anything that can
//! open a device, take channel and trigger settings, report an acquisition
//! status and hand back sample buffers can drive the controller by
//! implementing [`SampleSource`].

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to open device: {message}")]
    OpenFailed { message: String },

    #[error("Device rejected a parameter in {call}")]
    InvalidParameter { call: &'static str },

    #[error("Driver call {call} failed: {message}")]
    Driver { call: &'static str, message: String },

    #[error("Device is not open")]
    NotOpen,
}

impl DeviceError {
    /// An invalid-parameter report on a single call ends the run gracefully
    /// instead of counting as a fault.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeviceError::InvalidParameter { .. })
    }
}

/// Acquisition status as reported by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentStatus {
    Ready,
    Config,
    Prefill,
    Armed,
    Wait,
    Triggered,
    Running,
    Done,
}

impl InstrumentStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, InstrumentStatus::Done)
    }

    /// Data is available to read: the capture finished, or a free-running
    /// acquisition is streaming.
    pub fn has_data(&self) -> bool {
        matches!(
            self,
            InstrumentStatus::Done | InstrumentStatus::Triggered | InstrumentStatus::Running
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSetup {
    pub index: usize,
    pub range_volts: f64,
    pub attenuation: f64,
}

impl ChannelSetup {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            range_volts: 5.0,
            attenuation: 10.0,
        }
    }

    pub fn with_range(mut self, range_volts: f64) -> Self {
        self.range_volts = range_volts;
        self
    }

    pub fn with_attenuation(mut self, attenuation: f64) -> Self {
        self.attenuation = attenuation;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// One buffer per arm; re-armed automatically after `Done` when started
    /// with `configure(false, true)`.
    Single,
    /// Buffer continuously shifts in new samples; every status poll carries
    /// fresh data.
    ScanShift,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Single => "single",
            AcquisitionMode::ScanShift => "scan-shift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSetup {
    pub sample_rate_hz: f64,
    pub buffer_size: usize,
    pub mode: AcquisitionMode,
}

impl AcquisitionSetup {
    /// Setup that fills `buffer_size` samples once per `period`.
    pub fn spread_over(buffer_size: usize, period: Duration, mode: AcquisitionMode) -> Self {
        Self {
            sample_rate_hz: buffer_size as f64 / period.as_secs_f64(),
            buffer_size,
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// No hardware trigger; the acquisition runs free.
    None,
    /// One of the analog input channels.
    DetectorAnalogIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCondition {
    Rising,
    Falling,
    Either,
}

impl TriggerCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerCondition::Rising => "rising",
            TriggerCondition::Falling => "falling",
            TriggerCondition::Either => "either",
        }
    }
}

/// Hardware trigger settings handed to the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSetup {
    pub source: TriggerSource,
    pub kind: TriggerType,
    pub channel: usize,
    pub level_volts: f64,
    pub condition: TriggerCondition,
}

impl TriggerSetup {
    pub fn free_running() -> Self {
        Self {
            source: TriggerSource::None,
            kind: TriggerType::Edge,
            channel: 0,
            level_volts: 0.0,
            condition: TriggerCondition::Rising,
        }
    }
}

/// Driver contract consumed by the acquisition controller.
///
/// Calls are issued from a single thread, one at a time. Every call reports
/// failure through [`DeviceError`]; the controller decides whether that ends
/// the run gracefully or counts as a fault.
pub trait SampleSource {
    fn open(&mut self) -> Result<(), DeviceError>;

    fn configure_channel(&mut self, enabled: bool, setup: &ChannelSetup)
        -> Result<(), DeviceError>;

    fn configure_trigger(&mut self, setup: &TriggerSetup) -> Result<(), DeviceError>;

    fn disable_auto_timeout(&mut self) -> Result<(), DeviceError>;

    fn configure_acquisition(&mut self, setup: &AcquisitionSetup) -> Result<(), DeviceError>;

    /// Apply pending settings and optionally start the acquisition.
    fn configure(&mut self, reconfigure: bool, start: bool) -> Result<(), DeviceError>;

    fn poll_status(&mut self) -> Result<InstrumentStatus, DeviceError>;

    fn read_channel_samples(
        &mut self,
        channel: usize,
        count: usize,
    ) -> Result<Vec<f64>, DeviceError>;

    /// Input state of the digital I/O pins, bit `n` for pin `n`.
    fn read_digital_inputs(&mut self) -> Result<u32, DeviceError>;

    fn outputs_off(&mut self) -> Result<(), DeviceError>;

    fn close_all(&mut self) -> Result<(), DeviceError>;
}

impl<S: SampleSource + ?Sized> SampleSource for &mut S {
    fn open(&mut self) -> Result<(), DeviceError> {
        (**self).open()
    }

    fn configure_channel(
        &mut self,
        enabled: bool,
        setup: &ChannelSetup,
    ) -> Result<(), DeviceError> {
        (**self).configure_channel(enabled, setup)
    }

    fn configure_trigger(&mut self, setup: &TriggerSetup) -> Result<(), DeviceError> {
        (**self).configure_trigger(setup)
    }

    fn disable_auto_timeout(&mut self) -> Result<(), DeviceError> {
        (**self).disable_auto_timeout()
    }

    fn configure_acquisition(&mut self, setup: &AcquisitionSetup) -> Result<(), DeviceError> {
        (**self).configure_acquisition(setup)
    }

    fn configure(&mut self, reconfigure: bool, start: bool) -> Result<(), DeviceError> {
        (**self).configure(reconfigure, start)
    }

    fn poll_status(&mut self) -> Result<InstrumentStatus, DeviceError> {
        (**self).poll_status()
    }

    fn read_channel_samples(
        &mut self,
        channel: usize,
        count: usize,
    ) -> Result<Vec<f64>, DeviceError> {
        (**self).read_channel_samples(channel, count)
    }

    fn read_digital_inputs(&mut self) -> Result<u32, DeviceError> {
        (**self).read_digital_inputs()
    }

    fn outputs_off(&mut self) -> Result<(), DeviceError> {
        (**self).outputs_off()
    }

    fn close_all(&mut self) -> Result<(), DeviceError> {
        (**self).close_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(InstrumentStatus::Done.is_done());
        assert!(!InstrumentStatus::Armed.is_done());
        assert!(InstrumentStatus::Running.has_data());
        assert!(!InstrumentStatus::Wait.has_data());
    }

    #[test]
    fn test_acquisition_setup_rate() {
        let setup =
            AcquisitionSetup::spread_over(10, Duration::from_millis(10), AcquisitionMode::Single);
        assert!((setup.sample_rate_hz - 1000.0).abs() < 1e-9);
        assert_eq!(setup.buffer_size, 10);
    }

    #[test]
    fn test_only_invalid_parameter_is_recoverable() {
        assert!(DeviceError::InvalidParameter { call: "status" }.is_recoverable());
        assert!(!DeviceError::NotOpen.is_recoverable());
    }
}
