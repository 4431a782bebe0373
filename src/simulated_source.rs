//! Scripted in-memory instrument.
//!
//! Replays a fixed sequence of status reports and digital input reads, hands
//! back the same buffer per channel on every read, and journals each call so
//! callers can check the order in which the instrument was driven.

use crate::sample_source::{
    AcquisitionSetup, ChannelSetup, DeviceError, InstrumentStatus, SampleSource, TriggerSetup,
};

/// What a script does once it runs out of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Report an invalid parameter, ending the run gracefully.
    Fail,
    /// Start again from the first entry.
    Cycle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Open,
    ConfigureChannel { enabled: bool, setup: ChannelSetup },
    ConfigureTrigger(TriggerSetup),
    DisableAutoTimeout,
    ConfigureAcquisition(AcquisitionSetup),
    Configure { reconfigure: bool, start: bool },
    PollStatus,
    ReadChannel { channel: usize, count: usize },
    ReadDigitalInputs,
    OutputsOff,
    CloseAll,
}

#[derive(Debug)]
struct Script<T> {
    entries: Vec<T>,
    position: usize,
    end: ScriptEnd,
}

impl<T: Copy> Script<T> {
    fn new(entries: Vec<T>) -> Self {
        Self {
            entries,
            position: 0,
            end: ScriptEnd::Fail,
        }
    }

    fn next(&mut self, call: &'static str) -> Result<T, DeviceError> {
        if self.position >= self.entries.len() {
            if self.end == ScriptEnd::Fail || self.entries.is_empty() {
                return Err(DeviceError::InvalidParameter { call });
            }
            self.position = 0;
        }
        let entry = self.entries[self.position];
        self.position += 1;
        Ok(entry)
    }
}

#[derive(Debug)]
pub struct SimulatedSource {
    buffers: Vec<Vec<f64>>,
    statuses: Script<InstrumentStatus>,
    digital_inputs: Script<u32>,
    open_error: Option<String>,
    teardown_error: Option<String>,
    open: bool,
    calls: Vec<DeviceCall>,
}

impl SimulatedSource {
    pub fn new(channel_count: usize) -> Self {
        Self {
            buffers: vec![Vec::new(); channel_count],
            statuses: Script::new(Vec::new()),
            digital_inputs: Script::new(Vec::new()),
            open_error: None,
            teardown_error: None,
            open: false,
            calls: Vec::new(),
        }
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = InstrumentStatus>) -> Self {
        self.statuses.entries = statuses.into_iter().collect();
        self
    }

    pub fn with_digital_inputs(mut self, inputs: impl IntoIterator<Item = u32>) -> Self {
        self.digital_inputs.entries = inputs.into_iter().collect();
        self
    }

    pub fn with_script_end(mut self, end: ScriptEnd) -> Self {
        self.statuses.end = end;
        self.digital_inputs.end = end;
        self
    }

    /// Buffer returned for `channel` on every read.
    pub fn with_samples(mut self, channel: usize, samples: Vec<f64>) -> Self {
        if channel >= self.buffers.len() {
            self.buffers.resize(channel + 1, Vec::new());
        }
        self.buffers[channel] = samples;
        self
    }

    pub fn failing_open(mut self, message: &str) -> Self {
        self.open_error = Some(message.to_string());
        self
    }

    /// Make `outputs_off` and `close_all` report a driver error. The device
    /// is still released by `close_all`.
    pub fn failing_teardown(mut self, message: &str) -> Self {
        self.teardown_error = Some(message.to_string());
        self
    }

    fn teardown_result(&self, call: &'static str) -> Result<(), DeviceError> {
        match &self.teardown_error {
            Some(message) => Err(DeviceError::Driver {
                call,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotOpen)
        }
    }
}

impl SampleSource for SimulatedSource {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::Open);
        if let Some(message) = &self.open_error {
            return Err(DeviceError::OpenFailed {
                message: message.clone(),
            });
        }
        self.open = true;
        Ok(())
    }

    fn configure_channel(
        &mut self,
        enabled: bool,
        setup: &ChannelSetup,
    ) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::ConfigureChannel {
            enabled,
            setup: *setup,
        });
        self.ensure_open()?;
        if setup.index >= self.buffers.len() {
            return Err(DeviceError::InvalidParameter {
                call: "configure_channel",
            });
        }
        Ok(())
    }

    fn configure_trigger(&mut self, setup: &TriggerSetup) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::ConfigureTrigger(*setup));
        self.ensure_open()
    }

    fn disable_auto_timeout(&mut self) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::DisableAutoTimeout);
        self.ensure_open()
    }

    fn configure_acquisition(&mut self, setup: &AcquisitionSetup) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::ConfigureAcquisition(*setup));
        self.ensure_open()
    }

    fn configure(&mut self, reconfigure: bool, start: bool) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::Configure { reconfigure, start });
        self.ensure_open()
    }

    fn poll_status(&mut self) -> Result<InstrumentStatus, DeviceError> {
        self.calls.push(DeviceCall::PollStatus);
        self.ensure_open()?;
        self.statuses.next("poll_status")
    }

    fn read_channel_samples(
        &mut self,
        channel: usize,
        count: usize,
    ) -> Result<Vec<f64>, DeviceError> {
        self.calls.push(DeviceCall::ReadChannel { channel, count });
        self.ensure_open()?;
        let buffer = self
            .buffers
            .get(channel)
            .ok_or(DeviceError::InvalidParameter {
                call: "read_channel_samples",
            })?;
        Ok(buffer.iter().copied().take(count).collect())
    }

    fn read_digital_inputs(&mut self) -> Result<u32, DeviceError> {
        self.calls.push(DeviceCall::ReadDigitalInputs);
        self.ensure_open()?;
        self.digital_inputs.next("read_digital_inputs")
    }

    fn outputs_off(&mut self) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::OutputsOff);
        self.ensure_open()?;
        self.teardown_result("outputs_off")
    }

    fn close_all(&mut self) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::CloseAll);
        self.open = false;
        self.teardown_result("close_all")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_before_open_fail() {
        let mut source = SimulatedSource::new(1);
        assert_eq!(source.poll_status(), Err(DeviceError::NotOpen));
        assert_eq!(source.calls(), &[DeviceCall::PollStatus]);
    }

    #[test]
    fn test_status_script_ends_with_invalid_parameter() {
        let mut source = SimulatedSource::new(1).with_statuses([InstrumentStatus::Done]);
        source.open().unwrap();
        assert_eq!(source.poll_status(), Ok(InstrumentStatus::Done));
        assert!(source.poll_status().unwrap_err().is_recoverable());
    }

    #[test]
    fn test_cycling_script() {
        let mut source = SimulatedSource::new(1)
            .with_digital_inputs([0, 1])
            .with_script_end(ScriptEnd::Cycle);
        source.open().unwrap();
        let reads: Vec<u32> = (0..5).map(|_| source.read_digital_inputs().unwrap()).collect();
        assert_eq!(reads, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_read_is_truncated_to_count() {
        let mut source = SimulatedSource::new(2).with_samples(1, vec![1.0, 2.0, 3.0]);
        source.open().unwrap();
        assert_eq!(source.read_channel_samples(1, 2), Ok(vec![1.0, 2.0]));
        assert!(source.read_channel_samples(2, 2).is_err());
    }

    #[test]
    fn test_failing_teardown_still_releases() {
        let mut source = SimulatedSource::new(1).failing_teardown("usb gone");
        source.open().unwrap();
        assert!(matches!(source.outputs_off(), Err(DeviceError::Driver { .. })));
        assert!(source.close_all().is_err());
        assert!(!source.is_open());
    }

    #[test]
    fn test_failing_open() {
        let mut source = SimulatedSource::new(1).failing_open("no device");
        assert!(matches!(source.open(), Err(DeviceError::OpenFailed { .. })));
        assert!(!source.is_open());
    }
}
