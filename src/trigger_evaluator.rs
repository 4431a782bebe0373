//! Decides, once per polling cycle, whether the configured trigger fired.

use crate::sample_source::{DeviceError, SampleSource};
use crate::trigger_config::{ConfigError, DigitalSlope, Trigger};

/// Software edge detection on a single digital input bit.
///
/// The first observation only records the pin level; an edge needs a prior
/// observed level to compare against.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    mask: u32,
    slope: DigitalSlope,
    last_pin_state: Option<bool>,
}

impl EdgeDetector {
    pub fn new(mask: u32, slope: DigitalSlope) -> Self {
        Self {
            mask,
            slope,
            last_pin_state: None,
        }
    }

    /// Feed one read of the input register; true on the configured edge.
    pub fn observe(&mut self, inputs: u32) -> bool {
        let level = inputs & self.mask != 0;
        let fired = match (self.last_pin_state, self.slope) {
            (Some(false), DigitalSlope::Rising) => level,
            (Some(true), DigitalSlope::Falling) => !level,
            _ => false,
        };
        self.last_pin_state = Some(level);
        fired
    }

    pub fn last_pin_state(&self) -> Option<bool> {
        self.last_pin_state
    }
}

#[derive(Debug, Clone)]
pub enum TriggerEvaluator {
    /// The instrument detects the edge; wait for it to report `Done`.
    Hardware,
    DigitalEdge(EdgeDetector),
    FreeRunning,
}

impl TriggerEvaluator {
    pub fn new(trigger: &Trigger) -> Result<Self, ConfigError> {
        Ok(match trigger {
            Trigger::Analog(t) => {
                t.validate()?;
                TriggerEvaluator::Hardware
            }
            Trigger::Digital(t) => TriggerEvaluator::DigitalEdge(EdgeDetector::new(t.mask()?, t.slope)),
            Trigger::FreeRunning => TriggerEvaluator::FreeRunning,
        })
    }

    /// Poll the instrument once and report whether a capture is ready.
    pub fn poll<S: SampleSource>(&mut self, source: &mut S) -> Result<bool, DeviceError> {
        match self {
            TriggerEvaluator::Hardware => Ok(source.poll_status()?.is_done()),
            TriggerEvaluator::DigitalEdge(detector) => {
                let inputs = source.read_digital_inputs()?;
                if !detector.observe(inputs) {
                    return Ok(false);
                }
                // Refresh the analog buffers before they are read.
                source.poll_status()?;
                Ok(true)
            }
            TriggerEvaluator::FreeRunning => Ok(source.poll_status()?.has_data()),
        }
    }
}
