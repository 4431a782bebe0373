use crate::sample_source::{TriggerCondition, TriggerSetup, TriggerSource, TriggerType};

/// Number of analog input channels a trigger may watch.
pub const ANALOG_CHANNEL_COUNT: usize = 2;

/// Number of digital I/O pins a trigger may watch.
pub const DIGITAL_PIN_COUNT: u8 = 8;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("DIO pin {pin} out of range, must be between 0 and {}", DIGITAL_PIN_COUNT - 1)]
    PinOutOfRange { pin: u8 },

    #[error("Analog channel {channel} out of range, must be below {ANALOG_CHANNEL_COUNT}")]
    ChannelOutOfRange { channel: usize },

    #[error("Trigger level {0} is not a finite voltage")]
    InvalidLevel(f64),

    #[error("Trigger channel {channel} is not enabled for acquisition")]
    TriggerChannelDisabled { channel: usize },

    #[error("At least one channel must be enabled")]
    NoChannels,

    #[error("Sample count must be at least 1")]
    ZeroSamples,

    #[error("{0} must be longer than zero")]
    ZeroDuration(&'static str),
}

pub trait TriggerConfig {
    /// Hardware trigger settings to hand to the instrument.
    fn trigger_setup(&self) -> TriggerSetup;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogSlope {
    Rising,
    Falling,
    Either,
}

impl AnalogSlope {
    pub fn as_str(&self) -> &'static str {
        self.condition().as_str()
    }

    fn condition(self) -> TriggerCondition {
        match self {
            AnalogSlope::Rising => TriggerCondition::Rising,
            AnalogSlope::Falling => TriggerCondition::Falling,
            AnalogSlope::Either => TriggerCondition::Either,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalSlope {
    Rising,
    Falling,
}

impl DigitalSlope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigitalSlope::Rising => "rising",
            DigitalSlope::Falling => "falling",
        }
    }
}

#[derive(Debug)]
pub struct AnalogEdgeTriggerBuilder {
    volts: f64,
    channel: usize,
    slope: AnalogSlope,
}

impl AnalogEdgeTriggerBuilder {
    pub fn on_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    pub fn rising_edge(mut self) -> Self {
        self.slope = AnalogSlope::Rising;
        self
    }

    pub fn falling_edge(mut self) -> Self {
        self.slope = AnalogSlope::Falling;
        self
    }

    pub fn either_edge(mut self) -> Self {
        self.slope = AnalogSlope::Either;
        self
    }

    /// Validate and round the level to centivolts.
    pub fn into_trigger(self) -> Result<AnalogEdgeTrigger, ConfigError> {
        let trigger = AnalogEdgeTrigger::new(self.channel, self.volts, self.slope);
        trigger.validate()?;
        Ok(trigger)
    }
}

/// Edge on an analog channel, detected by the instrument's own trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogEdgeTrigger {
    pub channel: usize,
    pub level_volts: f64,
    pub slope: AnalogSlope,
}

impl AnalogEdgeTrigger {
    /// The level is rounded to centivolts, the instrument's trigger resolution.
    pub fn new(channel: usize, level_volts: f64, slope: AnalogSlope) -> Self {
        Self {
            channel,
            level_volts: (level_volts * 100.0).round() / 100.0,
            slope,
        }
    }

    pub fn start_capturing_when(volts: f64) -> AnalogEdgeTriggerBuilder {
        AnalogEdgeTriggerBuilder {
            volts,
            channel: 0,
            slope: AnalogSlope::Rising,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.level_volts.is_finite() {
            return Err(ConfigError::InvalidLevel(self.level_volts));
        }
        if self.channel >= ANALOG_CHANNEL_COUNT {
            return Err(ConfigError::ChannelOutOfRange {
                channel: self.channel,
            });
        }
        Ok(())
    }
}

impl TriggerConfig for AnalogEdgeTrigger {
    fn trigger_setup(&self) -> TriggerSetup {
        TriggerSetup {
            source: TriggerSource::DetectorAnalogIn,
            kind: TriggerType::Edge,
            channel: self.channel,
            level_volts: self.level_volts,
            condition: self.slope.condition(),
        }
    }
}

#[derive(Debug)]
pub struct PinTriggerBuilder {
    pin: u8,
}

impl PinTriggerBuilder {
    pub fn goes_high(self) -> DigitalEdgeTrigger {
        DigitalEdgeTrigger::new(self.pin, DigitalSlope::Rising)
    }

    pub fn goes_low(self) -> DigitalEdgeTrigger {
        DigitalEdgeTrigger::new(self.pin, DigitalSlope::Falling)
    }
}

/// Edge on one digital I/O pin, detected in software by polling the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalEdgeTrigger {
    pub pin: u8,
    pub slope: DigitalSlope,
}

impl DigitalEdgeTrigger {
    pub fn new(pin: u8, slope: DigitalSlope) -> Self {
        Self { pin, slope }
    }

    pub fn start_capturing_when_pin(pin: u8) -> PinTriggerBuilder {
        PinTriggerBuilder { pin }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pin >= DIGITAL_PIN_COUNT {
            return Err(ConfigError::PinOutOfRange { pin: self.pin });
        }
        Ok(())
    }

    pub fn mask(&self) -> Result<u32, ConfigError> {
        self.validate()?;
        Ok(1 << self.pin)
    }
}

impl TriggerConfig for DigitalEdgeTrigger {
    fn trigger_setup(&self) -> TriggerSetup {
        // The instrument acquires free-running; the edge is found by polling.
        TriggerSetup::free_running()
    }
}

/// A unified trigger type covering every run mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Analog(AnalogEdgeTrigger),
    Digital(DigitalEdgeTrigger),
    /// Accept every completed status poll, as in scheduled logging.
    FreeRunning,
}

impl Trigger {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Trigger::Analog(trigger) => trigger.validate(),
            Trigger::Digital(trigger) => trigger.validate(),
            Trigger::FreeRunning => Ok(()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Analog(t) => format!(
                "{} edge at {:.2}V on channel {}",
                t.slope.as_str(),
                t.level_volts,
                t.channel
            ),
            Trigger::Digital(t) => format!("{} edge on DIO pin {}", t.slope.as_str(), t.pin),
            Trigger::FreeRunning => "free running".to_string(),
        }
    }
}

impl TriggerConfig for Trigger {
    fn trigger_setup(&self) -> TriggerSetup {
        match self {
            Trigger::Analog(trigger) => trigger.trigger_setup(),
            Trigger::Digital(trigger) => trigger.trigger_setup(),
            Trigger::FreeRunning => TriggerSetup::free_running(),
        }
    }
}

impl From<AnalogEdgeTrigger> for Trigger {
    fn from(trigger: AnalogEdgeTrigger) -> Self {
        Self::Analog(trigger)
    }
}

impl From<DigitalEdgeTrigger> for Trigger {
    fn from(trigger: DigitalEdgeTrigger) -> Self {
        Self::Digital(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analog_builder_rounds_level() {
        let trigger = AnalogEdgeTrigger::start_capturing_when(2.5049)
            .falling_edge()
            .into_trigger()
            .unwrap();
        assert_eq!(trigger.level_volts, 2.5);
        assert_eq!(trigger.slope, AnalogSlope::Falling);
        assert_eq!(trigger.channel, 0);

        let trigger = AnalogEdgeTrigger::new(1, 2.504, AnalogSlope::Rising);
        assert_eq!(trigger.level_volts, 2.5);
        assert_eq!(trigger.trigger_setup().level_volts, 2.5);
    }

    #[test]
    fn test_analog_trigger_setup() {
        let setup = AnalogEdgeTrigger::new(1, 1.2, AnalogSlope::Either).trigger_setup();
        assert_eq!(setup.source, TriggerSource::DetectorAnalogIn);
        assert_eq!(setup.kind, TriggerType::Edge);
        assert_eq!(setup.channel, 1);
        assert_eq!(setup.condition, TriggerCondition::Either);
    }

    #[test]
    fn test_analog_validation() {
        assert!(matches!(
            AnalogEdgeTrigger::start_capturing_when(f64::NAN).into_trigger(),
            Err(ConfigError::InvalidLevel(_))
        ));
        assert!(matches!(
            AnalogEdgeTrigger::start_capturing_when(f64::INFINITY).into_trigger(),
            Err(ConfigError::InvalidLevel(_))
        ));
        assert_eq!(
            AnalogEdgeTrigger::start_capturing_when(1.0)
                .on_channel(2)
                .into_trigger(),
            Err(ConfigError::ChannelOutOfRange { channel: 2 })
        );
    }

    #[test]
    fn test_digital_pin_range() {
        let trigger = DigitalEdgeTrigger::start_capturing_when_pin(7).goes_low();
        assert_eq!(trigger.mask(), Ok(0x80));
        assert_eq!(trigger.slope, DigitalSlope::Falling);

        let trigger = DigitalEdgeTrigger::new(9, DigitalSlope::Rising);
        assert_eq!(trigger.mask(), Err(ConfigError::PinOutOfRange { pin: 9 }));
        assert_eq!(
            Trigger::from(trigger).validate(),
            Err(ConfigError::PinOutOfRange { pin: 9 })
        );
    }

    #[test]
    fn test_digital_trigger_runs_instrument_free() {
        let setup = Trigger::from(DigitalEdgeTrigger::new(3, DigitalSlope::Rising)).trigger_setup();
        assert_eq!(setup.source, TriggerSource::None);
    }

    #[test]
    fn test_describe() {
        let trigger: Trigger = AnalogEdgeTrigger::new(0, 2.5, AnalogSlope::Rising).into();
        assert_eq!(trigger.describe(), "rising edge at 2.50V on channel 0");
        assert_eq!(Trigger::FreeRunning.describe(), "free running");
    }
}
