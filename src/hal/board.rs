//! Board primitives the STM32F1 backend is built on.
//!
//! Everything here is a thin pass-through to the target: console UART,
//! millisecond clock, GPIO, watchdog, reset and the silicon identity region.

/// GPIO direction / pull configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    InputPullUp,
    InputPullDown,
    Output,
}

/// Digital pin level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

/// Target board services.
pub trait Board {
    /// Bring up the console UART.
    fn console_begin(&mut self, baud_rate: u32);

    /// Blocking write to the console. No flush.
    fn console_write(&mut self, bytes: &[u8]);

    /// Milliseconds since boot (wraps).
    fn millis(&self) -> u32;

    fn pin_mode(&mut self, pin: u8, mode: PinMode);
    fn digital_write(&mut self, pin: u8, level: Level);
    fn digital_read(&mut self, pin: u8) -> Level;

    /// Kick the independent watchdog.
    fn feed_watchdog(&mut self);

    /// System reset.
    fn system_reset(&mut self) -> !;

    /// Copy of the read-only identity region.
    fn read_unique_id(&self) -> [u8; 16];
}

/// Internal voltage reference channel of the ADC.
///
/// `millivolts = REFERENCE_MV * FULL_SCALE / raw`
pub trait InternalReference {
    /// Nominal reference voltage in mV.
    const REFERENCE_MV: u32 = 1200;
    /// ADC full scale (12 bit).
    const FULL_SCALE: u32 = 4096;

    /// Route the reference to the ADC. Called before every sample.
    fn prepare(&mut self);

    /// One raw conversion of the reference channel.
    fn sample(&mut self) -> u16;

    /// Supply voltage in mV. `None` when the converter returned 0.
    fn millivolts(&mut self) -> Option<u16> {
        self.prepare();
        let raw = u32::from(self.sample());
        if raw == 0 {
            return None;
        }
        let mv = Self::REFERENCE_MV * Self::FULL_SCALE / raw;
        Some(mv.min(u32::from(u16::MAX)) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAdc {
        raw: u16,
        prepared: bool,
    }

    impl InternalReference for FixedAdc {
        fn prepare(&mut self) {
            self.prepared = true;
        }

        fn sample(&mut self) -> u16 {
            assert!(self.prepared, "sampled before prepare");
            self.raw
        }
    }

    #[test]
    fn test_half_scale_reads_2400mv() {
        let mut adc = FixedAdc { raw: 2048, prepared: false };
        assert_eq!(adc.millivolts(), Some(2400));
    }

    #[test]
    fn test_zero_sample_is_unknown() {
        let mut adc = FixedAdc { raw: 0, prepared: false };
        assert_eq!(adc.millivolts(), None);
    }

    #[test]
    fn test_tiny_sample_saturates() {
        let mut adc = FixedAdc { raw: 1, prepared: false };
        assert_eq!(adc.millivolts(), Some(u16::MAX));
    }

    #[test]
    fn test_level_from_bool() {
        assert_eq!(Level::from(true), Level::High);
        assert!(!Level::from(false).is_high());
    }
}
