//! ESP32-S3 backend.
//!
//! - Config store: [`NvsStore`] (RAM shadow persisted as one NVS blob)
//! - Console: UART TX only, at the resolved baud rate
//! - Sleep: light sleep, woken by the timer or GPIO level
//! - Identity: factory MAC from eFuse, zero padded to 16 bytes (all zeros
//!   if the eFuse cannot be read)
//! - Voltage: not measurable without external wiring

use core::fmt;

use esp_idf_svc::hal::gpio;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{self, UartTxDriver};
use esp_idf_svc::sys;
use esp_idf_svc::sys::EspError;

use crate::config::{ConfigStore, NvsStore, StoreError};
use crate::features::BAUD_RATE;
use crate::hal::{
    Hal, InitError, InterruptMode, Level, PinMode, SleepOutcome, UniqueId, WakeInterrupt,
};
use crate::logging::{DebugMode, DebugSink};

/// Open the console UART (TX only) at the resolved baud rate.
pub fn console_driver<'d>(
    uart: impl Peripheral<P = uart::UART0> + 'd,
    tx_pin: impl Peripheral<P = impl gpio::OutputPin> + 'd,
) -> Result<UartTxDriver<'d>, EspError> {
    let config = uart::config::Config::default()
        .baudrate(esp_idf_svc::hal::units::Hertz(BAUD_RATE));

    UartTxDriver::new(
        uart,
        tx_pin,
        Option::<gpio::AnyIOPin>::None,  // CTS
        Option::<gpio::AnyIOPin>::None,  // RTS
        &config,
    )
}

/// Factory MAC from eFuse, zero padded to 16 bytes.
fn factory_id() -> Result<[u8; 16], EspError> {
    let mut mac = [0u8; 6];
    EspError::convert(unsafe { sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) })?;
    Ok(pad_id(mac))
}

fn pad_id(mac: [u8; 6]) -> [u8; 16] {
    let mut id = [0u8; 16];
    id[..6].copy_from_slice(&mac);
    id
}

/// ESP32-S3 HAL backend.
pub struct Esp32S3Hal {
    console: Option<UartTxDriver<'static>>,
    store: NvsStore,
    sink: DebugSink,
}

impl Esp32S3Hal {
    /// `console` is `None` for builds with `disabled-serial`.
    pub fn new(console: Option<UartTxDriver<'static>>, store: NvsStore) -> Self {
        Self {
            console,
            store,
            sink: DebugSink::new(DebugMode::for_build()),
        }
    }

    pub fn store_mut(&mut self) -> &mut NvsStore {
        &mut self.store
    }

    fn arm_gpio(&self, wake: WakeInterrupt) -> Result<(), EspError> {
        let pin = wake.interrupt as i32;
        let level = match wake.mode {
            InterruptMode::Low | InterruptMode::Falling => sys::gpio_int_type_t_GPIO_INTR_LOW_LEVEL,
            InterruptMode::Rising => sys::gpio_int_type_t_GPIO_INTR_HIGH_LEVEL,
            // Light sleep only wakes on levels: wait for the opposite one.
            InterruptMode::Change => {
                if unsafe { sys::gpio_get_level(pin) } == 0 {
                    sys::gpio_int_type_t_GPIO_INTR_HIGH_LEVEL
                } else {
                    sys::gpio_int_type_t_GPIO_INTR_LOW_LEVEL
                }
            }
        };
        EspError::convert(unsafe { sys::gpio_wakeup_enable(pin, level) })
    }

    fn enter_light_sleep(&self, wakes: &[WakeInterrupt], ms: u32) -> Result<u32, EspError> {
        unsafe {
            sys::esp_sleep_disable_wakeup_source(sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_ALL);
        }
        if ms > 0 {
            EspError::convert(unsafe { sys::esp_sleep_enable_timer_wakeup(u64::from(ms) * 1000) })?;
        }
        for wake in wakes {
            self.arm_gpio(*wake)?;
        }
        if !wakes.is_empty() {
            EspError::convert(unsafe { sys::esp_sleep_enable_gpio_wakeup() })?;
        }

        let slept = EspError::convert(unsafe { sys::esp_light_sleep_start() });
        for wake in wakes {
            unsafe {
                sys::gpio_wakeup_disable(wake.interrupt as i32);
            }
        }
        slept?;

        Ok(unsafe { sys::esp_sleep_get_wakeup_cause() })
    }

    fn light_sleep(&mut self, wakes: &[WakeInterrupt], ms: u32) -> SleepOutcome {
        // Nothing would ever wake us up.
        if ms == 0 && wakes.is_empty() {
            return SleepOutcome::NotPossible;
        }

        let cause = match self.enter_light_sleep(wakes, ms) {
            Ok(cause) => cause,
            Err(_) => return SleepOutcome::NotPossible,
        };

        if cause == sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO {
            let fired = wakes
                .iter()
                .find(|w| {
                    let high = unsafe { sys::gpio_get_level(w.interrupt as i32) } != 0;
                    match w.mode {
                        InterruptMode::Rising => high,
                        InterruptMode::Low | InterruptMode::Falling => !high,
                        InterruptMode::Change => true,
                    }
                })
                .or(wakes.first());
            if let Some(wake) = fired {
                return SleepOutcome::Interrupt(wake.interrupt);
            }
        }
        SleepOutcome::TimerElapsed
    }
}

impl Hal for Esp32S3Hal {
    fn init(&mut self) -> Result<(), InitError> {
        self.store.init()?;
        Ok(())
    }

    fn read_config_block(&mut self, dst: &mut [u8], address: u16) -> Result<(), StoreError> {
        self.store.read_block(dst, address)
    }

    fn write_config_block(&mut self, src: &[u8], address: u16) -> Result<(), StoreError> {
        self.store.write_block(src, address)
    }

    fn sleep(&mut self, ms: u32) -> SleepOutcome {
        self.light_sleep(&[], ms)
    }

    fn sleep_with_interrupt(&mut self, wake: WakeInterrupt, ms: u32) -> SleepOutcome {
        self.light_sleep(&[wake], ms)
    }

    fn sleep_with_interrupts(&mut self, wake1: WakeInterrupt, wake2: WakeInterrupt, ms: u32) -> SleepOutcome {
        self.light_sleep(&[wake1, wake2], ms)
    }

    fn unique_id(&self) -> UniqueId {
        UniqueId(factory_id().unwrap_or([0u8; 16]))
    }

    fn cpu_voltage(&mut self) -> Option<u16> {
        None
    }

    fn cpu_frequency(&self) -> u16 {
        (sys::CONFIG_ESP_DEFAULT_CPU_FREQ_MHZ * 10) as u16
    }

    fn free_memory(&self) -> Option<usize> {
        Some(unsafe { sys::esp_get_free_heap_size() } as usize)
    }

    fn debug_print(&mut self, args: fmt::Arguments<'_>) {
        let millis = self.millis();
        let Some(console) = self.console.as_mut() else {
            return;
        };
        self.sink.print(millis, args, |bytes| {
            let _ = console.write(bytes);
        });
    }

    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        let (direction, pull) = match mode {
            PinMode::Input => (sys::gpio_mode_t_GPIO_MODE_INPUT, sys::gpio_pull_mode_t_GPIO_FLOATING),
            PinMode::InputPullUp => (sys::gpio_mode_t_GPIO_MODE_INPUT, sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY),
            PinMode::InputPullDown => (sys::gpio_mode_t_GPIO_MODE_INPUT, sys::gpio_pull_mode_t_GPIO_PULLDOWN_ONLY),
            PinMode::Output => (sys::gpio_mode_t_GPIO_MODE_INPUT_OUTPUT, sys::gpio_pull_mode_t_GPIO_FLOATING),
        };
        unsafe {
            sys::gpio_reset_pin(pin as i32);
            sys::gpio_set_direction(pin as i32, direction);
            sys::gpio_set_pull_mode(pin as i32, pull);
        }
    }

    fn digital_write(&mut self, pin: u8, level: Level) {
        unsafe {
            sys::gpio_set_level(pin as i32, level.is_high() as u32);
        }
    }

    fn digital_read(&mut self, pin: u8) -> Level {
        Level::from(unsafe { sys::gpio_get_level(pin as i32) } != 0)
    }

    fn watchdog_reset(&mut self) {
        unsafe {
            sys::esp_task_wdt_reset();
        }
    }

    fn reboot(&mut self) -> ! {
        unsafe { sys::esp_restart() }
    }

    fn millis(&self) -> u32 {
        (unsafe { sys::esp_timer_get_time() } / 1000) as u32
    }
}
