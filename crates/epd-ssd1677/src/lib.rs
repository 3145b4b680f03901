#![cfg_attr(not(test), no_std)]

//! SSD1677 (7.5" 800x480 e-paper) driver primitives.

mod framebuffer;
pub mod protocol;

#[cfg(feature = "embedded-graphics")]
mod graphics;

pub use framebuffer::FrameBuffer;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiDevice,
};

/// Driver configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Expected SPI clock in Hz (documented for board glue).
    pub spi_hz: u32,
    /// Upper bound for any BUSY wait.
    pub busy_timeout_ms: u32,
    pub temp_sensor: u8,
    pub booster_soft_start: [u8; 5],
    /// Gate scanning byte of the driver output command.
    pub gate_scan: u8,
    pub border_waveform: u8,
    /// Update sequence used for a full refresh (clock, analog, LUT, display, power off).
    pub full_update_sequence: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spi_hz: 10_000_000,
            busy_timeout_ms: 20_000,
            temp_sensor: 0x80,
            booster_soft_start: [0xAE, 0xC7, 0xC3, 0xC0, 0x40],
            gate_scan: 0x02,
            border_waveform: 0x01,
            full_update_sequence: 0xF7,
        }
    }
}

/// Driver errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error<SpiErr, PinErr> {
    /// SPI transaction failed.
    Spi(SpiErr),
    /// DC, RST or BUSY pin operation failed.
    Pin(PinErr),
    /// BUSY stayed high longer than `Config::busy_timeout_ms`.
    BusyTimeout,
    /// Input parameters are outside supported bounds.
    InvalidInput,
}

pub type DriverResult<SpiErr, PinErr> = Result<(), Error<SpiErr, PinErr>>;

/// SSD1677 driver.
#[derive(Debug)]
pub struct Ssd1677<SPI, DC, RST, BUSY> {
    spi: SPI,
    dc: DC,
    rst: RST,
    busy: BUSY,
    config: Config,
    asleep: bool,
}

impl<SPI, DC, RST, BUSY> Ssd1677<SPI, DC, RST, BUSY>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: InputPin<Error = DC::Error>,
{
    pub fn new(spi: SPI, dc: DC, rst: RST, busy: BUSY, config: Config) -> Self {
        Self {
            spi,
            dc,
            rst,
            busy,
            config,
            asleep: true,
        }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// True until [`Self::init`] runs, and again after [`Self::deep_sleep`].
    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// Releases owned bus and pins.
    pub fn release(self) -> (SPI, DC, RST, BUSY) {
        (self.spi, self.dc, self.rst, self.busy)
    }

    /// Hardware reset, soft reset and panel setup.
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> DriverResult<SPI::Error, DC::Error> {
        self.rst.set_low().map_err(Error::Pin)?;
        delay.delay_ms(10);
        self.rst.set_high().map_err(Error::Pin)?;
        delay.delay_ms(10);

        self.command(protocol::SOFT_RESET, &[])?;
        self.wait_busy(delay)?;

        self.command(protocol::TEMP_SENSOR_CONTROL, &[self.config.temp_sensor])?;
        let booster_soft_start = self.config.booster_soft_start;
        self.command(protocol::BOOSTER_SOFT_START, &booster_soft_start)?;

        let driver = protocol::build_driver_output(protocol::HEIGHT as u16, self.config.gate_scan)
            .ok_or(Error::InvalidInput)?;
        self.command(protocol::DRIVER_OUTPUT_CONTROL, &driver)?;
        self.command(protocol::BORDER_WAVEFORM, &[self.config.border_waveform])?;

        self.asleep = false;
        Ok(())
    }

    /// Writes a full framebuffer into black/white RAM.
    pub fn write_frame(
        &mut self,
        buffer: &[u8; protocol::BUFFER_SIZE],
    ) -> DriverResult<SPI::Error, DC::Error> {
        self.set_window(0, 0, protocol::WIDTH as u16, protocol::HEIGHT as u16)?;

        self.command(protocol::WRITE_RAM_BW, &[])?;
        let mut line = [0u8; protocol::LINE_BYTES];
        for row in buffer.chunks_exact(protocol::LINE_BYTES) {
            protocol::ink_to_ram(&mut line, row);
            self.spi.write(&line).map_err(Error::Spi)?;
        }

        Ok(())
    }

    /// Runs the full update waveform and waits for it to finish.
    pub fn refresh_full<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> DriverResult<SPI::Error, DC::Error> {
        self.command(protocol::DISPLAY_UPDATE_CTRL1, &[protocol::CTRL1_BYPASS_RED])?;
        self.command(
            protocol::DISPLAY_UPDATE_CTRL2,
            &[self.config.full_update_sequence],
        )?;
        self.command(protocol::MASTER_ACTIVATION, &[])?;
        self.wait_busy(delay)
    }

    /// Enters deep sleep, keeping RAM. Only a reset wakes the controller.
    pub fn deep_sleep(&mut self) -> DriverResult<SPI::Error, DC::Error> {
        self.command(protocol::DEEP_SLEEP, &[0x01])?;
        self.asleep = true;
        Ok(())
    }

    fn set_window(&mut self, x: u16, y: u16, w: u16, h: u16) -> DriverResult<SPI::Error, DC::Error> {
        let x_range =
            protocol::build_ram_range(x, w, protocol::WIDTH as u16).ok_or(Error::InvalidInput)?;
        let y_range =
            protocol::build_ram_range(y, h, protocol::HEIGHT as u16).ok_or(Error::InvalidInput)?;

        self.command(protocol::DATA_ENTRY_MODE, &[protocol::DATA_ENTRY_XY_INCREMENT])?;
        self.command(protocol::SET_RAM_X_RANGE, &x_range)?;
        self.command(protocol::SET_RAM_Y_RANGE, &y_range)?;
        self.command(protocol::SET_RAM_X_COUNTER, &protocol::build_ram_counter(x))?;
        self.command(protocol::SET_RAM_Y_COUNTER, &protocol::build_ram_counter(y))?;
        Ok(())
    }

    fn command(&mut self, cmd: u8, data: &[u8]) -> DriverResult<SPI::Error, DC::Error> {
        self.dc.set_low().map_err(Error::Pin)?;
        self.spi.write(&[cmd]).map_err(Error::Spi)?;
        self.dc.set_high().map_err(Error::Pin)?;

        if !data.is_empty() {
            self.spi.write(data).map_err(Error::Spi)?;
        }

        Ok(())
    }

    fn wait_busy<D: DelayNs>(&mut self, delay: &mut D) -> DriverResult<SPI::Error, DC::Error> {
        let mut waited_ms = 0u32;
        while self.busy.is_high().map_err(Error::Pin)? {
            if waited_ms >= self.config.busy_timeout_ms {
                return Err(Error::BusyTimeout);
            }
            delay.delay_ms(1);
            waited_ms = waited_ms.saturating_add(1);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;
    use std::{cell::RefCell, rc::Rc, vec::Vec};

    use embedded_hal::{digital, spi};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Wire {
        Command(u8),
        Data(Vec<u8>),
    }

    type Log = Rc<RefCell<Vec<Wire>>>;

    struct Bus {
        log: Log,
        dc_high: Rc<RefCell<bool>>,
    }

    impl spi::ErrorType for Bus {
        type Error = Infallible;
    }

    impl SpiDevice<u8> for Bus {
        fn transaction(&mut self, ops: &mut [spi::Operation<'_, u8>]) -> Result<(), Infallible> {
            for op in ops {
                if let spi::Operation::Write(bytes) = op {
                    let entry = if *self.dc_high.borrow() {
                        Wire::Data(bytes.to_vec())
                    } else {
                        Wire::Command(bytes[0])
                    };
                    self.log.borrow_mut().push(entry);
                }
            }
            Ok(())
        }
    }

    struct Pin {
        level: Rc<RefCell<bool>>,
    }

    impl digital::ErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            *self.level.borrow_mut() = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            *self.level.borrow_mut() = true;
            Ok(())
        }
    }

    struct Busy {
        high_polls: u32,
    }

    impl digital::ErrorType for Busy {
        type Error = Infallible;
    }

    impl InputPin for Busy {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            if self.high_polls == 0 {
                return Ok(false);
            }
            self.high_polls -= 1;
            Ok(true)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            self.is_high().map(|high| !high)
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn driver(high_polls: u32, config: Config) -> (Ssd1677<Bus, Pin, Pin, Busy>, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let dc_level = Rc::new(RefCell::new(false));
        let bus = Bus {
            log: log.clone(),
            dc_high: dc_level.clone(),
        };
        let dc = Pin { level: dc_level };
        let rst = Pin {
            level: Rc::new(RefCell::new(true)),
        };
        (
            Ssd1677::new(bus, dc, rst, Busy { high_polls }, config),
            log,
        )
    }

    #[test]
    fn init_sends_reset_then_setup_commands() {
        let (mut epd, log) = driver(3, Config::default());
        epd.init(&mut NoDelay).unwrap();

        let log = log.borrow();
        assert_eq!(log[0], Wire::Command(protocol::SOFT_RESET));
        assert!(log.contains(&Wire::Command(protocol::DRIVER_OUTPUT_CONTROL)));
        assert!(log.contains(&Wire::Data(vec![0xDF, 0x01, 0x02])));
        assert!(!epd.is_asleep());
    }

    #[test]
    fn write_frame_streams_inverted_rows() {
        let (mut epd, log) = driver(0, Config::default());
        let mut fb = FrameBuffer::new();
        fb.set_pixel(0, 0, true);

        epd.write_frame(fb.bytes()).unwrap();

        let log = log.borrow();
        let start = log
            .iter()
            .position(|w| *w == Wire::Command(protocol::WRITE_RAM_BW))
            .unwrap();
        let rows = &log[start + 1..];
        assert_eq!(rows.len(), protocol::HEIGHT);
        match &rows[0] {
            Wire::Data(bytes) => {
                assert_eq!(bytes.len(), protocol::LINE_BYTES);
                assert_eq!(bytes[0], 0x7F);
                assert_eq!(bytes[1], 0xFF);
            }
            other => panic!("unexpected wire entry {other:?}"),
        }
    }

    #[test]
    fn busy_wait_times_out() {
        let config = Config {
            busy_timeout_ms: 5,
            ..Config::default()
        };
        let (mut epd, _log) = driver(u32::MAX, config);
        assert_eq!(epd.refresh_full(&mut NoDelay), Err(Error::BusyTimeout));
    }

    #[test]
    fn deep_sleep_marks_driver_asleep() {
        let (mut epd, log) = driver(0, Config::default());
        epd.init(&mut NoDelay).unwrap();
        epd.deep_sleep().unwrap();

        assert!(epd.is_asleep());
        let log = log.borrow();
        let tail = &log[log.len() - 2..];
        assert_eq!(tail[0], Wire::Command(protocol::DEEP_SLEEP));
        assert_eq!(tail[1], Wire::Data(vec![0x01]));
    }
}
