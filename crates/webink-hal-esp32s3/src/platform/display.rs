use core::convert::Infallible;

use embedded_graphics::{
    mono_font::{
        MonoTextStyle,
        ascii::{FONT_9X15, FONT_10X20},
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiDevice,
};
use epd_ssd1677::{
    Error as DriverError, FrameBuffer, Ssd1677,
    protocol::{HEIGHT, LINE_BYTES, WIDTH},
};
use log::{info, warn};
use webink_core::{
    display::{ErrorScreen, Panel, wrap_text},
    image::PixelData,
    types::ColorMode,
};

const BORDER_INSET: i32 = 10;
const ICON_CENTER_Y: i32 = 80;
const ICON_HALF: i32 = 40;
const ICON_STROKE: u32 = 5;
const TITLE_Y: i32 = 150;
const DETAIL_Y: i32 = 195;
const DETAIL_MARGIN: i32 = 50;
const DETAIL_LINE_HEIGHT: i32 = 20;
const DETAIL_MAX_LINES: usize = 8;
const SERVER_LINE_Y: i32 = HEIGHT as i32 - 100;
const RETRY_LINE_Y: i32 = HEIGHT as i32 - 60;

/// E-paper [`Panel`]: draws into a RAM framebuffer, pushes it on refresh.
pub struct EpdPanel<SPI, DC, RST, BUSY, D> {
    driver: Ssd1677<SPI, DC, RST, BUSY>,
    frame: &'static mut FrameBuffer,
    delay: D,
}

impl<SPI, DC, RST, BUSY, D> EpdPanel<SPI, DC, RST, BUSY, D>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: InputPin<Error = DC::Error>,
    D: DelayNs,
{
    pub fn new(driver: Ssd1677<SPI, DC, RST, BUSY>, frame: &'static mut FrameBuffer, delay: D) -> Self {
        Self {
            driver,
            frame,
            delay,
        }
    }

    /// Parks the controller before the MCU sleeps. RAM contents are kept.
    pub fn sleep(&mut self) -> Result<(), DriverError<SPI::Error, DC::Error>> {
        if self.driver.is_asleep() {
            return Ok(());
        }
        self.driver.deep_sleep()
    }

    fn wake(&mut self) -> Result<(), DriverError<SPI::Error, DC::Error>> {
        if self.driver.is_asleep() {
            self.driver.init(&mut self.delay)?;
        }
        Ok(())
    }
}

impl<SPI, DC, RST, BUSY, D> Panel for EpdPanel<SPI, DC, RST, BUSY, D>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: InputPin<Error = DC::Error>,
    D: DelayNs,
{
    type Error = DriverError<SPI::Error, DC::Error>;

    fn dimensions(&self) -> (u16, u16) {
        (WIDTH as u16, HEIGHT as u16)
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.frame.clear(false);
        Ok(())
    }

    fn draw_pixel(&mut self, x: u16, y: u16, ink: bool) -> Result<(), Self::Error> {
        // Off-panel pixels are clipped, not errors.
        let _ = self.frame.set_pixel(x as usize, y as usize, ink);
        Ok(())
    }

    fn draw_pixel_block(&mut self, x: u16, y: u16, pixels: &PixelData<'_>) -> Result<(), Self::Error> {
        // Full-width bitmaps share the framebuffer layout and go in row by row.
        if pixels.mode == ColorMode::Mono && x == 0 && pixels.width as usize == WIDTH {
            for row in 0..pixels.height {
                let py = y.saturating_add(row) as usize;
                if py >= HEIGHT {
                    break;
                }
                if let Some(bytes) = pixels.row(row) {
                    let _ = self.frame.set_row(py, &bytes[..bytes.len().min(LINE_BYTES)]);
                }
            }
            return Ok(());
        }

        let (width, height) = self.dimensions();
        for row in 0..pixels.height {
            let py = y.saturating_add(row);
            if py >= height {
                break;
            }
            for col in 0..pixels.width {
                let px = x.saturating_add(col);
                if px >= width {
                    break;
                }
                let ink = webink_core::display::ink_at(pixels, col, row);
                let _ = self.frame.set_pixel(px as usize, py as usize, ink);
            }
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), Self::Error> {
        self.wake()?;
        self.driver.write_frame(self.frame.bytes())?;
        self.driver.refresh_full(&mut self.delay)?;
        info!("display: full refresh done");
        Ok(())
    }

    fn show_error(&mut self, screen: &ErrorScreen<'_>) -> Result<(), Self::Error> {
        warn!("display: error screen ({})", screen.kind.as_str());
        self.frame.clear(false);
        let Ok(()) = compose_error_screen(self.frame, screen);
        self.refresh()
    }
}

/// Double border, cross icon, title, wrapped detail, server and retry lines.
fn compose_error_screen(frame: &mut FrameBuffer, screen: &ErrorScreen<'_>) -> Result<(), Infallible> {
    let width = WIDTH as i32;
    let height = HEIGHT as i32;
    let thin = PrimitiveStyle::with_stroke(BinaryColor::On, 1);

    for inset in [BORDER_INSET, BORDER_INSET + 2] {
        Rectangle::new(
            Point::new(inset, inset),
            Size::new((width - 2 * inset) as u32, (height - 2 * inset) as u32),
        )
        .into_styled(thin)
        .draw(frame)?;
    }

    let cx = width / 2;
    let thick = PrimitiveStyle::with_stroke(BinaryColor::On, ICON_STROKE);
    Line::new(
        Point::new(cx - ICON_HALF, ICON_CENTER_Y - ICON_HALF),
        Point::new(cx + ICON_HALF, ICON_CENTER_Y + ICON_HALF),
    )
    .into_styled(thick)
    .draw(frame)?;
    Line::new(
        Point::new(cx + ICON_HALF, ICON_CENTER_Y - ICON_HALF),
        Point::new(cx - ICON_HALF, ICON_CENTER_Y + ICON_HALF),
    )
    .into_styled(thick)
    .draw(frame)?;

    let centered = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Top)
        .build();
    let left = TextStyleBuilder::new()
        .alignment(Alignment::Left)
        .baseline(Baseline::Top)
        .build();
    let title_font = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    let body_font = MonoTextStyle::new(&FONT_9X15, BinaryColor::On);

    Text::with_text_style(screen.title, Point::new(cx, TITLE_Y), title_font, centered).draw(frame)?;

    let max_chars = ((width - 2 * DETAIL_MARGIN) / FONT_9X15.character_size.width as i32) as usize;
    let mut y = DETAIL_Y;
    for line in wrap_text(screen.detail, max_chars)
        .into_iter()
        .take(DETAIL_MAX_LINES)
    {
        Text::with_text_style(line, Point::new(DETAIL_MARGIN, y), body_font, left).draw(frame)?;
        y += DETAIL_LINE_HEIGHT;
    }

    let server = screen.server_line();
    Text::with_text_style(&server, Point::new(cx, SERVER_LINE_Y), body_font, centered)
        .draw(frame)?;
    let retry = screen.retry_notice();
    Text::with_text_style(&retry, Point::new(cx, RETRY_LINE_Y), body_font, centered)
        .draw(frame)?;

    Ok(())
}
