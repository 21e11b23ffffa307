use embedded_hal::i2c::{Error, I2c};

use crate::config::*;
use crate::state::TileState;
use crate::MokaError;

/// Driver for a single Moka board: 16 RGB LEDs and 16 soft buttons on a
/// 4x4 grid, addressed over I2C.
///
/// LED mutations only touch a local mirror and mark the slot dirty;
/// [`Tile::update_leds`] flushes the dirty set in as few transactions as
/// its size allows. Button state is refreshed only by an explicit
/// [`Tile::read_buttons`] poll.
pub struct Tile<BUS> {
    bus: BUS,
    address: u8,
    speed: BusSpeed,
    state: TileState,
}

impl<BUS: I2c> Tile<BUS> {
    /// Create a new driver for the board at `address`, preferring the
    /// standard 100 kHz bus clock.
    pub fn new(bus: BUS, address: u8) -> Self {
        Self::new_with_speed(bus, address, BusSpeed::Standard)
    }

    pub fn new_with_speed(bus: BUS, address: u8, speed: BusSpeed) -> Self {
        Self {
            bus,
            address,
            speed,
            state: TileState::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Clock rate this tile wants on the bus. The driver never sets the
    /// clock itself; board bring-up reads this and configures the bus.
    pub fn bus_speed(&self) -> BusSpeed {
        self.speed
    }

    pub fn into_inner(self) -> BUS {
        self.bus
    }

    pub fn inner(&self) -> &BUS {
        &self.bus
    }

    pub fn inner_mut(&mut self) -> &mut BUS {
        &mut self.bus
    }

    fn command(&mut self, bytes: &[u8]) -> Result<(), MokaError> {
        self.bus
            .write(self.address, bytes)
            .map_err(|err| MokaError::Bus(err.kind()))
    }

    fn request(&mut self, command: u8, reply: &mut [u8]) -> Result<(), MokaError> {
        self.bus
            .write_read(self.address, &[command], reply)
            .map_err(|err| MokaError::Bus(err.kind()))
    }

    /// Bring the board up: turns the display on.
    pub fn initialize(&mut self) -> Result<(), MokaError> {
        self.display_on()
    }

    /// Mark one LED lit. Local only; flushed by [`Tile::update_leds`].
    pub fn set_led(&mut self, index: u8) {
        if index >= TILE_LED_COUNT as u8 {
            return;
        }
        self.state.led_on |= 1 << index;
        self.state.dirty |= 1 << index;
    }

    /// Mark one LED unlit. Local only; flushed by [`Tile::update_leds`].
    pub fn clear_led(&mut self, index: u8) {
        if index >= TILE_LED_COUNT as u8 {
            return;
        }
        self.state.led_on &= !(1 << index);
        self.state.dirty |= 1 << index;
    }

    pub fn is_led(&self, index: u8) -> bool {
        if index >= TILE_LED_COUNT as u8 {
            return false;
        }
        self.state.led_on & (1 << index) != 0
    }

    /// Overwrite one LED's packed color byte (brightness in bits 7-6,
    /// color value in bits 5-0). Local only.
    pub fn set_color(&mut self, index: u8, color: u8) {
        if index >= TILE_LED_COUNT as u8 {
            return;
        }
        self.state.led_color[index as usize] = color;
        self.state.dirty |= 1 << index;
    }

    /// Overwrite one LED's brightness (0-3), preserving its color bits.
    /// Levels above 3 are rejected. Local only.
    pub fn set_brightness(&mut self, index: u8, level: u8) {
        if index >= TILE_LED_COUNT as u8 || level > MAX_BRIGHTNESS {
            return;
        }
        let slot = &mut self.state.led_color[index as usize];
        *slot = (*slot & COLOR_MASK) | (level << BRIGHTNESS_SHIFT);
        self.state.dirty |= 1 << index;
    }

    /// The packed color byte of one LED, 0 when out of range.
    pub fn color(&self, index: u8) -> u8 {
        if index >= TILE_LED_COUNT as u8 {
            return 0;
        }
        self.state.led_color[index as usize]
    }

    pub fn brightness(&self, index: u8) -> u8 {
        self.color(index) >> BRIGHTNESS_SHIFT
    }

    /// Set every LED to the same packed color byte. Local only; marks all
    /// 16 slots dirty so the next flush takes the uniform single-byte path.
    pub fn set_global_color(&mut self, color: u8) {
        self.state.led_color = [color; TILE_LED_COUNT];
        self.state.dirty = u16::MAX;
    }

    /// Flush pending LED changes, picking the cheapest transaction shape.
    ///
    /// With more than [`SPARSE_UPDATE_LIMIT`] dirty slots the whole panel
    /// is sent in one transaction (a single byte when every slot holds the
    /// same value), otherwise each dirty slot is sent individually. The
    /// on/off bitmask is always resynced afterwards in its own
    /// transaction; it is orthogonal to color state.
    ///
    /// Dirty bits are only cleared once every transaction succeeded. On
    /// failure the error is returned and the full dirty set is retained,
    /// so a later call retries everything; retry policy is the caller's.
    pub fn update_leds(&mut self) -> Result<(), MokaError> {
        let dirty = self.state.dirty;
        let pending = dirty.count_ones() as usize;

        if pending > SPARSE_UPDATE_LIMIT {
            match self.uniform_color() {
                Some(color) if dirty == u16::MAX => {
                    self.command(&[SET_GLOBAL_LED, color])?;
                }
                _ => {
                    let mut frame = [0u8; TILE_LED_COUNT + 1];
                    frame[0] = SET_ALL_LED;
                    frame[1..].copy_from_slice(&self.state.led_color);
                    self.command(&frame)?;
                }
            }
        } else {
            for index in 0..TILE_LED_COUNT as u8 {
                if dirty & (1 << index) != 0 {
                    let color = self.state.led_color[index as usize];
                    self.command(&[SET_ONE_LED | index, color])?;
                }
            }
        }

        self.write_led_state()?;
        self.state.dirty = 0;
        Ok(())
    }

    fn uniform_color(&self) -> Option<u8> {
        let first = self.state.led_color[0];
        if self.state.led_color.iter().all(|&color| color == first) {
            Some(first)
        } else {
            None
        }
    }

    fn write_led_state(&mut self) -> Result<(), MokaError> {
        let bits = self.state.led_on.to_be_bytes();
        self.command(&[LED_STATE, bits[0], bits[1]])
    }

    /// Refresh the display from the board's current register state,
    /// whether or not anything is pending locally.
    pub fn update_display(&mut self) -> Result<(), MokaError> {
        self.command(&[UPDATE_DISPLAY])
    }

    /// Poll the 16-bit button state, shifting the previous poll into the
    /// edge-detection window.
    ///
    /// Returns whether the state changed since the last poll. On a
    /// transport failure both the current and previous words are left
    /// untouched.
    pub fn read_buttons(&mut self) -> Result<bool, MokaError> {
        let mut reply = [0u8; 2];
        self.request(GET_BUTTONS, &mut reply)?;

        self.state.prev_buttons = self.state.buttons;
        self.state.buttons = u16::from_be_bytes(reply);
        Ok(self.state.buttons != self.state.prev_buttons)
    }

    pub fn is_pressed(&self, index: u8) -> bool {
        if index >= TILE_LED_COUNT as u8 {
            return false;
        }
        self.state.buttons & (1 << index) != 0
    }

    pub fn was_pressed(&self, index: u8) -> bool {
        if index >= TILE_LED_COUNT as u8 {
            return false;
        }
        self.state.prev_buttons & (1 << index) != 0
    }

    pub fn is_just_pressed(&self, index: u8) -> bool {
        self.is_pressed(index) && !self.was_pressed(index)
    }

    pub fn is_just_released(&self, index: u8) -> bool {
        !self.is_pressed(index) && self.was_pressed(index)
    }

    pub fn display_on(&mut self) -> Result<(), MokaError> {
        self.command(&[DISPLAY_STATE | 1])
    }

    pub fn display_off(&mut self) -> Result<(), MokaError> {
        self.command(&[DISPLAY_STATE])
    }

    /// Clear the board's display and, once that is confirmed, the local
    /// color mirror. On/off flags are untouched and still need their own
    /// flush if relied upon.
    pub fn clear_display(&mut self) -> Result<(), MokaError> {
        self.command(&[CLR_DISPLAY])?;
        self.state.led_color = [0; TILE_LED_COUNT];
        Ok(())
    }

    /// Set the button debounce delay in milliseconds.
    pub fn set_debounce(&mut self, delay_ms: u8) -> Result<(), MokaError> {
        self.command(&[DEBOUNCE_DELAY, delay_ms])
    }

    /// Query the board's interrupt/change flag.
    pub fn has_changed(&mut self) -> Result<bool, MokaError> {
        let mut reply = [0u8; 1];
        self.request(HAS_CHANGED, &mut reply)?;
        Ok(reply[0] != 0)
    }

    /// Select the on-wire color encoding.
    pub fn set_color_mode(&mut self, mode: ColorMode) -> Result<(), MokaError> {
        self.command(&[COLOR_MODE | mode as u8])
    }

    pub fn reset(&mut self) -> Result<(), MokaError> {
        self.command(&[RESET])
    }

    // (col, row) convenience wrappers over the index-addressed operations.

    pub fn set_led_at(&mut self, col: u8, row: u8) {
        self.set_led(local_index(col, row));
    }

    pub fn clear_led_at(&mut self, col: u8, row: u8) {
        self.clear_led(local_index(col, row));
    }

    pub fn is_led_at(&self, col: u8, row: u8) -> bool {
        self.is_led(local_index(col, row))
    }

    pub fn set_color_at(&mut self, col: u8, row: u8, color: u8) {
        self.set_color(local_index(col, row), color);
    }

    pub fn set_brightness_at(&mut self, col: u8, row: u8, level: u8) {
        self.set_brightness(local_index(col, row), level);
    }

    pub fn color_at(&self, col: u8, row: u8) -> u8 {
        self.color(local_index(col, row))
    }

    pub fn brightness_at(&self, col: u8, row: u8) -> u8 {
        self.brightness(local_index(col, row))
    }

    pub fn is_pressed_at(&self, col: u8, row: u8) -> bool {
        self.is_pressed(local_index(col, row))
    }

    pub fn was_pressed_at(&self, col: u8, row: u8) -> bool {
        self.was_pressed(local_index(col, row))
    }

    pub fn is_just_pressed_at(&self, col: u8, row: u8) -> bool {
        self.is_just_pressed(local_index(col, row))
    }

    pub fn is_just_released_at(&self, col: u8, row: u8) -> bool {
        self.is_just_released(local_index(col, row))
    }
}

/// Maps in-range coordinates to `row*4 + col`; anything else lands on the
/// out-of-range index 16, which every operation treats as inert.
const fn local_index(col: u8, row: u8) -> u8 {
    if col < TILE_SIDE && row < TILE_SIDE {
        row * TILE_SIDE + col
    } else {
        TILE_LED_COUNT as u8
    }
}
