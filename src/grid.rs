use embedded_hal::i2c::{Error, I2c};
use heapless::Vec;

use crate::config::*;
use crate::tile::Tile;
use crate::MokaError;

/// A rectangular composition of up to 32 [`Tile`]s behind one flat
/// coordinate space.
///
/// A grid of `tile_cols x tile_rows` tiles spans `tile_cols*4` columns and
/// `tile_rows*4` rows of cells; a global linear index is
/// `col + row * width`. Every `Tile` operation exists here under the same
/// name, taking a global index or `(col, row)` pair and delegating to the
/// owning tile, except for the pure display/reset commands, which go out
/// as a single broadcast transaction instead of 32 per-tile ones.
///
/// The grid holds its own bus handle for broadcasts; each tile holds one
/// for its own traffic. Over a single physical bus, hand out shared-bus
/// devices (e.g. `embedded-hal-bus`'s `RefCellDevice`).
pub struct Grid<BUS> {
    bus: BUS,
    tile_cols: u8,
    tile_rows: u8,
    tiles: Vec<Tile<BUS>, MAX_TILES>,
}

impl<BUS: I2c> Grid<BUS> {
    /// Create an empty grid of `tile_cols x tile_rows` tiles. `bus` is the
    /// grid's broadcast handle. Fails with [`MokaError::InvalidDimensions`]
    /// when either dimension is zero or the tile count exceeds 32.
    pub fn new(bus: BUS, tile_cols: u8, tile_rows: u8) -> Result<Self, MokaError> {
        if tile_cols == 0
            || tile_rows == 0
            || tile_cols as usize * tile_rows as usize > MAX_TILES
        {
            return Err(MokaError::InvalidDimensions);
        }
        Ok(Self {
            bus,
            tile_cols,
            tile_rows,
            tiles: Vec::new(),
        })
    }

    /// Create a fully populated grid, provisioning one tile per slot with
    /// sequential addresses from [`AUTO_ADDRESS_BASE`]. `make_bus` is
    /// called once for the grid's broadcast handle and once per tile.
    pub fn new_auto<F>(tile_cols: u8, tile_rows: u8, mut make_bus: F) -> Result<Self, MokaError>
    where
        F: FnMut() -> BUS,
    {
        let mut grid = Self::new(make_bus(), tile_cols, tile_rows)?;
        for slot in 0..grid.tile_count() {
            let tile = Tile::new(make_bus(), AUTO_ADDRESS_BASE + slot as u8);
            grid.tiles.push(tile).map_err(|_| MokaError::GridFull)?;
        }
        Ok(grid)
    }

    /// Register the next tile. Tiles must be added in raster order: left
    /// to right, then top to bottom. The Nth added tile occupies the Nth
    /// slot of that order regardless of its bus address. Fails with
    /// [`MokaError::GridFull`] once every declared slot is occupied.
    pub fn add(&mut self, tile: Tile<BUS>) -> Result<(), MokaError> {
        if self.tiles.len() >= self.tile_count() {
            return Err(MokaError::GridFull);
        }
        self.tiles.push(tile).map_err(|_| MokaError::GridFull)?;
        Ok(())
    }

    /// Declared capacity in tiles.
    pub fn tile_count(&self) -> usize {
        self.tile_cols as usize * self.tile_rows as usize
    }

    /// Width of the grid in cells.
    pub fn width(&self) -> u8 {
        self.tile_cols * TILE_SIDE
    }

    /// Height of the grid in cells.
    pub fn height(&self) -> u8 {
        self.tile_rows * TILE_SIDE
    }

    pub fn tile(&self, slot: usize) -> Option<&Tile<BUS>> {
        self.tiles.get(slot)
    }

    pub fn tile_mut(&mut self, slot: usize) -> Option<&mut Tile<BUS>> {
        self.tiles.get_mut(slot)
    }

    fn broadcast(&mut self, bytes: &[u8]) -> Result<(), MokaError> {
        self.bus
            .write(BROADCAST_ADDRESS, bytes)
            .map_err(|err| MokaError::Bus(err.kind()))
    }

    /// Global index of `(col, row)`, or an out-of-range sentinel that
    /// every resolver rejects.
    fn index_at(&self, col: u8, row: u8) -> u16 {
        if col < self.width() && row < self.height() {
            col as u16 + row as u16 * self.width() as u16
        } else {
            u16::MAX
        }
    }

    fn split(&self, index: u16) -> Option<(u8, u8)> {
        let width = self.width() as u16;
        if index >= width * self.height() as u16 {
            return None;
        }
        Some(((index % width) as u8, (index / width) as u8))
    }

    fn tile_slot(&self, col: u8, row: u8) -> usize {
        (col / TILE_SIDE) as usize + (row / TILE_SIDE) as usize * self.tile_cols as usize
    }

    /// Owning tile slot and tile-local LED index of a global index.
    fn resolve(&self, index: u16) -> Option<(usize, u8)> {
        let (col, row) = self.split(index)?;
        let local = (row % TILE_SIDE) * TILE_SIDE + (col % TILE_SIDE);
        Some((self.tile_slot(col, row), local))
    }

    /// Owning tile slot and tile-local button index of a global index.
    /// The button matrix within a tile is transposed relative to the LED
    /// raster, so buttons count column-major.
    fn resolve_button(&self, index: u16) -> Option<(usize, u8)> {
        let (col, row) = self.split(index)?;
        let local = (col % TILE_SIDE) * TILE_SIDE + (row % TILE_SIDE);
        Some((self.tile_slot(col, row), local))
    }

    fn led_target(&mut self, index: u16) -> Option<(&mut Tile<BUS>, u8)> {
        let (slot, local) = self.resolve(index)?;
        Some((self.tiles.get_mut(slot)?, local))
    }

    fn led_view(&self, index: u16) -> Option<(&Tile<BUS>, u8)> {
        let (slot, local) = self.resolve(index)?;
        Some((self.tiles.get(slot)?, local))
    }

    fn button_view(&self, index: u16) -> Option<(&Tile<BUS>, u8)> {
        let (slot, local) = self.resolve_button(index)?;
        Some((self.tiles.get(slot)?, local))
    }

    // Per-cell operations, delegated to the owning tile. An index outside
    // the grid, or one landing on a slot with no registered tile yet, is
    // inert like an out-of-range index on a single tile.

    pub fn set_led(&mut self, index: u16) {
        if let Some((tile, local)) = self.led_target(index) {
            tile.set_led(local);
        }
    }

    pub fn clear_led(&mut self, index: u16) {
        if let Some((tile, local)) = self.led_target(index) {
            tile.clear_led(local);
        }
    }

    pub fn is_led(&self, index: u16) -> bool {
        self.led_view(index)
            .map_or(false, |(tile, local)| tile.is_led(local))
    }

    pub fn set_color(&mut self, index: u16, color: u8) {
        if let Some((tile, local)) = self.led_target(index) {
            tile.set_color(local, color);
        }
    }

    pub fn set_brightness(&mut self, index: u16, level: u8) {
        if let Some((tile, local)) = self.led_target(index) {
            tile.set_brightness(local, level);
        }
    }

    pub fn color(&self, index: u16) -> u8 {
        self.led_view(index)
            .map_or(0, |(tile, local)| tile.color(local))
    }

    pub fn brightness(&self, index: u16) -> u8 {
        self.led_view(index)
            .map_or(0, |(tile, local)| tile.brightness(local))
    }

    pub fn is_pressed(&self, index: u16) -> bool {
        self.button_view(index)
            .map_or(false, |(tile, local)| tile.is_pressed(local))
    }

    pub fn was_pressed(&self, index: u16) -> bool {
        self.button_view(index)
            .map_or(false, |(tile, local)| tile.was_pressed(local))
    }

    pub fn is_just_pressed(&self, index: u16) -> bool {
        self.button_view(index)
            .map_or(false, |(tile, local)| tile.is_just_pressed(local))
    }

    pub fn is_just_released(&self, index: u16) -> bool {
        self.button_view(index)
            .map_or(false, |(tile, local)| tile.is_just_released(local))
    }

    // Fan-out operations: every registered tile, in registration order.

    /// Set every cell of every registered tile to one packed color byte.
    pub fn set_global_color(&mut self, color: u8) {
        for tile in &mut self.tiles {
            tile.set_global_color(color);
        }
    }

    /// Flush pending LED changes on every registered tile. Stops at the
    /// first failing tile; its dirty state and that of the tiles after it
    /// are retained for a retry.
    pub fn update_leds(&mut self) -> Result<(), MokaError> {
        for tile in &mut self.tiles {
            tile.update_leds()?;
        }
        Ok(())
    }

    pub fn clear_display(&mut self) -> Result<(), MokaError> {
        for tile in &mut self.tiles {
            tile.clear_display()?;
        }
        Ok(())
    }

    pub fn set_debounce(&mut self, delay_ms: u8) -> Result<(), MokaError> {
        for tile in &mut self.tiles {
            tile.set_debounce(delay_ms)?;
        }
        Ok(())
    }

    /// Poll every registered tile's buttons. Returns whether any tile
    /// reported a change.
    pub fn read_buttons(&mut self) -> Result<bool, MokaError> {
        let mut changed = false;
        for tile in &mut self.tiles {
            changed |= tile.read_buttons()?;
        }
        Ok(changed)
    }

    // Pure commands, delivered as one broadcast transaction.

    /// Bring every board up at once: broadcasts display-on.
    pub fn initialize(&mut self) -> Result<(), MokaError> {
        self.display_on()
    }

    pub fn update_display(&mut self) -> Result<(), MokaError> {
        self.broadcast(&[UPDATE_DISPLAY])
    }

    pub fn display_on(&mut self) -> Result<(), MokaError> {
        self.broadcast(&[DISPLAY_STATE | 1])
    }

    pub fn display_off(&mut self) -> Result<(), MokaError> {
        self.broadcast(&[DISPLAY_STATE])
    }

    pub fn set_color_mode(&mut self, mode: ColorMode) -> Result<(), MokaError> {
        self.broadcast(&[COLOR_MODE | mode as u8])
    }

    pub fn reset(&mut self) -> Result<(), MokaError> {
        self.broadcast(&[RESET])
    }

    /// Always `true`. The wire protocol has no aggregate form of the
    /// change-flag query, so there is nothing meaningful to ask the bus
    /// here; poll [`Grid::read_buttons`] instead.
    pub fn has_changed(&mut self) -> Result<bool, MokaError> {
        Ok(true)
    }

    // (col, row) convenience wrappers over the index-addressed operations.

    pub fn set_led_at(&mut self, col: u8, row: u8) {
        self.set_led(self.index_at(col, row));
    }

    pub fn clear_led_at(&mut self, col: u8, row: u8) {
        self.clear_led(self.index_at(col, row));
    }

    pub fn is_led_at(&self, col: u8, row: u8) -> bool {
        self.is_led(self.index_at(col, row))
    }

    pub fn set_color_at(&mut self, col: u8, row: u8, color: u8) {
        self.set_color(self.index_at(col, row), color);
    }

    pub fn set_brightness_at(&mut self, col: u8, row: u8, level: u8) {
        self.set_brightness(self.index_at(col, row), level);
    }

    pub fn color_at(&self, col: u8, row: u8) -> u8 {
        self.color(self.index_at(col, row))
    }

    pub fn brightness_at(&self, col: u8, row: u8) -> u8 {
        self.brightness(self.index_at(col, row))
    }

    pub fn is_pressed_at(&self, col: u8, row: u8) -> bool {
        self.is_pressed(self.index_at(col, row))
    }

    pub fn was_pressed_at(&self, col: u8, row: u8) -> bool {
        self.was_pressed(self.index_at(col, row))
    }

    pub fn is_just_pressed_at(&self, col: u8, row: u8) -> bool {
        self.is_just_pressed(self.index_at(col, row))
    }

    pub fn is_just_released_at(&self, col: u8, row: u8) -> bool {
        self.is_just_released(self.index_at(col, row))
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use embedded_hal_bus::i2c::RefCellDevice;

    use super::*;
    use crate::test_utils::FakeI2cBus;

    type Bus = FakeI2cBus<128, 32>;
    type SharedBus<'a> = RefCellDevice<'a, Bus>;

    fn grid_2x2(bus: &RefCell<Bus>) -> Grid<SharedBus<'_>> {
        let mut grid = Grid::new(RefCellDevice::new(bus), 2, 2).unwrap();
        for address in [0x10, 0x11, 0x12, 0x13] {
            grid.add(Tile::new(RefCellDevice::new(bus), address)).unwrap();
        }
        grid
    }

    #[test]
    fn dimension_validation() {
        assert!(matches!(
            Grid::new(Bus::new(), 0, 3),
            Err(MokaError::InvalidDimensions)
        ));
        assert!(matches!(
            Grid::new(Bus::new(), 9, 9),
            Err(MokaError::InvalidDimensions)
        ));
        assert!(Grid::new(Bus::new(), 8, 4).is_ok());

        assert!(matches!(
            Grid::new_auto(0, 3, Bus::new),
            Err(MokaError::InvalidDimensions)
        ));
    }

    #[test]
    fn capacity_is_declared_tile_count() {
        let bus = RefCell::new(Bus::new());

        let mut grid = grid_2x2(&bus);

        assert_eq!(
            grid.add(Tile::new(RefCellDevice::new(&bus), 0x14)),
            Err(MokaError::GridFull)
        );
        assert_eq!(grid.tile_count(), 4);
        assert!(grid.tile(3).is_some());
        assert!(grid.tile(4).is_none());
    }

    #[test]
    fn global_index_resolution() {
        let bus = RefCell::new(Bus::new());

        let grid = grid_2x2(&bus);

        assert_eq!(grid.width(), 8);
        assert_eq!(grid.height(), 8);

        assert_eq!(grid.resolve(0), Some((0, 0)));
        assert_eq!(grid.resolve(5), Some((1, 1)));
        assert_eq!(grid.resolve(33), Some((2, 1)));
        assert_eq!(grid.resolve(63), Some((3, 15)));
        assert_eq!(grid.resolve(64), None);

        // Button matrices count column-major within a tile.
        assert_eq!(grid.resolve_button(33), Some((2, 4)));
        assert_eq!(grid.resolve_button(0), Some((0, 0)));

        assert_eq!(grid.index_at(7, 7), 63);
        assert_eq!(grid.index_at(8, 0), u16::MAX);
        assert_eq!(grid.index_at(0, 8), u16::MAX);
    }

    #[test]
    fn flush_fans_out_in_raster_order() {
        const EXPECTED_WRITE_DATA: &[u8] = &[
            0x50, 0x00, 0x00, //
            0x50, 0x00, 0x00, //
            0x01, 0x2A, 0x50, 0x00, 0x02, //
            0x50, 0x00, 0x00,
        ];
        const EXPECTED_ADDRESSES: &[u8] = &[0x10, 0x11, 0x12, 0x12, 0x13];

        let bus = RefCell::new(Bus::new());

        let mut grid = grid_2x2(&bus);

        grid.set_color(33, 0x2A);
        grid.set_led(33);
        assert!(grid.is_led(33));
        grid.update_leds().unwrap();

        assert_eq!(bus.borrow().write_data_as_ref(), EXPECTED_WRITE_DATA);
        assert_eq!(bus.borrow().addresses_as_ref(), EXPECTED_ADDRESSES);
    }

    #[test]
    fn pure_commands_broadcast_once() {
        const EXPECTED_WRITE_DATA: &[u8] = &[0x61, 0xF5, 0x61, 0x60, 0x84, 0xFF];
        const EXPECTED_ADDRESSES: &[u8] = &[0x00; 6];

        let bus = RefCell::new(Bus::new());

        let mut grid = grid_2x2(&bus);

        grid.initialize().unwrap();
        grid.update_display().unwrap();
        grid.display_on().unwrap();
        grid.display_off().unwrap();
        grid.set_color_mode(ColorMode::EightBit).unwrap();
        grid.reset().unwrap();

        assert_eq!(bus.borrow().write_data_as_ref(), EXPECTED_WRITE_DATA);
        assert_eq!(bus.borrow().addresses_as_ref(), EXPECTED_ADDRESSES);
    }

    #[test]
    fn buttons_fan_out_and_aggregate() {
        // Two polls of four tiles; on the second, tile 2 reports bit 4.
        let bus = RefCell::new(Bus::new_with_read_data(&[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00,
        ]));

        let mut grid = grid_2x2(&bus);

        assert!(!grid.read_buttons().unwrap());
        assert!(!grid.is_pressed(33));

        assert!(grid.read_buttons().unwrap());
        assert!(grid.is_pressed(33));
        assert!(grid.is_just_pressed(33));
        assert!(grid.is_pressed_at(1, 4));
        assert!(!grid.is_pressed(32));
        assert!(!grid.was_pressed(33));
    }

    #[test]
    fn global_color_and_clear() {
        const EXPECTED_WRITE_DATA: &[u8] = &[
            0x10, 0x0F, 0x50, 0x00, 0x00, //
            0x10, 0x0F, 0x50, 0x00, 0x00, //
            0x10, 0x0F, 0x50, 0x00, 0x00, //
            0x10, 0x0F, 0x50, 0x00, 0x00, //
            0xF0, 0xF0, 0xF0, 0xF0,
        ];

        let bus = RefCell::new(Bus::new());

        let mut grid = grid_2x2(&bus);

        grid.set_global_color(0x0F);
        assert_eq!(grid.color(33), 0x0F);
        grid.update_leds().unwrap();

        grid.clear_display().unwrap();
        assert_eq!(grid.color(33), 0x00);

        assert_eq!(bus.borrow().write_data_as_ref(), EXPECTED_WRITE_DATA);
    }

    #[test]
    fn auto_provisioning_assigns_sequential_addresses() {
        const EXPECTED_WRITE_DATA: &[u8] = &[0x82, 25, 0x82, 25, 0x82, 25, 0x82, 25];
        const EXPECTED_ADDRESSES: &[u8] = &[0x10, 0x11, 0x12, 0x13];

        let bus = RefCell::new(Bus::new());

        let mut grid = Grid::new_auto(2, 2, || RefCellDevice::new(&bus)).unwrap();

        for slot in 0..4 {
            assert_eq!(grid.tile(slot).unwrap().address(), 0x10 + slot as u8);
        }

        grid.set_debounce(25).unwrap();

        assert_eq!(bus.borrow().write_data_as_ref(), EXPECTED_WRITE_DATA);
        assert_eq!(bus.borrow().addresses_as_ref(), EXPECTED_ADDRESSES);
    }

    #[test]
    fn unregistered_slots_are_inert() {
        let bus = RefCell::new(Bus::new());

        let mut grid = Grid::new(RefCellDevice::new(&bus), 2, 2).unwrap();
        grid.add(Tile::new(RefCellDevice::new(&bus), 0x10)).unwrap();

        // Index 33 lands on raster slot 2, which has no tile yet.
        grid.set_led(33);
        assert!(!grid.is_led(33));
        assert_eq!(grid.color(33), 0);

        grid.set_led(0);
        assert!(grid.is_led(0));

        grid.update_leds().unwrap();
        assert_eq!(bus.borrow().addresses_as_ref(), &[0x10]);
    }

    #[test]
    fn aggregate_change_flag_is_stubbed() {
        let bus = RefCell::new(Bus::new());

        let mut grid = grid_2x2(&bus);

        assert!(grid.has_changed().unwrap());
        assert!(bus.borrow().write_data_as_ref().is_empty());
    }
}
