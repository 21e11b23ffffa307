use crate::config::TILE_LED_COUNT;

pub struct TileState {
    pub led_color: [u8; TILE_LED_COUNT],
    pub led_on: u16,
    pub dirty: u16,
    pub buttons: u16,
    pub prev_buttons: u16,
}

impl Default for TileState {
    // This reflects the board state after a power-on reset
    fn default() -> Self {
        Self {
            led_color: [0; TILE_LED_COUNT],
            led_on: 0,
            dirty: 0,
            buttons: 0,
            prev_buttons: 0,
        }
    }
}
