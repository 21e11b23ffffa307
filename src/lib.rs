//! Driver for the Moka board family: tiled 4x4 RGB LED / button units on a
//! shared I2C bus.
//!
//! Each board carries 16 RGB LEDs behind 16 soft buttons and answers on its
//! own hardware-set address; address 0 is a broadcast reaching every board
//! at once. [`Tile`] drives a single board and keeps a local mirror of its
//! LED registers so that repeated mutations cost nothing until
//! [`Tile::update_leds`] flushes them in as few transactions as the dirty
//! set allows. [`Grid`] composes up to 32 tiles into one rectangular
//! surface with a single flat coordinate space, fanning out or
//! broadcasting as each operation permits.
//!
//! The bus is any [`embedded_hal::i2c::I2c`] implementation. Nothing here
//! configures the bus clock; a tile only records its preferred
//! [`BusSpeed`](config::BusSpeed) for board bring-up to apply. To drive
//! several tiles plus a grid handle over one physical bus, hand each its
//! own shared-bus device (e.g. `embedded-hal-bus`'s `RefCellDevice`).

#![no_std]

use embedded_hal::i2c::{Error, ErrorKind, ErrorType, I2c};

pub mod config;
mod grid;
mod state;
mod tile;

#[cfg(test)]
mod test_utils;

pub use config::{BusSpeed, ColorMode};
pub use grid::Grid;
pub use tile::Tile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MokaError {
    /// A bus transaction did not complete.
    Bus(ErrorKind),
    /// Zero rows or columns, or more than 32 tiles requested.
    InvalidDimensions,
    /// Every declared tile slot is already occupied.
    GridFull,
}

impl Error for MokaError {
    fn kind(&self) -> ErrorKind {
        match self {
            MokaError::Bus(kind) => *kind,
            _ => ErrorKind::Other,
        }
    }
}

impl<BUS: I2c> ErrorType for Tile<BUS> {
    type Error = MokaError;
}

impl<BUS: I2c> ErrorType for Grid<BUS> {
    type Error = MokaError;
}
