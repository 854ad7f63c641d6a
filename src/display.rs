// Copyright 2018 Ian Johnson

// This file is part of Chip-8.

// Chip-8 is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Chip-8 is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Chip-8.  If not, see <http://www.gnu.org/licenses/>.

//! The Chip-8 framebuffer and sprite renderer.

use std::default::Default;
use std::fmt;

use failure::Fail;

use instruction::OutOfRangeError;

/// The width of the display.
pub const WIDTH: usize = 64;
/// The height of the display.
pub const HEIGHT: usize = 32;

/// The width of every sprite, in pixels.
pub const SPRITE_WIDTH: usize = 8;
/// The height of a hex digit sprite.
pub const FONT_HEIGHT: usize = 5;

/// The hex digit sprites `0` through `F`, laid out back to back.
pub const FONT: [u8; 16 * FONT_HEIGHT] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

/// A Chip-8 display buffer.
///
/// The buffer is only ever changed by clearing it or drawing sprites; the
/// host reads it, usually through `refresh`.
pub struct Buffer {
    /// The underlying display buffer data, indexed by column then row.
    data: [[bool; HEIGHT]; WIDTH],
    /// Whether the display needs to be refreshed.
    needs_refresh: bool,
}

impl Buffer {
    /// Returns a new display buffer with all pixels clear.
    pub fn new() -> Self {
        Buffer {
            data: [[false; HEIGHT]; WIDTH],
            needs_refresh: false,
        }
    }

    /// Clears the display.
    ///
    /// This marks the display as needing a refresh, so a `CLS` on its own is
    /// enough for the next `refresh` to redraw.
    pub fn clear(&mut self) {
        for col in self.data.iter_mut() {
            for elem in col.iter_mut() {
                *elem = false;
            }
        }
        self.needs_refresh = true;
    }

    /// Returns a reference to the underlying pixel data.
    pub fn data(&self) -> &[[bool; HEIGHT]; WIDTH] {
        &self.data
    }

    /// Returns whether the pixel at the given position is lit.
    pub fn get(&self, x: usize, y: usize) -> Result<bool, OutOfRangeError> {
        if x >= WIDTH {
            Err(OutOfRangeError("pixel column", x))
        } else if y >= HEIGHT {
            Err(OutOfRangeError("pixel row", y))
        } else {
            Ok(self.data[x][y])
        }
    }

    /// Draws the given sprite with its top-left corner at the given position.
    ///
    /// The position is first wrapped onto the screen.  After that, columns
    /// running past the right edge wrap around to the left, but rows running
    /// past the bottom edge are clipped.  Every set bit of the sprite flips
    /// the pixel under it.
    ///
    /// Returns whether there was a collision, i.e. whether any lit pixel was
    /// turned off.
    pub fn draw_sprite(&mut self, sprite: &[u8], x: usize, y: usize) -> bool {
        let x = x % WIDTH;
        let y = y % HEIGHT;
        let mut collision = false;

        for (j, &row) in sprite.iter().enumerate() {
            if y + j >= HEIGHT {
                break;
            }
            for i in 0..SPRITE_WIDTH {
                if row & (0x80u8 >> i) != 0 && self.toggle((x + i) % WIDTH, y + j) {
                    collision = true;
                }
            }
        }

        self.needs_refresh = true;
        collision
    }

    /// Forces a refresh on the next call to `refresh`, even if no draw
    /// operation has been performed.
    pub fn force_refresh(&mut self) {
        self.needs_refresh = true;
    }

    /// Returns whether the display changed since it was last refreshed.
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Refreshes the display using the given refresh function.
    ///
    /// If a refresh is unnecessary, nothing will be done.  The refresh
    /// function receives a "snapshot" of the display, and should draw that to
    /// whatever user-facing display buffer is currently being used.
    pub fn refresh<F, E>(&mut self, f: F) -> Result<(), E>
    where
        F: FnOnce(&Self) -> Result<(), E>,
        E: Fail,
    {
        if self.needs_refresh {
            f(self)?;
            self.needs_refresh = false;
        }
        Ok(())
    }

    /// Flips the on/off state of the given pixel, returning whether it was
    /// flipped off from the on state.
    fn toggle(&mut self, x: usize, y: usize) -> bool {
        let old = self.data[x][y];
        self.data[x][y] = !old;
        old
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

/// Renders the screen as ASCII art, one line per row, with `#` for lit
/// pixels.
impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for y in 0..HEIGHT {
            let line: String = (0..WIDTH)
                .map(|x| if self.data[x][y] { '#' } else { ' ' })
                .collect();
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}
