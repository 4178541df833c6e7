//! Pre-decoded 2bpp planar tiles.
//!
//! Pattern memory stores each 8x8 tile as 16 bytes: eight bytes of the low bitplane
//! followed by eight bytes of the high bitplane. Decoding every tile once (when a bank
//! is loaded or swapped) turns the per-pixel inner loop of the renderer into a plain
//! array lookup.
//!
//! Each decoded tile also keeps a per-row bitmask so sprite evaluation can skip rows
//! that are fully transparent.

/// Bytes per encoded tile.
pub const TILE_BYTES: usize = 16;

/// Tiles in one 4 KB pattern bank.
pub const TILES_PER_BANK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Colour indices 0-3, row-major
    pixels: [u8; 64],
    /// Bit `y` set: row `y` has at least one non-zero pixel
    any_opaque: u8,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            pixels: [0; 64],
            any_opaque: 0,
        }
    }
}

impl Tile {
    /// Decode one tile. Short input decodes the missing bytes as zero.
    pub fn decode(data: &[u8]) -> Self {
        let byte = |i: usize| data.get(i).copied().unwrap_or(0);
        let mut tile = Tile::default();
        for y in 0..8 {
            let lo = byte(y);
            let hi = byte(y + 8);
            if lo | hi != 0 {
                tile.any_opaque |= 1 << y;
            }
            for x in 0..8 {
                let bit = 7 - x;
                tile.pixels[y * 8 + x] = ((lo >> bit) & 1) | (((hi >> bit) & 1) << 1);
            }
        }
        tile
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[(y & 7) * 8 + (x & 7)]
    }

    /// The eight colour indices of row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        let start = (y & 7) * 8;
        &self.pixels[start..start + 8]
    }

    #[inline]
    pub fn row_is_transparent(&self, y: usize) -> bool {
        self.any_opaque & (1 << (y & 7)) == 0
    }
}

/// Decode a run of pattern memory into `out`, one tile per 16 bytes.
pub fn decode_tiles(data: &[u8], out: &mut [Tile]) {
    for (tile, chunk) in out.iter_mut().zip(data.chunks(TILE_BYTES)) {
        *tile = Tile::decode(chunk);
    }
}
