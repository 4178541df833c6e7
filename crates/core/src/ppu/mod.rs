//! Reusable picture-processor helpers: tile pre-decoding and the master palette.

pub mod palette;
pub mod tile;

pub use palette::{mirror_index, resolve, MASTER_PALETTE};
pub use tile::{decode_tiles, Tile, TILES_PER_BANK, TILE_BYTES};
