//! 64-entry master palette and colour emphasis.
//!
//! Palette RAM holds 6-bit indices into the master palette. The final colour of a
//! pixel also depends on two PPUMASK features:
//!
//! - **Greyscale** (bit 0): the index is masked with `$30`, leaving only the grey column.
//! - **Emphasis** (bits 5-7): each set bit darkens the two colour channels it does not
//!   name. On the 2C02 the bits are red, green, blue; the PAL 2C07 swaps red and green.

/// 2C02 master palette, packed as 0xFFRRGGBB.
pub const MASTER_PALETTE: [u32; 64] = [
    0xFF545454, 0xFF001E74, 0xFF081090, 0xFF300088, 0xFF440064, 0xFF5C0030, 0xFF540400, 0xFF3C1800,
    0xFF202A00, 0xFF083A00, 0xFF004000, 0xFF003C00, 0xFF00323C, 0xFF000000, 0xFF000000, 0xFF000000,
    0xFF989698, 0xFF084CC4, 0xFF3032EC, 0xFF5C1EE4, 0xFF8814B0, 0xFFA01464, 0xFF982220, 0xFF783C00,
    0xFF545A00, 0xFF287200, 0xFF087C00, 0xFF007628, 0xFF006678, 0xFF000000, 0xFF000000, 0xFF000000,
    0xFFECEEEC, 0xFF4C9AEC, 0xFF787CEC, 0xFFB062EC, 0xFFE454EC, 0xFFEC58B4, 0xFFEC6A64, 0xFFD48820,
    0xFFA0AA00, 0xFF74C400, 0xFF4CD020, 0xFF38CC6C, 0xFF38B4CC, 0xFF3C3C3C, 0xFF000000, 0xFF000000,
    0xFFECEEEC, 0xFFA8CCEC, 0xFFBCBCEC, 0xFFD4B2EC, 0xFFECAEEC, 0xFFECAED4, 0xFFECC4B0, 0xFFE4D4A0,
    0xFFCCDCA0, 0xFFB4E4A0, 0xFFA8E4B4, 0xFFA0E4CC, 0xFFA0D4E4, 0xFFA0A2A0, 0xFF000000, 0xFF000000,
];

/// Attenuation applied to non-emphasised channels, in 1/256 units (~0.816).
const EMPHASIS_ATTENUATION: u32 = 209;

/// Map a palette RAM address (`$3F00-$3FFF`, or any offset) to its slot in the
/// 32-byte palette. Sprite colour 0 entries alias the background ones.
#[inline]
pub fn mirror_index(addr: u16) -> usize {
    match (addr & 0x1F) as usize {
        0x10 => 0x00,
        0x14 => 0x04,
        0x18 => 0x08,
        0x1C => 0x0C,
        v => v,
    }
}

/// Resolve a 6-bit palette entry into an ARGB colour under the given PPUMASK.
///
/// `pal_order` selects the 2C07 emphasis bit order.
pub fn resolve(entry: u8, mask: u8, pal_order: bool) -> u32 {
    let index = if mask & 0x01 != 0 {
        entry & 0x30
    } else {
        entry & 0x3F
    };
    emphasize(MASTER_PALETTE[index as usize], mask >> 5, pal_order)
}

/// Apply the three emphasis bits (`BGR` order in the low bits) to a colour.
pub fn emphasize(color: u32, emphasis: u8, pal_order: bool) -> u32 {
    let emphasis = emphasis & 0x07;
    if emphasis == 0 {
        return color;
    }
    let (mut red, mut green) = (emphasis & 0x01 != 0, emphasis & 0x02 != 0);
    if pal_order {
        std::mem::swap(&mut red, &mut green);
    }
    let blue = emphasis & 0x04 != 0;

    let scale = |channel: u32, keep: bool| -> u32 {
        if keep {
            channel
        } else {
            channel * EMPHASIS_ATTENUATION / 256
        }
    };
    let r = scale((color >> 16) & 0xFF, red);
    let g = scale((color >> 8) & 0xFF, green);
    let b = scale(color & 0xFF, blue);
    0xFF00_0000 | (r << 16) | (g << 8) | b
}
