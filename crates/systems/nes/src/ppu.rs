//! 2C02/2C07 picture processor.
//!
//! ## Timing
//!
//! The PPU is advanced in dots (three per CPU cycle on NTSC, 3.2 on PAL). A frame is
//! 341 dots by 262 scanlines (312 on PAL):
//!
//! - **0-239**: visible lines
//! - **240**: idle
//! - **241**: vblank starts at dot 1 (status flag, NMI if enabled, frame complete)
//! - **last line** (261/311): pre-render; flags cleared at dot 1, vertical scroll
//!   reloaded at dot 280, and on NTSC one dot skipped on odd frames when rendering
//!
//! ## Rendering model
//!
//! Pixels are produced in spans rather than one per dot. Each visible line keeps a
//! cursor (`line_x`) of how many pixels are done. The remainder of the line is drawn
//! at dot 256, and every register access that could change the picture first draws up
//! to the current dot ([`Ppu::trigger_rendering`]). Mid-frame palette, scroll and
//! bank changes therefore land on the right pixel, and a $2002 read sees the sprite 0
//! hit exactly when the beam has passed it.
//!
//! ## Memory
//!
//! `vram` is the full 16 KB PPU space. Pattern tables live at $0000-$1FFF, the four
//! physical nametables at `$2000 + n * $400`. Logical nametables resolve through the
//! mirroring table. Palette RAM is separate (32 bytes).

use crate::cartridge::Mirroring;
use crate::mappers::{Mapper, PatternMemory};
use crate::sinks::{SCREEN_HEIGHT, SCREEN_WIDTH};
use emu_core::apu::TimingMode;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::ppu::{decode_tiles, mirror_index, palette, Tile, TILES_PER_BANK, TILE_BYTES};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DOTS_PER_LINE: u16 = 341;
pub const VBLANK_LINE: u16 = 241;
pub const VRAM_LEN: usize = 0x4000;
pub const OAM_LEN: usize = 256;

const NTSC_LINES: u16 = 262;
const PATTERN_LEN: usize = 0x2000;
const TILE_COUNT: usize = 2 * TILES_PER_BANK;

// PPUCTRL
const CTRL_INCREMENT_32: u8 = 0x04;
const CTRL_SPRITE_TABLE: u8 = 0x08;
const CTRL_BG_TABLE: u8 = 0x10;
const CTRL_TALL_SPRITES: u8 = 0x20;
const CTRL_NMI: u8 = 0x80;

// PPUMASK
const MASK_GREYSCALE: u8 = 0x01;
const MASK_BG_LEFT: u8 = 0x02;
const MASK_SPRITES_LEFT: u8 = 0x04;
const MASK_BG: u8 = 0x08;
const MASK_SPRITES: u8 = 0x10;

// sprite line buffer entries: 0 = empty, else colour index | flags
const SPR_COLOR: u8 = 0x0F;
const SPR_BEHIND: u8 = 0x20;
const SPR_ZERO: u8 = 0x40;
const SPR_PRESENT: u8 = 0x80;

/// Per-sprite attributes decoded from OAM on every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpriteShadow {
    pub y: u8,
    pub tile: u8,
    pub palette: u8,
    pub behind_background: bool,
    pub flip_h: bool,
    pub flip_v: bool,
    pub x: u8,
}

impl SpriteShadow {
    fn from_oam(bytes: &[u8]) -> Self {
        let attr = bytes[2];
        Self {
            y: bytes[0],
            tile: bytes[1],
            palette: attr & 0x03,
            behind_background: attr & 0x20 != 0,
            flip_h: attr & 0x40 != 0,
            flip_v: attr & 0x80 != 0,
            x: bytes[3],
        }
    }
}

/// Registers and counters carried in save states. Memory blocks are saved separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpuState {
    pub ctrl: u8,
    pub mask: u8,
    pub vblank: bool,
    pub sprite_zero_hit: bool,
    pub sprite_overflow: bool,
    pub oam_addr: u8,
    pub v: u16,
    pub t: u16,
    pub fine_x: u8,
    pub w: bool,
    pub read_buffer: u8,
    pub open_bus: u8,
    pub scanline: u16,
    pub dot: u16,
    pub frame: u64,
    pub odd_frame: bool,
    pub mirroring: Mirroring,
    pub chr_writable: bool,
    pub palette: Vec<u8>,
    pub line_x: usize,
    pub tile_phase: u8,
    pub nmi_pending: bool,
    pub frame_complete: bool,
}

pub struct Ppu {
    pal: bool,
    lines_per_frame: u16,
    emphasis_enabled: bool,
    sprite_limit: bool,

    vram: Vec<u8>,
    oam: [u8; OAM_LEN],
    palette: [u8; 32],
    chr_writable: bool,
    mirroring: Mirroring,
    nametables: [usize; 4],

    ctrl: u8,
    mask: u8,
    vblank: bool,
    sprite_zero_hit: bool,
    sprite_overflow: bool,
    oam_addr: u8,
    v: u16,
    t: u16,
    fine_x: u8,
    w: bool,
    read_buffer: u8,
    open_bus: u8,

    scanline: u16,
    dot: u16,
    frame: u64,
    odd_frame: bool,
    nmi_pending: bool,
    frame_complete: bool,

    // derived caches
    tiles: Vec<Tile>,
    sprites: [SpriteShadow; 64],
    bg_colors: [u32; 16],
    sprite_colors: [u32; 16],

    // span renderer
    pixels: Vec<u32>,
    line_x: usize,
    tile_phase: u8,
    bg_row: [u8; 8],
    bg_palette: u8,
    bg_row_valid: bool,
    sprite_line: [u8; SCREEN_WIDTH],
    sprite_line_for: Option<u16>,
}

impl fmt::Debug for Ppu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ppu")
            .field("scanline", &self.scanline)
            .field("dot", &self.dot)
            .field("frame", &self.frame)
            .field("ctrl", &self.ctrl)
            .field("mask", &self.mask)
            .finish_non_exhaustive()
    }
}

impl Ppu {
    pub fn new(timing: TimingMode) -> Self {
        let mut ppu = Self {
            pal: timing == TimingMode::Pal,
            lines_per_frame: NTSC_LINES + timing.vblank_addend(),
            emphasis_enabled: true,
            sprite_limit: true,
            vram: vec![0; VRAM_LEN],
            oam: [0; OAM_LEN],
            palette: [0; 32],
            chr_writable: false,
            mirroring: Mirroring::Horizontal,
            nametables: Mirroring::Horizontal.tables(),
            ctrl: 0,
            mask: 0,
            vblank: false,
            sprite_zero_hit: false,
            sprite_overflow: false,
            oam_addr: 0,
            v: 0,
            t: 0,
            fine_x: 0,
            w: false,
            read_buffer: 0,
            open_bus: 0,
            scanline: 0,
            dot: 0,
            frame: 0,
            odd_frame: false,
            nmi_pending: false,
            frame_complete: false,
            tiles: vec![Tile::default(); TILE_COUNT],
            sprites: [SpriteShadow::default(); 64],
            bg_colors: [0; 16],
            sprite_colors: [0; 16],
            pixels: vec![0xFF00_0000; SCREEN_WIDTH * SCREEN_HEIGHT],
            line_x: 0,
            tile_phase: 0,
            bg_row: [0; 8],
            bg_palette: 0,
            bg_row_valid: false,
            sprite_line: [0; SCREEN_WIDTH],
            sprite_line_for: None,
        };
        ppu.rebuild_colors();
        ppu
    }

    pub fn set_emphasis_enabled(&mut self, enabled: bool) {
        self.emphasis_enabled = enabled;
        self.rebuild_colors();
    }

    pub fn set_sprite_limit(&mut self, limit: bool) {
        self.sprite_limit = limit;
    }

    /// Register and counter reset. Pattern memory (the cartridge's CHR) is kept;
    /// nametables, palette and OAM are cleared.
    pub fn reset(&mut self) {
        self.ctrl = 0;
        self.mask = 0;
        self.vblank = false;
        self.sprite_zero_hit = false;
        self.sprite_overflow = false;
        self.oam_addr = 0;
        self.v = 0;
        self.t = 0;
        self.fine_x = 0;
        self.w = false;
        self.read_buffer = 0;
        self.open_bus = 0;
        self.scanline = 0;
        self.dot = 0;
        self.frame = 0;
        self.odd_frame = false;
        self.nmi_pending = false;
        self.frame_complete = false;
        if let Some(nt) = self.vram.get_mut(PATTERN_LEN..) {
            nt.fill(0);
        }
        self.palette = [0; 32];
        self.oam = [0; OAM_LEN];
        self.sprites = [SpriteShadow::default(); 64];
        self.line_x = 0;
        self.bg_row_valid = false;
        self.sprite_line_for = None;
        self.rebuild_colors();
    }

    /// Release the large buffers. The PPU renders nothing and reads zero afterwards.
    pub fn destroy(&mut self) {
        self.vram = Vec::new();
        self.tiles = Vec::new();
        self.pixels = Vec::new();
        log(LogCategory::PPU, LogLevel::Debug, || {
            "PPU: buffers released".to_string()
        });
    }

    pub fn is_destroyed(&self) -> bool {
        self.vram.is_empty()
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn dot(&self) -> u16 {
        self.dot
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn lines_per_frame(&self) -> u16 {
        self.lines_per_frame
    }

    fn prerender_line(&self) -> u16 {
        self.lines_per_frame - 1
    }

    pub fn vblank(&self) -> bool {
        self.vblank
    }

    pub fn sprite_zero_hit(&self) -> bool {
        self.sprite_zero_hit
    }

    pub fn sprite_overflow(&self) -> bool {
        self.sprite_overflow
    }

    pub fn ctrl(&self) -> u8 {
        self.ctrl
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// Current (`v`) and temporary (`t`) VRAM addresses and fine X.
    pub fn scroll_registers(&self) -> (u16, u16, u8) {
        (self.v, self.t, self.fine_x)
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    pub fn oam(&self) -> &[u8; OAM_LEN] {
        &self.oam
    }

    pub fn palette_ram(&self) -> &[u8; 32] {
        &self.palette
    }

    pub fn sprite(&self, index: usize) -> SpriteShadow {
        self.sprites[index & 63]
    }

    pub fn tile(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    /// Background colour cache entry (palette * 4 + pixel), emphasis applied.
    pub fn background_color(&self, index: usize) -> u32 {
        self.bg_colors[index & 15]
    }

    pub fn sprite_color(&self, index: usize) -> u32 {
        self.sprite_colors[index & 15]
    }

    fn rendering_enabled(&self) -> bool {
        self.mask & (MASK_BG | MASK_SPRITES) != 0
    }

    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_pending)
    }

    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    // ---------------------------------------------------------------------
    // Memory
    // ---------------------------------------------------------------------

    /// Offset in `vram` for a nametable address ($2000-$3EFF).
    pub fn nametable_offset(&self, addr: u16) -> usize {
        let a = addr & 0x0FFF;
        let logical = (a >> 10) as usize;
        0x2000 + self.nametables[logical] * 0x400 + (a & 0x03FF) as usize
    }

    #[inline]
    fn vram_byte(&self, offset: usize) -> u8 {
        self.vram.get(offset).copied().unwrap_or(0)
    }

    fn read_nametable(&self, addr: u16) -> u8 {
        self.vram_byte(self.nametable_offset(addr))
    }

    fn ppu_read(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                mapper.latch_access(addr);
                self.vram_byte(addr as usize)
            }
            0x2000..=0x3EFF => self.read_nametable(addr),
            _ => self.palette[mirror_index(addr)],
        }
    }

    fn ppu_write(&mut self, addr: u16, val: u8) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                if !self.chr_writable {
                    return;
                }
                if let Some(b) = self.vram.get_mut(addr as usize) {
                    *b = val;
                }
                let tile = addr as usize / TILE_BYTES;
                let start = tile * TILE_BYTES;
                if let Some(data) = self.vram.get(start..start + TILE_BYTES) {
                    let decoded = Tile::decode(data);
                    if let Some(slot) = self.tiles.get_mut(tile) {
                        *slot = decoded;
                    }
                }
            }
            0x2000..=0x3EFF => {
                let offset = self.nametable_offset(addr);
                if let Some(b) = self.vram.get_mut(offset) {
                    *b = val;
                }
            }
            _ => {
                self.palette[mirror_index(addr)] = val & 0x3F;
                self.rebuild_colors();
            }
        }
    }

    fn rebuild_colors(&mut self) {
        let mask = if self.emphasis_enabled {
            self.mask
        } else {
            self.mask & MASK_GREYSCALE
        };
        let backdrop = palette::resolve(self.palette[0], mask, self.pal);
        for i in 0..16 {
            self.bg_colors[i] = if i % 4 == 0 {
                backdrop
            } else {
                palette::resolve(self.palette[i], mask, self.pal)
            };
            self.sprite_colors[i] = if i % 4 == 0 {
                backdrop
            } else {
                palette::resolve(self.palette[0x10 + i], mask, self.pal)
            };
        }
    }

    fn rebuild_tiles(&mut self) {
        if self.tiles.len() != TILE_COUNT || self.vram.len() < PATTERN_LEN {
            return;
        }
        decode_tiles(&self.vram[..PATTERN_LEN], &mut self.tiles);
    }

    fn rebuild_sprites(&mut self) {
        for (i, chunk) in self.oam.chunks(4).enumerate() {
            self.sprites[i] = SpriteShadow::from_oam(chunk);
        }
    }

    fn write_oam(&mut self, val: u8) {
        let addr = self.oam_addr as usize;
        self.oam[addr] = val;
        let base = addr & !3;
        self.sprites[addr / 4] = SpriteShadow::from_oam(&self.oam[base..base + 4]);
        self.oam_addr = self.oam_addr.wrapping_add(1);
    }

    /// $4014 transfer: 256 bytes written through OAMDATA.
    pub fn oam_dma(&mut self, page: &[u8; 256], mapper: &mut dyn Mapper) {
        self.trigger_rendering(mapper);
        for &b in page.iter() {
            self.write_oam(b);
        }
    }

    // ---------------------------------------------------------------------
    // CPU registers
    // ---------------------------------------------------------------------

    /// Read register `reg` ($2000 + reg, reg in 0..8).
    pub fn read_register(&mut self, reg: u16, mapper: &mut dyn Mapper) -> u8 {
        let value = match reg & 7 {
            2 => {
                self.trigger_rendering(mapper);
                let mut status = self.open_bus & 0x1F;
                if self.vblank {
                    status |= 0x80;
                }
                if self.sprite_zero_hit {
                    status |= 0x40;
                }
                if self.sprite_overflow {
                    status |= 0x20;
                }
                self.vblank = false;
                self.w = false;
                status
            }
            4 => {
                let v = self.oam[self.oam_addr as usize];
                if self.oam_addr & 3 == 2 {
                    v & 0xE3
                } else {
                    v
                }
            }
            7 => {
                let addr = self.v & 0x3FFF;
                let value = if addr >= 0x3F00 {
                    // palette reads bypass the buffer, which takes the nametable byte below
                    self.read_buffer = self.read_nametable(addr - 0x1000);
                    let mut p = self.palette[mirror_index(addr)];
                    if self.mask & MASK_GREYSCALE != 0 {
                        p &= 0x30;
                    }
                    (p & 0x3F) | (self.open_bus & 0xC0)
                } else {
                    let buffered = self.read_buffer;
                    self.read_buffer = self.ppu_read(addr, mapper);
                    buffered
                };
                self.increment_v();
                value
            }
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    pub fn write_register(&mut self, reg: u16, val: u8, mapper: &mut dyn Mapper) {
        self.open_bus = val;
        match reg & 7 {
            0 => {
                self.trigger_rendering(mapper);
                let was_enabled = self.ctrl & CTRL_NMI != 0;
                self.ctrl = val;
                self.t = (self.t & 0xF3FF) | (((val & 0x03) as u16) << 10);
                if !was_enabled && val & CTRL_NMI != 0 && self.vblank {
                    self.nmi_pending = true;
                }
            }
            1 => {
                self.trigger_rendering(mapper);
                self.mask = val;
                self.rebuild_colors();
            }
            3 => self.oam_addr = val,
            4 => {
                self.trigger_rendering(mapper);
                self.write_oam(val);
            }
            5 => {
                self.trigger_rendering(mapper);
                if !self.w {
                    self.t = (self.t & !0x001F) | (val >> 3) as u16;
                    self.fine_x = val & 0x07;
                } else {
                    self.t = (self.t & 0x8C1F)
                        | (((val & 0x07) as u16) << 12)
                        | (((val & 0xF8) as u16) << 2);
                }
                self.w = !self.w;
            }
            6 => {
                self.trigger_rendering(mapper);
                if !self.w {
                    self.t = (self.t & 0x00FF) | (((val & 0x3F) as u16) << 8);
                } else {
                    self.t = (self.t & 0xFF00) | val as u16;
                    self.v = self.t;
                    self.bg_row_valid = false;
                }
                self.w = !self.w;
            }
            7 => {
                self.trigger_rendering(mapper);
                self.ppu_write(self.v, val);
                self.increment_v();
            }
            _ => {}
        }
    }

    fn increment_v(&mut self) {
        let step = if self.ctrl & CTRL_INCREMENT_32 != 0 {
            32
        } else {
            1
        };
        self.v = self.v.wrapping_add(step) & 0x7FFF;
    }

    // ---------------------------------------------------------------------
    // Scroll counters
    // ---------------------------------------------------------------------

    fn increment_coarse_x(&mut self) {
        if self.v & 0x001F == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v += 1;
        }
    }

    fn increment_y(&mut self) {
        if self.v & 0x7000 != 0x7000 {
            self.v += 0x1000;
            return;
        }
        self.v &= !0x7000;
        let mut coarse_y = (self.v & 0x03E0) >> 5;
        if coarse_y == 29 {
            coarse_y = 0;
            self.v ^= 0x0800;
        } else if coarse_y == 31 {
            coarse_y = 0;
        } else {
            coarse_y += 1;
        }
        self.v = (self.v & !0x03E0) | (coarse_y << 5);
    }

    fn copy_x(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
        self.bg_row_valid = false;
    }

    fn copy_y(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
        self.bg_row_valid = false;
    }

    // ---------------------------------------------------------------------
    // Timing
    // ---------------------------------------------------------------------

    /// Advance `dots` PPU clocks. Returns `true` when the mapper asked for an IRQ.
    pub fn tick(&mut self, dots: u32, mapper: &mut dyn Mapper) -> bool {
        let mut irq = false;
        for _ in 0..dots {
            irq |= self.step_dot(mapper);
        }
        irq
    }

    fn step_dot(&mut self, mapper: &mut dyn Mapper) -> bool {
        self.dot += 1;
        let prerender = self.prerender_line();

        if self.dot == DOTS_PER_LINE - 1
            && self.scanline == prerender
            && self.odd_frame
            && !self.pal
            && self.rendering_enabled()
        {
            self.dot = DOTS_PER_LINE;
        }
        if self.dot >= DOTS_PER_LINE {
            self.dot = 0;
            self.next_scanline();
            return false;
        }

        let visible = (self.scanline as usize) < SCREEN_HEIGHT;
        let rendering = self.rendering_enabled();
        let mut irq = false;

        match self.dot {
            1 if self.scanline == VBLANK_LINE => {
                self.vblank = true;
                self.frame_complete = true;
                if self.ctrl & CTRL_NMI != 0 {
                    self.nmi_pending = true;
                }
                log(LogCategory::PPU, LogLevel::Trace, || {
                    format!("PPU: vblank, frame {}", self.frame)
                });
            }
            1 if self.scanline == prerender => {
                self.vblank = false;
                self.sprite_zero_hit = false;
                self.sprite_overflow = false;
            }
            256 if visible => {
                self.render_to(SCREEN_WIDTH, mapper);
                if rendering {
                    self.increment_y();
                }
            }
            257 if rendering && (visible || self.scanline == prerender) => self.copy_x(),
            260 if rendering && (visible || self.scanline == prerender) => {
                irq = mapper.clock_irq_counter();
            }
            280 if rendering && self.scanline == prerender => self.copy_y(),
            _ => {}
        }
        irq
    }

    fn next_scanline(&mut self) {
        self.scanline += 1;
        self.line_x = 0;
        if self.scanline >= self.lines_per_frame {
            self.scanline = 0;
            self.frame += 1;
            self.odd_frame = !self.odd_frame;
        }
    }

    // ---------------------------------------------------------------------
    // Rendering
    // ---------------------------------------------------------------------

    /// Draw the current line up to the beam position before state changes.
    pub fn trigger_rendering(&mut self, mapper: &mut dyn Mapper) {
        if (self.scanline as usize) < SCREEN_HEIGHT {
            let target = (self.dot as usize).min(SCREEN_WIDTH);
            self.render_to(target, mapper);
        }
    }

    fn fetch_bg_tile(&mut self, mapper: &mut dyn Mapper) {
        let v = self.v;
        let tile_index = self.read_nametable(0x2000 | (v & 0x0FFF)) as usize;
        let attr_addr = 0x23C0 | (v & 0x0C00) | ((v >> 4) & 0x38) | ((v >> 2) & 0x07);
        let attr = self.read_nametable(attr_addr);
        let shift = ((v >> 4) & 0x04) | (v & 0x02);
        self.bg_palette = (attr >> shift) & 0x03;

        let fine_y = ((v >> 12) & 0x07) as usize;
        let bank = ((self.ctrl & CTRL_BG_TABLE) >> 4) as usize;
        let id = bank * TILES_PER_BANK + tile_index;
        mapper.latch_access((id * TILE_BYTES + fine_y) as u16);
        match self.tiles.get(id) {
            Some(tile) => self.bg_row.copy_from_slice(tile.row(fine_y)),
            None => self.bg_row = [0; 8],
        }
        self.bg_row_valid = true;
    }

    fn evaluate_sprites(&mut self, mapper: &mut dyn Mapper) {
        self.sprite_line = [0; SCREEN_WIDTH];
        self.sprite_line_for = Some(self.scanline);
        if !self.rendering_enabled() {
            return;
        }

        let line = self.scanline as i32;
        let tall = self.ctrl & CTRL_TALL_SPRITES != 0;
        let height = if tall { 16 } else { 8 };
        let table = ((self.ctrl & CTRL_SPRITE_TABLE) >> 3) as usize;
        let mut found = 0;

        for i in 0..64 {
            let s = self.sprites[i];
            let row = line - (s.y as i32 + 1);
            if !(0..height).contains(&row) {
                continue;
            }
            found += 1;
            if found > 8 {
                self.sprite_overflow = true;
                if self.sprite_limit {
                    break;
                }
            }

            let row = (if s.flip_v { height - 1 - row } else { row }) as usize;
            let id = if tall {
                let bank = (s.tile & 1) as usize;
                bank * TILES_PER_BANK + (s.tile & 0xFE) as usize + row / 8
            } else {
                table * TILES_PER_BANK + s.tile as usize
            };
            mapper.latch_access((id * TILE_BYTES + (row & 7)) as u16);

            let Some(tile) = self.tiles.get(id) else {
                continue;
            };
            if tile.row_is_transparent(row) {
                continue;
            }
            let pixels = tile.row(row);
            let mut flags = SPR_PRESENT | (s.palette << 2);
            if s.behind_background {
                flags |= SPR_BEHIND;
            }
            if i == 0 {
                flags |= SPR_ZERO;
            }
            for px in 0..8 {
                let sx = s.x as usize + px;
                if sx >= SCREEN_WIDTH {
                    break;
                }
                let p = pixels[if s.flip_h { 7 - px } else { px }];
                if p == 0 || self.sprite_line[sx] != 0 {
                    continue;
                }
                self.sprite_line[sx] = flags | p;
            }
        }
    }

    fn render_to(&mut self, end: usize, mapper: &mut dyn Mapper) {
        let end = end.min(SCREEN_WIDTH);
        if self.line_x >= end || (self.scanline as usize) >= SCREEN_HEIGHT {
            return;
        }
        if self.sprite_line_for != Some(self.scanline) {
            self.evaluate_sprites(mapper);
        }
        if self.line_x == 0 {
            self.tile_phase = self.fine_x;
            self.bg_row_valid = false;
        }

        let rendering = self.rendering_enabled();
        let show_bg = self.mask & MASK_BG != 0;
        let show_sprites = self.mask & MASK_SPRITES != 0;
        let row_start = self.scanline as usize * SCREEN_WIDTH;

        for x in self.line_x..end {
            let mut bg = 0u8;
            if rendering {
                if !self.bg_row_valid {
                    self.fetch_bg_tile(mapper);
                }
                if show_bg && (x >= 8 || self.mask & MASK_BG_LEFT != 0) {
                    let p = self.bg_row[self.tile_phase as usize];
                    if p != 0 {
                        bg = (self.bg_palette << 2) | p;
                    }
                }
                self.tile_phase += 1;
                if self.tile_phase == 8 {
                    self.tile_phase = 0;
                    self.increment_coarse_x();
                    self.bg_row_valid = false;
                }
            }

            let mut color = self.bg_colors[bg as usize];
            let spr = self.sprite_line[x];
            if show_sprites && spr != 0 && (x >= 8 || self.mask & MASK_SPRITES_LEFT != 0) {
                if spr & SPR_ZERO != 0 && bg != 0 && x != 255 {
                    self.sprite_zero_hit = true;
                }
                if bg == 0 || spr & SPR_BEHIND == 0 {
                    color = self.sprite_colors[(spr & SPR_COLOR) as usize];
                }
            }

            if let Some(px) = self.pixels.get_mut(row_start + x) {
                *px = color;
            }
        }
        self.line_x = end;
    }

    // ---------------------------------------------------------------------
    // Save states
    // ---------------------------------------------------------------------

    pub fn snapshot(&self) -> PpuState {
        PpuState {
            ctrl: self.ctrl,
            mask: self.mask,
            vblank: self.vblank,
            sprite_zero_hit: self.sprite_zero_hit,
            sprite_overflow: self.sprite_overflow,
            oam_addr: self.oam_addr,
            v: self.v,
            t: self.t,
            fine_x: self.fine_x,
            w: self.w,
            read_buffer: self.read_buffer,
            open_bus: self.open_bus,
            scanline: self.scanline,
            dot: self.dot,
            frame: self.frame,
            odd_frame: self.odd_frame,
            mirroring: self.mirroring,
            chr_writable: self.chr_writable,
            palette: self.palette.to_vec(),
            line_x: self.line_x,
            tile_phase: self.tile_phase,
            nmi_pending: self.nmi_pending,
            frame_complete: self.frame_complete,
        }
    }

    /// Restore registers and memory. Block sizes must already be validated.
    pub fn restore(&mut self, state: &PpuState, vram: &[u8], oam: &[u8]) {
        self.ctrl = state.ctrl;
        self.mask = state.mask;
        self.vblank = state.vblank;
        self.sprite_zero_hit = state.sprite_zero_hit;
        self.sprite_overflow = state.sprite_overflow;
        self.oam_addr = state.oam_addr;
        self.v = state.v;
        self.t = state.t;
        self.fine_x = state.fine_x;
        self.w = state.w;
        self.read_buffer = state.read_buffer;
        self.open_bus = state.open_bus;
        self.scanline = state.scanline;
        self.dot = state.dot;
        self.frame = state.frame;
        self.odd_frame = state.odd_frame;
        self.set_mirroring(state.mirroring);
        self.chr_writable = state.chr_writable;
        for (dst, src) in self.palette.iter_mut().zip(&state.palette) {
            *dst = *src;
        }
        self.line_x = state.line_x;
        self.tile_phase = state.tile_phase;
        self.nmi_pending = state.nmi_pending;
        self.frame_complete = state.frame_complete;

        if self.vram.len() != VRAM_LEN {
            self.vram = vec![0; VRAM_LEN];
            self.tiles = vec![Tile::default(); TILE_COUNT];
            self.pixels = vec![0xFF00_0000; SCREEN_WIDTH * SCREEN_HEIGHT];
        }
        let n = vram.len().min(VRAM_LEN);
        self.vram[..n].copy_from_slice(&vram[..n]);
        let n = oam.len().min(OAM_LEN);
        self.oam[..n].copy_from_slice(&oam[..n]);

        self.rebuild_tiles();
        self.rebuild_sprites();
        self.rebuild_colors();
        self.bg_row_valid = false;
        self.sprite_line_for = None;
    }
}

impl PatternMemory for Ppu {
    fn load_pattern_bank(&mut self, slot: usize, data: &[u8]) {
        let start = (slot & 1) * 0x1000;
        let Some(dst) = self.vram.get_mut(start..start + 0x1000) else {
            return;
        };
        let n = data.len().min(0x1000);
        dst[..n].copy_from_slice(&data[..n]);
        let first = (slot & 1) * TILES_PER_BANK;
        if let Some(tiles) = self.tiles.get_mut(first..first + TILES_PER_BANK) {
            decode_tiles(&self.vram[start..start + 0x1000], tiles);
        }
        self.bg_row_valid = false;
    }

    fn enable_chr_ram(&mut self) {
        self.chr_writable = true;
        if let Some(pattern) = self.vram.get_mut(..PATTERN_LEN) {
            pattern.fill(0);
        }
        self.rebuild_tiles();
    }

    fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.mirroring = mirroring;
        self.nametables = mirroring.tables();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::Nrom;

    fn ppu() -> (Ppu, Nrom) {
        (Ppu::new(TimingMode::Ntsc), Nrom::empty())
    }

    fn set_addr(ppu: &mut Ppu, m: &mut Nrom, addr: u16) {
        ppu.write_register(6, (addr >> 8) as u8, m);
        ppu.write_register(6, addr as u8, m);
    }

    fn run_to(ppu: &mut Ppu, m: &mut Nrom, scanline: u16, dot: u16) {
        while !(ppu.scanline() == scanline && ppu.dot() == dot) {
            ppu.tick(1, m);
        }
    }

    #[test]
    fn test_vblank_and_nmi_at_241() {
        let (mut ppu, mut m) = ppu();
        ppu.write_register(0, CTRL_NMI, &mut m);
        run_to(&mut ppu, &mut m, VBLANK_LINE, 0);
        assert!(!ppu.vblank());
        ppu.tick(1, &mut m);
        assert!(ppu.vblank());
        assert!(ppu.take_nmi());
        assert!(ppu.take_frame_complete());
        assert!(!ppu.take_nmi());
    }

    #[test]
    fn test_prerender_clears_flags() {
        let (mut ppu, mut m) = ppu();
        run_to(&mut ppu, &mut m, VBLANK_LINE, 1);
        ppu.sprite_zero_hit = true;
        run_to(&mut ppu, &mut m, 261, 1);
        assert!(!ppu.vblank());
        assert!(!ppu.sprite_zero_hit());
    }

    #[test]
    fn test_frame_length_ntsc_and_pal() {
        let (mut ppu, mut m) = ppu();
        ppu.tick(341 * 262, &mut m);
        assert_eq!((ppu.frame(), ppu.scanline(), ppu.dot()), (1, 0, 0));

        let mut pal = Ppu::new(TimingMode::Pal);
        assert_eq!(pal.lines_per_frame(), 312);
        pal.tick(341 * 312, &mut m);
        assert_eq!((pal.frame(), pal.scanline()), (1, 0));
    }

    #[test]
    fn test_odd_frame_skips_a_dot_when_rendering() {
        let (mut ppu, mut m) = ppu();
        ppu.write_register(1, MASK_BG, &mut m);
        ppu.tick(341 * 262, &mut m);
        assert_eq!(ppu.frame(), 1);
        // frame 1 is odd: one dot shorter
        ppu.tick(341 * 262 - 1, &mut m);
        assert_eq!((ppu.frame(), ppu.scanline(), ppu.dot()), (2, 0, 0));
    }

    #[test]
    fn test_status_read_clears_vblank_and_latch() {
        let (mut ppu, mut m) = ppu();
        run_to(&mut ppu, &mut m, VBLANK_LINE, 1);
        ppu.write_register(6, 0x21, &mut m);
        let status = ppu.read_register(2, &mut m);
        assert_eq!(status & 0x80, 0x80);
        assert!(!ppu.vblank());
        // latch was reset, so this is a high byte again
        set_addr(&mut ppu, &mut m, 0x2400);
        assert_eq!(ppu.scroll_registers().0, 0x2400);
    }

    #[test]
    fn test_enabling_nmi_during_vblank_fires() {
        let (mut ppu, mut m) = ppu();
        run_to(&mut ppu, &mut m, VBLANK_LINE, 5);
        assert!(!ppu.take_nmi());
        ppu.write_register(0, CTRL_NMI, &mut m);
        assert!(ppu.take_nmi());
    }

    #[test]
    fn test_buffered_vram_reads() {
        let (mut ppu, mut m) = ppu();
        set_addr(&mut ppu, &mut m, 0x2000);
        ppu.write_register(7, 0x11, &mut m);
        ppu.write_register(7, 0x22, &mut m);
        set_addr(&mut ppu, &mut m, 0x2000);
        let _stale = ppu.read_register(7, &mut m);
        assert_eq!(ppu.read_register(7, &mut m), 0x11);
        assert_eq!(ppu.read_register(7, &mut m), 0x22);
    }

    #[test]
    fn test_palette_reads_are_immediate_and_mirrored() {
        let (mut ppu, mut m) = ppu();
        set_addr(&mut ppu, &mut m, 0x3F10);
        ppu.write_register(7, 0x2A, &mut m);
        set_addr(&mut ppu, &mut m, 0x3F00);
        assert_eq!(ppu.read_register(7, &mut m) & 0x3F, 0x2A);
        assert_eq!(ppu.palette_ram()[0x10], 0);
        assert_eq!(ppu.background_color(0), master(0x2A));
        assert_eq!(ppu.background_color(4), ppu.background_color(0));
        assert_eq!(ppu.sprite_color(8), ppu.background_color(0));
    }

    fn master(i: usize) -> u32 {
        emu_core::ppu::MASTER_PALETTE[i]
    }

    #[test]
    fn test_increment_32() {
        let (mut ppu, mut m) = ppu();
        ppu.write_register(0, CTRL_INCREMENT_32, &mut m);
        set_addr(&mut ppu, &mut m, 0x2000);
        ppu.write_register(7, 1, &mut m);
        assert_eq!(ppu.scroll_registers().0, 0x2020);
    }

    #[test]
    fn test_scroll_writes_fill_t_and_fine_x() {
        let (mut ppu, mut m) = ppu();
        ppu.write_register(5, 0x7D, &mut m); // coarse X 15, fine X 5
        ppu.write_register(5, 0x5E, &mut m); // coarse Y 11, fine Y 6
        let (_, t, fine_x) = ppu.scroll_registers();
        assert_eq!(fine_x, 5);
        assert_eq!(t & 0x1F, 15);
        assert_eq!((t >> 5) & 0x1F, 11);
        assert_eq!(t >> 12, 6);
    }

    #[test]
    fn test_nametable_mirroring_tables() {
        let (mut ppu, _) = ppu();
        let cases = [
            (Mirroring::Horizontal, [0, 0, 1, 1]),
            (Mirroring::Vertical, [0, 1, 0, 1]),
            (Mirroring::FourScreen, [0, 1, 2, 3]),
            (Mirroring::SingleScreenLower, [0, 0, 0, 0]),
            (Mirroring::SingleScreenUpper, [1, 1, 1, 1]),
        ];
        for (mode, tables) in cases {
            ppu.set_mirroring(mode);
            for (logical, physical) in tables.iter().enumerate() {
                let addr = 0x2000 + logical as u16 * 0x400 + 0x123;
                assert_eq!(ppu.nametable_offset(addr), 0x2000 + physical * 0x400 + 0x123);
                // $3000-$3EFF mirrors $2000-$2EFF
                assert_eq!(ppu.nametable_offset(addr + 0x1000), ppu.nametable_offset(addr));
            }
        }
    }

    #[test]
    fn test_chr_ram_write_redecodes_tile() {
        let (mut ppu, mut m) = ppu();
        ppu.enable_chr_ram();
        set_addr(&mut ppu, &mut m, 0x0010); // tile 1, row 0, low plane
        ppu.write_register(7, 0x80, &mut m);
        assert_eq!(ppu.tile(1).map(|t| t.pixel(0, 0)), Some(1));
    }

    #[test]
    fn test_chr_rom_is_read_only() {
        let (mut ppu, mut m) = ppu();
        ppu.load_pattern_bank(0, &[0xFF; 0x1000]);
        set_addr(&mut ppu, &mut m, 0x0000);
        ppu.write_register(7, 0x00, &mut m);
        assert_eq!(ppu.vram()[0], 0xFF);
        assert_eq!(ppu.tile(0).map(|t| t.pixel(0, 0)), Some(3));
    }

    #[test]
    fn test_oam_write_updates_shadow() {
        let (mut ppu, mut m) = ppu();
        ppu.write_register(3, 4, &mut m);
        for b in [0x20, 0x05, 0xC1, 0x40] {
            ppu.write_register(4, b, &mut m);
        }
        let s = ppu.sprite(1);
        assert_eq!((s.y, s.tile, s.x, s.palette), (0x20, 0x05, 0x40, 1));
        assert!(s.flip_h && s.flip_v && !s.behind_background);
    }

    /// Tile 1 is solid colour 1 in both pattern tables. The background is all tile 1
    /// and sprite 0 sits at (x, y) using tile 1.
    fn sprite_zero_scene(x: u8, y: u8) -> (Ppu, Nrom) {
        let (mut ppu, mut m) = ppu();
        let mut bank = vec![0u8; 0x1000];
        for b in &mut bank[16..24] {
            *b = 0xFF;
        }
        ppu.load_pattern_bank(0, &bank);
        ppu.load_pattern_bank(1, &bank);
        set_addr(&mut ppu, &mut m, 0x2000);
        for _ in 0..960 {
            ppu.write_register(7, 1, &mut m);
        }
        ppu.write_register(3, 0, &mut m);
        for b in [y, 1, 0, x] {
            ppu.write_register(4, b, &mut m);
        }
        set_addr(&mut ppu, &mut m, 0x0000);
        ppu.write_register(1, MASK_BG | MASK_SPRITES | MASK_BG_LEFT | MASK_SPRITES_LEFT, &mut m);
        (ppu, m)
    }

    #[test]
    fn test_sprite_zero_hit_is_pixel_accurate() {
        let (mut ppu, mut m) = sprite_zero_scene(100, 49);
        // sprite covers lines 50-57, columns 100-107: pixel 100 is output at dot 101
        run_to(&mut ppu, &mut m, 50, 100);
        assert_eq!(ppu.read_register(2, &mut m) & 0x40, 0);
        ppu.tick(1, &mut m);
        assert_eq!(ppu.read_register(2, &mut m) & 0x40, 0x40);
    }

    #[test]
    fn test_no_sprite_zero_hit_at_x_255() {
        let (mut ppu, mut m) = sprite_zero_scene(255, 49);
        run_to(&mut ppu, &mut m, 60, 0);
        assert!(!ppu.sprite_zero_hit());
    }

    #[test]
    fn test_sprite_overflow_flag() {
        let (mut ppu, mut m) = ppu();
        ppu.write_register(3, 0, &mut m);
        for i in 0..9u8 {
            for b in [30, 0, 0, i * 10] {
                ppu.write_register(4, b, &mut m);
            }
        }
        for _ in 9..64 {
            for b in [0xFF, 0, 0, 0] {
                ppu.write_register(4, b, &mut m);
            }
        }
        ppu.write_register(1, MASK_SPRITES, &mut m);
        run_to(&mut ppu, &mut m, 32, 0);
        assert!(ppu.sprite_overflow());
    }

    #[test]
    fn test_backdrop_when_rendering_disabled() {
        let (mut ppu, mut m) = ppu();
        set_addr(&mut ppu, &mut m, 0x3F00);
        ppu.write_register(7, 0x21, &mut m);
        run_to(&mut ppu, &mut m, VBLANK_LINE, 1);
        assert!(ppu.pixels().iter().all(|&p| p == master(0x21)));
    }

    #[test]
    fn test_mid_frame_palette_change_splits_screen() {
        let (mut ppu, mut m) = ppu();
        set_addr(&mut ppu, &mut m, 0x3F00);
        ppu.write_register(7, 0x01, &mut m);
        run_to(&mut ppu, &mut m, 120, 0);
        set_addr(&mut ppu, &mut m, 0x3F00);
        ppu.write_register(7, 0x02, &mut m);
        run_to(&mut ppu, &mut m, VBLANK_LINE, 1);
        assert_eq!(ppu.pixels()[0], master(0x01));
        assert_eq!(ppu.pixels()[119 * SCREEN_WIDTH], master(0x01));
        assert_eq!(ppu.pixels()[121 * SCREEN_WIDTH], master(0x02));
    }

    #[test]
    fn test_left_column_clipping() {
        let (mut ppu, mut m) = sprite_zero_scene(0, 9);
        set_addr(&mut ppu, &mut m, 0x3F00);
        ppu.write_register(7, 0x0F, &mut m);
        ppu.write_register(7, 0x16, &mut m);
        set_addr(&mut ppu, &mut m, 0x0000);
        ppu.write_register(1, MASK_BG, &mut m);
        run_to(&mut ppu, &mut m, VBLANK_LINE, 1);
        assert_eq!(ppu.pixels()[0], master(0x0F));
        assert_eq!(ppu.pixels()[8], master(0x16));
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let (mut ppu, mut m) = sprite_zero_scene(10, 10);
        run_to(&mut ppu, &mut m, 100, 123);
        let state = ppu.snapshot();
        let vram = ppu.vram().to_vec();
        let oam = ppu.oam().to_vec();

        let mut other = Ppu::new(TimingMode::Ntsc);
        other.restore(&state, &vram, &oam);
        assert_eq!(other.snapshot(), state);
        assert_eq!(other.tile(1), ppu.tile(1));
        assert_eq!(other.sprite(0), ppu.sprite(0));
        assert_eq!(other.background_color(1), ppu.background_color(1));
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let (mut ppu, mut m) = ppu();
        ppu.destroy();
        assert!(ppu.is_destroyed());
        assert!(ppu.pixels().is_empty());
        // still safe to drive
        ppu.tick(341 * 262, &mut m);
        set_addr(&mut ppu, &mut m, 0x2000);
        assert_eq!(ppu.read_register(7, &mut m), 0);
    }
}
