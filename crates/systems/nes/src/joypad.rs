//! Standard controller shift reader ($4016/$4017).
//!
//! Writing 1 then 0 to $4016 restarts both readers. Each subsequent read returns one
//! bit in bit 0:
//!
//! | reads | value                                       |
//! |-------|---------------------------------------------|
//! | 1-8   | A, B, Select, Start, Up, Down, Left, Right  |
//! | 9-19  | 0                                           |
//! | 20    | 1 (signature bit)                           |
//! | 21-24 | 0                                           |
//!
//! After 24 reads the sequence starts over. While the strobe is held high every read
//! returns the live state of A.

use crate::sinks::InputSource;
use serde::{Deserialize, Serialize};

/// Reads per cycle of the shift sequence.
pub const SEQUENCE_LEN: u8 = 24;
/// Zero-based read index that returns the signature bit.
pub const SIGNATURE_INDEX: u8 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    /// Shift order.
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];

    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "a" => Some(Button::A),
            "b" => Some(Button::B),
            "select" => Some(Button::Select),
            "start" => Some(Button::Start),
            "up" => Some(Button::Up),
            "down" => Some(Button::Down),
            "left" => Some(Button::Left),
            "right" => Some(Button::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joypad {
    port: usize,
    strobe: bool,
    index: u8,
}

impl Joypad {
    pub fn new(port: usize) -> Self {
        Self {
            port,
            strobe: false,
            index: 0,
        }
    }

    pub fn write_strobe(&mut self, value: u8) {
        self.strobe = value & 1 != 0;
        if self.strobe {
            self.index = 0;
        }
    }

    /// Next bit of the sequence (0 or 1). Buttons are polled live from `input`.
    pub fn read(&mut self, input: &dyn InputSource) -> u8 {
        if self.strobe {
            return input.key_state(self.port, Button::A) as u8;
        }
        let bit = match self.index {
            i @ 0..=7 => input.key_state(self.port, Button::ALL[i as usize]) as u8,
            SIGNATURE_INDEX => 1,
            _ => 0,
        };
        self.index = (self.index + 1) % SEQUENCE_LEN;
        bit
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn reset(&mut self) {
        self.strobe = false;
        self.index = 0;
    }
}
