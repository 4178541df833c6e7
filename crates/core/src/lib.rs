//! Console-agnostic emulator building blocks: the 6502 interpreter, APU channel
//! units, tile/palette helpers, category logging and the [`System`] trait that a
//! console implementation exposes to front ends.

pub mod apu;
pub mod cpu_6502;
pub mod logging;
pub mod ppu;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// A finished video frame of packed 0xAARRGGBB pixels.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }

        pub fn from_pixels(width: u32, height: u32, pixels: &[u32]) -> Self {
            let mut frame = Self::new(width, height);
            let len = frame.pixels.len().min(pixels.len());
            frame.pixels[..len].copy_from_slice(&pixels[..len]);
            frame
        }
    }

    pub type AudioSample = i16;
}

use serde_json::Value;

/// A CPU-like component that can be stepped; returns cycles consumed.
pub trait Cpu {
    fn reset(&mut self);
    fn step(&mut self) -> u32;
}

/// A media slot a system accepts (cartridge port, disk drive, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointInfo {
    /// Identifier passed to [`System::mount`]
    pub id: String,
    /// Display name
    pub name: String,
    /// Accepted file extensions, without the dot
    pub extensions: Vec<String>,
    pub required: bool,
}

/// A complete machine a front end can drive frame by frame.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state
    fn reset(&mut self);

    /// Emulate until a frame is produced and return a framebuffer.
    fn step_frame(&mut self) -> Result<types::Frame, Self::Error>;

    /// Snapshot of all mutable machine state. Media contents (ROM) are not included.
    fn save_state(&self) -> Value;

    /// Restore a snapshot produced by [`System::save_state`].
    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error>;

    fn supports_save_states(&self) -> bool {
        false
    }

    fn mount_points(&self) -> Vec<MountPointInfo>;

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error>;

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error>;

    fn is_mounted(&self, mount_point_id: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_initialization() {
        let f = types::Frame::new(10, 10);
        assert_eq!(f.pixels.len(), 100);
        assert_eq!(f.width, 10);
        assert_eq!(f.height, 10);
    }

    #[test]
    fn frame_from_short_pixels_pads_with_zero() {
        let f = types::Frame::from_pixels(2, 2, &[1, 2, 3]);
        assert_eq!(f.pixels, vec![1, 2, 3, 0]);
    }

    /// A counter machine: each frame bumps a counter, the counter is its whole state.
    #[derive(Default)]
    struct CounterSystem {
        frames: u64,
        media: Option<Vec<u8>>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("no such slot: {0}")]
    struct SlotError(String);

    impl System for CounterSystem {
        type Error = SlotError;

        fn reset(&mut self) {
            self.frames = 0;
        }

        fn step_frame(&mut self) -> Result<types::Frame, Self::Error> {
            self.frames += 1;
            Ok(types::Frame::new(2, 2))
        }

        fn save_state(&self) -> Value {
            serde_json::json!({ "version": 1, "frames": self.frames })
        }

        fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error> {
            #[derive(serde::Deserialize)]
            struct Snapshot {
                frames: u64,
            }
            let s: Snapshot = serde_json::from_value(v.clone())?;
            self.frames = s.frames;
            Ok(())
        }

        fn supports_save_states(&self) -> bool {
            true
        }

        fn mount_points(&self) -> Vec<MountPointInfo> {
            vec![MountPointInfo {
                id: "Slot".to_string(),
                name: "Media Slot".to_string(),
                extensions: vec!["bin".to_string()],
                required: true,
            }]
        }

        fn mount(&mut self, id: &str, data: &[u8]) -> Result<(), Self::Error> {
            if id != "Slot" {
                return Err(SlotError(id.to_string()));
            }
            self.media = Some(data.to_vec());
            Ok(())
        }

        fn unmount(&mut self, id: &str) -> Result<(), Self::Error> {
            if id != "Slot" {
                return Err(SlotError(id.to_string()));
            }
            self.media = None;
            Ok(())
        }

        fn is_mounted(&self, id: &str) -> bool {
            id == "Slot" && self.media.is_some()
        }
    }

    #[test]
    fn save_load_roundtrip_through_json_text() {
        let mut sys = CounterSystem::default();
        sys.step_frame().unwrap();
        sys.step_frame().unwrap();
        let text = serde_json::to_string(&sys.save_state()).unwrap();

        let mut other = CounterSystem::default();
        other
            .load_state(&serde_json::from_str(&text).unwrap())
            .unwrap();
        assert_eq!(other.frames, 2);
        assert!(other.supports_save_states());
    }

    #[test]
    fn mount_and_unmount() {
        let mut sys = CounterSystem::default();
        assert!(!sys.is_mounted("Slot"));
        sys.mount("Slot", &[1, 2, 3]).unwrap();
        assert!(sys.is_mounted("Slot"));
        assert!(sys.mount("Drive", &[]).is_err());
        sys.unmount("Slot").unwrap();
        assert!(!sys.is_mounted("Slot"));
        assert_eq!(sys.mount_points()[0].id, "Slot");
    }
}
