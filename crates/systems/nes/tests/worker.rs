mod common;

use common::{nrom_image, quiet_config, BUSY_PROGRAM};
use emu_nes::{AudioRingSink, Emulator, FrameBufferSink, NesError};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn running_emulator() -> (Emulator, FrameBufferSink) {
    let mut emu = Emulator::new(quiet_config());
    emu.load_rom_bytes(&nrom_image(BUSY_PROGRAM, 0)).unwrap();
    let display = FrameBufferSink::new();
    emu.set_display(Box::new(display.clone())).unwrap();
    emu.set_audio(Box::new(AudioRingSink::new(44_100, 1, 1 << 16)))
        .unwrap();
    (emu, display)
}

#[test]
fn test_stop_is_synchronous() {
    let (mut emu, display) = running_emulator();
    emu.start_emulation().unwrap();
    assert!(wait_for(|| display.frame_count().0 >= 3));

    emu.stop_emulation().unwrap();
    assert!(!emu.is_running());
    let frames = display.frame_count().0;
    let state = emu.state_save().unwrap();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(display.frame_count().0, frames);
    assert_eq!(emu.state_save().unwrap(), state);
}

#[test]
fn test_start_twice_and_restart() {
    let (mut emu, display) = running_emulator();
    emu.start_emulation().unwrap();
    emu.start_emulation().unwrap();
    assert!(emu.is_running());
    emu.stop_emulation().unwrap();
    emu.stop_emulation().unwrap();

    let frames = display.frame_count().0;
    emu.start_emulation().unwrap();
    assert!(wait_for(|| display.frame_count().0 > frames));
    emu.stop_emulation().unwrap();
}

#[test]
fn test_state_load_while_running() {
    let (mut emu, _display) = running_emulator();
    let initial = emu.state_save().unwrap();
    emu.start_emulation().unwrap();
    thread::sleep(Duration::from_millis(20));

    emu.state_load(&initial).unwrap();
    assert!(emu.is_running());
    emu.stop_emulation().unwrap();

    emu.state_load(&initial).unwrap();
    assert_eq!(emu.state_save().unwrap(), initial);
}

#[test]
fn test_load_rom_errors_without_stopping_state() {
    let (mut emu, _display) = running_emulator();
    assert!(matches!(
        emu.load_rom_bytes(b"not a rom"),
        Err(NesError::Rom(_))
    ));
    assert!(matches!(
        emu.load_rom("/nonexistent/game.nes"),
        Err(NesError::Rom(_))
    ));
    emu.start_emulation().unwrap();
    assert!(emu.is_running());
    emu.stop_emulation().unwrap();
}

#[test]
fn test_sound_toggle_while_running() {
    let (mut emu, _display) = running_emulator();
    emu.start_emulation().unwrap();
    emu.enable_sound(false).unwrap();
    assert!(emu.is_running());
    let system = emu.into_system().unwrap();
    assert!(!system.bus().apu.is_sound_enabled());
    assert!(!system.config().sound_enabled);
}
