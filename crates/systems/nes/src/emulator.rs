//! Command surface for front ends, with the console running on a worker thread.
//!
//! The console itself is single threaded. While emulation runs, the [`NesSystem`] is
//! moved into a `nes-worker` thread; every command first raises the stop flag, joins
//! the worker to get the system back, applies the change and then restarts the worker
//! if it was running. The worker checks the flag between instructions, so a stop
//! never waits longer than one instruction plus a pacing slice.

use crate::config::EmulatorConfig;
use crate::sinks::{AudioSink, DisplaySink, ErrorSink, InputSource};
use crate::{NesError, NesSystem};
use emu_core::logging::{log, LogCategory, LogLevel};
use std::any::Any;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WORKER_NAME: &str = "nes-worker";
const PACING_SLICE: Duration = Duration::from_millis(2);

type WorkerBody = Box<dyn FnOnce() -> NesSystem + Send + 'static>;

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<NesSystem>,
}

pub struct Emulator {
    config: EmulatorConfig,
    system: Option<NesSystem>,
    worker: Option<Worker>,
}

impl Emulator {
    pub fn new(config: EmulatorConfig) -> Self {
        Self::from_system(NesSystem::new(config))
    }

    pub fn from_system(system: NesSystem) -> Self {
        Self {
            config: system.config().clone(),
            system: Some(system),
            worker: None,
        }
    }

    /// `true` while a worker is executing. A worker that stopped on its own (CPU
    /// crash) counts as not running.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    pub fn load_rom<P: AsRef<Path>>(&mut self, path: P) -> Result<(), NesError> {
        self.with_system(|system| system.load_rom_file(path))?
    }

    pub fn load_rom_bytes(&mut self, data: &[u8]) -> Result<(), NesError> {
        self.with_system(|system| system.load_rom_bytes(data))?
    }

    pub fn reset(&mut self) -> Result<(), NesError> {
        self.with_system(NesSystem::reset)
    }

    pub fn start_emulation(&mut self) -> Result<(), NesError> {
        if self.is_running() {
            return Ok(());
        }
        self.stop_worker()?;
        let system = self.idle_system();
        if system.cartridge().is_none() {
            return Err(NesError::NoCartridge);
        }
        if let Some(info) = system.crash_info() {
            return Err(info.into());
        }

        self.launch(|body| {
            thread::Builder::new()
                .name(WORKER_NAME.to_string())
                .spawn(body)
        })
    }

    /// Spawn the worker through `spawn`. The console is handed over only after the
    /// thread exists, so a failed spawn leaves it idle and intact.
    fn launch<F>(&mut self, spawn: F) -> Result<(), NesError>
    where
        F: FnOnce(WorkerBody) -> io::Result<JoinHandle<NesSystem>>,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let token = Arc::clone(&stop);
        let (handoff, inbox) = mpsc::sync_channel::<NesSystem>(1);
        let config = self.config.clone();
        let handle = spawn(Box::new(move || match inbox.recv() {
            Ok(system) => run_worker(system, token),
            Err(_) => NesSystem::new(config),
        }))
        .map_err(|e| NesError::Worker(format!("cannot spawn {}: {}", WORKER_NAME, e)))?;

        let system = self.idle_system_owned();
        if let Err(mpsc::SendError(system)) = handoff.send(system) {
            self.system = Some(system);
            let _ = handle.join();
            return Err(NesError::Worker(format!("{} exited before start", WORKER_NAME)));
        }

        log(LogCategory::System, LogLevel::Info, || {
            "Emulator: worker started".to_string()
        });
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    pub fn stop_emulation(&mut self) -> Result<(), NesError> {
        self.stop_worker().map(|_| ())
    }

    pub fn state_save(&mut self) -> Result<Vec<u8>, NesError> {
        self.with_system(|system| system.save_state_bytes())?
    }

    /// Failures leave the console as it was and are forwarded to the error sink.
    pub fn state_load(&mut self, bytes: &[u8]) -> Result<(), NesError> {
        self.with_system(|system| {
            system.load_state_bytes(bytes).map_err(|e| {
                system
                    .error_sink()
                    .report(LogLevel::Error, &format!("failed to load state: {}", e));
                e
            })
        })?
    }

    pub fn enable_sound(&mut self, enabled: bool) -> Result<(), NesError> {
        self.config.sound_enabled = enabled;
        self.with_system(|system| system.set_sound_enabled(enabled))
    }

    pub fn set_display(&mut self, display: Box<dyn DisplaySink>) -> Result<(), NesError> {
        self.with_system(|system| system.set_display(display))
    }

    pub fn set_audio(&mut self, audio: Box<dyn AudioSink>) -> Result<(), NesError> {
        self.with_system(|system| system.set_audio(audio))
    }

    pub fn set_input(&mut self, input: Box<dyn InputSource>) -> Result<(), NesError> {
        self.with_system(|system| system.set_input(input))
    }

    pub fn set_error_sink(&mut self, errors: Arc<dyn ErrorSink>) -> Result<(), NesError> {
        self.with_system(|system| system.set_error_sink(errors))
    }

    /// Pause the worker, run `f` on the console, resume if it was running.
    pub fn with_system<R>(&mut self, f: impl FnOnce(&mut NesSystem) -> R) -> Result<R, NesError> {
        let was_running = self.stop_worker()?;
        let result = f(self.idle_system());
        if was_running {
            self.start_emulation()?;
        }
        Ok(result)
    }

    /// Stop the worker and hand the console back to the caller.
    pub fn into_system(mut self) -> Result<NesSystem, NesError> {
        self.stop_worker()?;
        Ok(self.system.take().unwrap_or_else(|| NesSystem::new(self.config.clone())))
    }

    /// Joins the worker if there is one. Returns whether it was still running.
    fn stop_worker(&mut self) -> Result<bool, NesError> {
        let Some(worker) = self.worker.take() else {
            return Ok(false);
        };
        let was_running = !worker.handle.is_finished();
        worker.stop.store(true, Ordering::Release);
        match worker.handle.join() {
            Ok(system) => {
                self.system = Some(system);
                if was_running {
                    log(LogCategory::System, LogLevel::Info, || {
                        "Emulator: worker stopped".to_string()
                    });
                }
                Ok(was_running)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log(LogCategory::System, LogLevel::Error, || {
                    format!("Emulator: worker panicked: {}", message)
                });
                // the console went down with the thread
                self.system = Some(NesSystem::new(self.config.clone()));
                Err(NesError::Worker(message))
            }
        }
    }

    fn idle_system_owned(&mut self) -> NesSystem {
        match self.system.take() {
            Some(system) => system,
            None => NesSystem::new(self.config.clone()),
        }
    }

    fn idle_system(&mut self) -> &mut NesSystem {
        let config = &self.config;
        self.system
            .get_or_insert_with(|| NesSystem::new(config.clone()))
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        let _ = self.stop_worker();
    }
}

fn run_worker(mut system: NesSystem, stop: Arc<AtomicBool>) -> NesSystem {
    let pace = system.config().pace_frames;
    let frame_time = Duration::from_secs_f64(1.0 / system.config().timing.frame_rate_hz());
    let mut deadline = Instant::now() + frame_time;

    while !stop.load(Ordering::Acquire) {
        match system.step_instruction() {
            Ok(false) => {}
            Ok(true) if pace => {
                wait_until(deadline, &stop);
                let now = Instant::now();
                deadline += frame_time;
                // fell behind by more than a frame: resync instead of racing
                if deadline + frame_time < now {
                    deadline = now + frame_time;
                }
            }
            Ok(true) => {}
            Err(e) => {
                log(LogCategory::System, LogLevel::Error, || {
                    format!("Emulator: worker stopped: {}", e)
                });
                break;
            }
        }
    }
    system
}

fn wait_until(deadline: Instant, stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(PACING_SLICE));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
