//! Reusable 2A03 audio building blocks.
//!
//! Each channel is a plain state machine clocked by its owner: timers per CPU cycle
//! (pulse timers every other cycle), envelopes and linear counters on quarter
//! frames, length counters and sweeps on half frames. The [`FrameCounter`] decides
//! when quarter and half frames happen. Mixing and DC removal live in [`mixer`].
//!
//! Everything here is `Serialize`/`Deserialize` so a system can snapshot its APU
//! with serde.

pub mod dmc;
pub mod envelope;
pub mod frame_counter;
pub mod length_counter;
pub mod mixer;
pub mod noise;
pub mod pulse;
pub mod sweep;
pub mod timing;
pub mod triangle;

pub use dmc::{DmcChannel, DmcPlayMode, DMC_FETCH_STALL};
pub use envelope::Envelope;
pub use frame_counter::{FrameCounter, FrameTick};
pub use length_counter::{LengthCounter, LENGTH_TABLE};
pub use mixer::{ChannelLevels, DcBlocker, Mixer};
pub use noise::NoiseChannel;
pub use pulse::PulseChannel;
pub use sweep::SweepUnit;
pub use timing::TimingMode;
pub use triangle::TriangleChannel;
