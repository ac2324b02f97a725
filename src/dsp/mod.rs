pub mod channel;
pub mod energy;
pub mod engine;
pub mod hearing;
pub mod mdct;
pub mod stuck;
pub mod utils;

pub use channel::ChannelMasker;
pub use energy::EnergySmoother;
pub use engine::MaskingEngine;
pub use mdct::Mdct;
pub use stuck::GilbertElliott;

use thiserror::Error;

/// Configuration failures. Fatal to the call that raised them; the engine is
/// left in its previous consistent state. Nothing in the steady-state
/// processing path returns these.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    #[error("MDCT window size must be a power of two and a multiple of 4, got {n}")]
    WindowSize { n: usize },
    #[error("smoother decay time must be non-negative, got {samples}")]
    DecayTime { samples: f32 },
}
