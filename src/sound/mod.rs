pub mod catalog;
pub mod crossfade;
pub mod player;
#[cfg(feature = "rodio-output")]
pub mod rodio_output;

pub use catalog::AmbientSound;
pub use crossfade::{CrossfadeConfig, CrossfadeScheduler};
pub use player::{
    AudioPlayer, PlayerFactory, PlayerRecord, RecordingPlayerFactory, SilentPlayerFactory,
};
#[cfg(feature = "rodio-output")]
pub use rodio_output::RodioPlayerFactory;
