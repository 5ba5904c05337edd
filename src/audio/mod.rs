// Audio pipeline
// base64 payload -> PCM buffer -> source node on the shared output context

pub mod context;
pub mod decoder;
pub mod output;
pub mod pcm;
pub mod player;
pub mod scheduler;

pub use context::{AudioContext, AudioContextManager, ContextState, SourceNode};
pub use pcm::{AudioBufferBuilder, DecodedAudio, PcmFormat};
pub use player::{PlaybackController, PlaybackState, PlayerPhase};
