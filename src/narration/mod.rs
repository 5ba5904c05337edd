// Narration loading, caching and the active session

pub mod cache;
pub mod fetcher;
pub mod models;
pub mod session;

pub use cache::NarrationCache;
pub use fetcher::{LocalNarrationFetcher, NarrationFetcher};
pub use models::{LoadStatus, NarrationResult, NarrationView};
pub use session::NarrationSession;
