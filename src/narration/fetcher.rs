// Narration backend
// The session only sees a location name in and a narration (or one failure) out

use async_trait::async_trait;
use std::path::PathBuf;

use super::models::NarrationResult;
use crate::error::FetchError;

/// Produces the narration for a location. Failures are atomic: no partial results.
#[async_trait]
pub trait NarrationFetcher: Send + Sync {
    async fn fetch_narration(&self, location_name: &str) -> Result<NarrationResult, FetchError>;
}

/// Reads pre-generated narrations from `<dir>/<location>.json`
pub struct LocalNarrationFetcher {
    dir: PathBuf,
}

impl LocalNarrationFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, location_name: &str) -> Result<PathBuf, FetchError> {
        let name = location_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(FetchError::new(format!(
                "invalid location name: {:?}",
                location_name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

#[async_trait]
impl NarrationFetcher for LocalNarrationFetcher {
    async fn fetch_narration(&self, location_name: &str) -> Result<NarrationResult, FetchError> {
        let path = self.path_for(location_name)?;
        tracing::debug!("[Fetch] Reading narration from {:?}", path);

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchError::new(format!("{}: {}", path.display(), e)))?;

        let narration: NarrationResult = serde_json::from_str(&contents)
            .map_err(|e| FetchError::new(format!("{}: {}", path.display(), e)))?;

        if narration.text.trim().is_empty() {
            return Err(FetchError::new(format!("{}: narration text is empty", path.display())));
        }
        Ok(narration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("village-guide-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_reads_narration_file() {
        let dir = temp_dir("fetch-ok");
        std::fs::write(
            dir.join("古井.json"),
            r#"{"text":"A well dug in the Ming dynasty.","audio_base_64":"AAAA"}"#,
        )
        .unwrap();

        let fetcher = LocalNarrationFetcher::new(&dir);
        let narration = fetcher.fetch_narration("古井").await.unwrap();
        assert_eq!(narration.text, "A well dug in the Ming dynasty.");
        assert_eq!(narration.audio_base64, "AAAA");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_and_malformed_files_fail() {
        let dir = temp_dir("fetch-err");
        std::fs::write(dir.join("broken.json"), "{").unwrap();
        let fetcher = LocalNarrationFetcher::new(&dir);

        assert!(fetcher.fetch_narration("nowhere").await.is_err());
        assert!(fetcher.fetch_narration("broken").await.is_err());
        assert!(fetcher.fetch_narration("../etc").await.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
