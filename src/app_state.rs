use crate::config::Config;
use crate::normalize::ImageNormalizer;
use crate::relay::SubmissionRelay;
use crate::storage::StorageRoot;
use tracing::info;

#[derive(Clone, Debug)]
pub struct AppState {
    pub storage: StorageRoot,
    pub normalizer: ImageNormalizer,
    pub relay: SubmissionRelay,
    pub max_upload_bytes: u64,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let storage = StorageRoot::new(&config.storage_dir);
        Self::with_storage(config, storage).await
    }

    /// Build the state around an already configured storage handle.
    pub async fn with_storage(config: &Config, storage: StorageRoot) -> anyhow::Result<Self> {
        storage.ensure_dir().await?;
        info!(storage_dir = ?storage.dir(), "Storage directory ready");

        let normalizer = ImageNormalizer::new(storage.clone(), config.jpeg_quality)
            .with_converter(config.converter().map(str::to_string))
            .with_error_log(config.conversion_error_log);

        let relay = SubmissionRelay::new(config.webhook_url.clone(), config.relay_timeout());
        info!(webhook_url = %relay.webhook_url(), "Relaying submissions to webhook");

        Ok(Self {
            storage,
            normalizer,
            relay,
            max_upload_bytes: config.max_upload_bytes,
        })
    }
}
