use clap::ArgAction;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure that can be loaded from CLI, config file, or environment
///
/// Example configuration file content
/// # Submission Relay Configuration
///
/// # Server configuration
/// listen_on_port = 3002
/// storage_dir = "/usr/share/nginx/html/files"
/// max_upload_bytes = 52428800
///
/// # Image normalization
/// jpeg_quality = 90
/// converter = "convert"          # Empty string disables the external fallback
/// conversion_error_log = true
///
/// # Downstream automation
/// webhook_url = "http://127.0.0.1:5678/webhook-test/form-submit"
/// relay_timeout_secs = 120       # Optional, no timeout when unset
///
/// # Client application (optional, embedded shell is used otherwise)
/// ui_dir = "./dist"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3002)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Shared directory for uploads and downstream output
    #[arg(short, long, default_value = "/usr/share/nginx/html/files")]
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Webhook URL of the downstream automation
    #[arg(long, default_value = "http://127.0.0.1:5678/webhook-test/form-submit")]
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,

    /// Maximum accepted size of the product image, in bytes
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// JPEG quality used when normalizing images (1-100)
    #[arg(long, default_value_t = 90)]
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// External converter for formats the built-in decoder can't read (empty = disabled)
    #[arg(long, default_value = "convert")]
    #[serde(default = "default_converter")]
    pub converter: String,

    /// Append conversion failures to conversion_errors.txt in the storage dir
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    #[serde(default = "default_conversion_error_log")]
    pub conversion_error_log: bool,

    /// Timeout for the webhook call in seconds (no timeout when unset)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_timeout_secs: Option<u64>,

    /// Directory of a built client bundle to serve instead of the embedded shell
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_dir: Option<String>,

    /// Configuration file path (overrides all other arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            storage_dir: default_storage_dir(),
            webhook_url: default_webhook_url(),
            max_upload_bytes: default_max_upload_bytes(),
            jpeg_quality: default_jpeg_quality(),
            converter: default_converter(),
            conversion_error_log: default_conversion_error_log(),
            relay_timeout_secs: None,
            ui_dir: None,
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> anyhow::Result<Self> {
        // First parse CLI args
        let mut config = Config::parse();

        // If a config file is specified, load it and merge
        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.storage_dir == default_storage_dir() {
            self.storage_dir = file_config.storage_dir;
        }
        if self.webhook_url == default_webhook_url() {
            self.webhook_url = file_config.webhook_url;
        }
        if self.max_upload_bytes == default_max_upload_bytes() {
            self.max_upload_bytes = file_config.max_upload_bytes;
        }
        if self.jpeg_quality == default_jpeg_quality() {
            self.jpeg_quality = file_config.jpeg_quality;
        }
        if self.converter == default_converter() {
            self.converter = file_config.converter;
        }
        if self.conversion_error_log == default_conversion_error_log() {
            self.conversion_error_log = file_config.conversion_error_log;
        }

        // For Option fields, CLI takes precedence if Some
        if self.relay_timeout_secs.is_none() {
            self.relay_timeout_secs = file_config.relay_timeout_secs;
        }
        if self.ui_dir.is_none() {
            self.ui_dir = file_config.ui_dir;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage_dir.is_empty() {
            return Err(anyhow::anyhow!("Storage directory cannot be empty"));
        }

        if self.webhook_url.is_empty() {
            return Err(anyhow::anyhow!("Webhook URL cannot be empty"));
        }
        if !self.webhook_url.starts_with("http://") && !self.webhook_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "Webhook URL must start with http:// or https://"
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("max_upload_bytes must be greater than 0"));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow::anyhow!(
                "jpeg_quality can only be set in the range 1-100, got {}",
                self.jpeg_quality
            ));
        }

        if self.relay_timeout_secs == Some(0) {
            return Err(anyhow::anyhow!("relay_timeout_secs must be greater than 0"));
        }

        Ok(())
    }

    /// External converter program, `None` when the fallback is disabled
    pub fn converter(&self) -> Option<&str> {
        let converter = self.converter.trim();
        (!converter.is_empty()).then_some(converter)
    }

    pub fn relay_timeout(&self) -> Option<Duration> {
        self.relay_timeout_secs.map(Duration::from_secs)
    }
}

// Default value functions
fn default_port() -> u16 {
    3002
}

fn default_storage_dir() -> String {
    "/usr/share/nginx/html/files".to_string()
}

fn default_webhook_url() -> String {
    "http://127.0.0.1:5678/webhook-test/form-submit".to_string()
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_converter() -> String {
    "convert".to_string()
}

fn default_conversion_error_log() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_from_cli() {
        let cli_content = [
            "CLI",
            "--listen-on-port",
            "8080",
            "--storage-dir",
            "/tmp/shared",
            "--webhook-url",
            "http://localhost:9000/hook",
            "--max-upload-bytes",
            "1024",
            "--jpeg-quality",
            "75",
            "--converter",
            "",
            "--conversion-error-log",
            "false",
            "--relay-timeout-secs",
            "30",
        ];

        let config = Config::try_parse_from(cli_content).unwrap();

        assert_eq!(config.listen_on_port, 8080);
        assert_eq!(config.storage_dir, "/tmp/shared");
        assert_eq!(config.webhook_url, "http://localhost:9000/hook");
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.converter(), None);
        assert!(!config.conversion_error_log);
        assert_eq!(config.relay_timeout(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            listen_on_port = 8080
            storage_dir = "/srv/files"
            webhook_url = "https://automation.internal/webhook/form-submit"
            jpeg_quality = 80
            ui_dir = "./dist"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();

        assert_eq!(config.listen_on_port, 8080);
        assert_eq!(config.storage_dir, "/srv/files");
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.ui_dir.as_deref(), Some("./dist"));
        // Unset fields fall back to defaults
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.converter(), Some("convert"));
        assert!(config.conversion_error_log);
        assert_eq!(config.relay_timeout(), None);
    }

    #[test]
    fn test_config_merge_with_file() {
        let file_config = Config {
            storage_dir: "/srv/files".to_string(),
            jpeg_quality: 70,
            relay_timeout_secs: Some(15),
            ..Default::default()
        };

        let cli_config = Config {
            listen_on_port: 9000,
            jpeg_quality: 95,
            ..Default::default()
        };

        let merged = cli_config.merge_with_file(file_config);

        assert_eq!(merged.listen_on_port, 9000); // CLI value takes precedence
        assert_eq!(merged.jpeg_quality, 95);
        assert_eq!(merged.storage_dir, "/srv/files"); // File value used when CLI is default
        assert_eq!(merged.relay_timeout_secs, Some(15));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            webhook_url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_upload_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            relay_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_on_port, 3002);
        assert_eq!(config.jpeg_quality, 90);
    }
}
