//! Best-effort JPEG normalization of uploaded images.
//!
//! Decoding happens in-process with the `image` crate. Formats it can't read
//! (HEIC from phone cameras, mostly) go through an external converter when one
//! is configured. A failed conversion never fails the submission: the caller
//! gets the original file back, tagged with the reason.

use crate::storage::{JPEG_CONTENT_TYPE, JPEG_EXTENSION, StorageRoot, StoredFile, create_new};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, ImageFormat, ImageReader};
use std::io::Cursor;
use std::io::ErrorKind as StdIoErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

pub const CONVERSION_ERRORS_FILE: &str = "conversion_errors.txt";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Failed to read source image: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to decode image: {0}")]
    Decode(#[source] ImageError),

    #[error("Failed to encode JPEG: {0}")]
    Encode(#[source] ImageError),

    #[error("Failed to write JPEG: {0}")]
    Write(#[source] std::io::Error),

    #[error("Unsupported image format and no external converter configured: {0}")]
    Unsupported(#[source] ImageError),

    #[error("Failed to run converter '{program}': {source}")]
    ConverterSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter '{program}' exited with {status}: {stderr}")]
    ConverterFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Converter '{program}' reported success but wrote no {target}")]
    ConverterNoOutput { program: String, target: PathBuf },

    #[error("Conversion task panicked")]
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnchangedReason {
    /// Source already is JPEG data at the target path
    AlreadyJpeg,
    /// Something else already owns `<base>.jpg`
    TargetOccupied,
    Failed(String),
}

/// Outcome of a normalization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Converted(StoredFile),
    Unchanged {
        file: StoredFile,
        reason: UnchangedReason,
    },
}

impl Normalized {
    /// The file the rest of the request should use.
    pub fn file(&self) -> &StoredFile {
        match self {
            Normalized::Converted(file) => file,
            Normalized::Unchanged { file, .. } => file,
        }
    }

    pub fn into_file(self) -> StoredFile {
        match self {
            Normalized::Converted(file) => file,
            Normalized::Unchanged { file, .. } => file,
        }
    }

    pub fn is_converted(&self) -> bool {
        matches!(self, Normalized::Converted(_))
    }
}

#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    storage: StorageRoot,
    quality: u8,
    converter: Option<String>,
    error_log: bool,
}

impl ImageNormalizer {
    pub fn new(storage: StorageRoot, quality: u8) -> Self {
        Self {
            storage,
            quality,
            converter: None,
            error_log: false,
        }
    }

    /// External program used for formats the built-in decoder can't handle.
    pub fn with_converter(mut self, converter: Option<String>) -> Self {
        self.converter = converter;
        self
    }

    /// Record failures in `conversion_errors.txt` inside the storage directory.
    pub fn with_error_log(mut self, enabled: bool) -> Self {
        self.error_log = enabled;
        self
    }

    pub async fn normalize(&self, file: StoredFile) -> Normalized {
        let target = jpeg_target(&file.path);
        let target_name = format!("{}.{JPEG_EXTENSION}", file.stem());

        if target == file.path {
            return self.reencode_in_place(file).await;
        }

        info!(original = %file.original_name, from = %file.name, to = %target_name, "Normalizing image");

        match self.convert(&file.path, &target).await {
            Ok(()) => {
                info!(name = %target_name, "Image conversion successful");
                Normalized::Converted(StoredFile {
                    name: target_name,
                    path: target,
                    content_type: JPEG_CONTENT_TYPE.to_string(),
                    original_name: file.original_name,
                })
            }
            Err(ConversionError::Write(error)) if error.kind() == StdIoErrorKind::AlreadyExists => {
                warn!(name = %file.name, target = %target_name, "JPEG target already exists, keeping original");
                Normalized::Unchanged {
                    file,
                    reason: UnchangedReason::TargetOccupied,
                }
            }
            Err(error) => self.fail(file, error).await,
        }
    }

    /// A `.jpg` name is only trusted once the bytes are JPEG too. Anything else
    /// is re-encoded into a scratch sibling that then replaces the upload.
    async fn reencode_in_place(&self, file: StoredFile) -> Normalized {
        match tokio::fs::read(&file.path).await {
            Ok(data) if image::guess_format(&data).ok() == Some(ImageFormat::Jpeg) => {
                debug!(name = %file.name, "Already a JPEG, nothing to convert");
                return Normalized::Unchanged {
                    file,
                    reason: UnchangedReason::AlreadyJpeg,
                };
            }
            Ok(_) => {}
            Err(error) => return self.fail(file, ConversionError::Read(error)).await,
        }

        let scratch = scratch_target(&file.path, file.stem());
        info!(original = %file.original_name, name = %file.name, "JPEG name without JPEG data, re-encoding");

        let converted = match self.convert(&file.path, &scratch).await {
            Ok(()) => tokio::fs::rename(&scratch, &file.path)
                .await
                .map_err(ConversionError::Write),
            Err(error) => Err(error),
        };

        match converted {
            Ok(()) => {
                info!(name = %file.name, "Image re-encoded in place");
                Normalized::Converted(StoredFile {
                    content_type: JPEG_CONTENT_TYPE.to_string(),
                    ..file
                })
            }
            Err(error) => {
                let claimed_elsewhere = matches!(
                    &error,
                    ConversionError::Write(io) if io.kind() == StdIoErrorKind::AlreadyExists
                );
                if !claimed_elsewhere {
                    let _ = tokio::fs::remove_file(&scratch).await;
                }
                self.fail(file, error).await
            }
        }
    }

    async fn fail(&self, file: StoredFile, error: ConversionError) -> Normalized {
        error!(original = %file.original_name, name = %file.name, %error, "Image conversion failed, proceeding with original file");
        self.record_failure(&file, &error).await;
        Normalized::Unchanged {
            file,
            reason: UnchangedReason::Failed(error.to_string()),
        }
    }

    async fn convert(&self, source: &Path, target: &Path) -> Result<(), ConversionError> {
        let data = tokio::fs::read(source).await.map_err(ConversionError::Read)?;
        let quality = self.quality;

        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&data, quality))
            .await
            .map_err(|_| ConversionError::Panicked)?;

        match encoded {
            Ok(jpeg) => create_new(target, &jpeg).await.map_err(ConversionError::Write),
            Err(ConversionError::Decode(error @ ImageError::Unsupported(_))) => {
                match &self.converter {
                    Some(program) => self.run_converter(program, source, target).await,
                    None => Err(ConversionError::Unsupported(error)),
                }
            }
            Err(error) => Err(error),
        }
    }

    /// `<converter> <source> -quality <q> <target>`, the ImageMagick calling convention.
    async fn run_converter(
        &self,
        program: &str,
        source: &Path,
        target: &Path,
    ) -> Result<(), ConversionError> {
        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            return Err(ConversionError::Write(std::io::Error::from(
                StdIoErrorKind::AlreadyExists,
            )));
        }

        debug!(program, ?source, ?target, "Running external converter");
        let output = Command::new(program)
            .arg(source)
            .arg("-quality")
            .arg(self.quality.to_string())
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConversionError::ConverterSpawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(target).await;
            return Err(ConversionError::ConverterFailed {
                program: program.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // multi-frame input makes ImageMagick write `<base>-0.jpg`, `<base>-1.jpg`, ...
        if !tokio::fs::try_exists(target).await.unwrap_or(false) {
            return Err(ConversionError::ConverterNoOutput {
                program: program.to_string(),
                target: target.to_path_buf(),
            });
        }

        Ok(())
    }

    async fn record_failure(&self, file: &StoredFile, error: &ConversionError) {
        if !self.error_log {
            return;
        }

        let line = format!(
            "[{}] Error converting {}: {error}\n",
            chrono::Utc::now().to_rfc3339(),
            file.original_name,
        );
        if let Err(log_error) = self.storage.append_log(CONVERSION_ERRORS_FILE, &line).await {
            warn!(%log_error, "Failed to record conversion error");
        }
    }
}

/// Decode whatever format the bytes are in and re-encode as JPEG.
fn encode_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>, ConversionError> {
    let image = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(ConversionError::Read)?
        .decode()
        .map_err(ConversionError::Decode)?;

    // JPEG has no alpha channel
    let rgb = image.to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(ConversionError::Encode)?;
    Ok(out)
}

/// Hidden sibling used while a `.jpg` upload is re-encoded.
fn scratch_target(path: &Path, stem: &str) -> PathBuf {
    path.with_file_name(format!(".{stem}.reencode.{JPEG_EXTENSION}"))
}

/// Path a normalized copy of `path` would be written to.
pub fn jpeg_target(path: &Path) -> PathBuf {
    path.with_extension(JPEG_EXTENSION)
}
