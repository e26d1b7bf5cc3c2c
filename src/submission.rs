//! Upload receiver: turns one multipart form post into a [`Submission`].
//!
//! The whole form is read and checked before anything touches the storage
//! directory, so rejected requests leave no files behind.

use crate::error::SubmitError;
use crate::storage::{StorageRoot, StoredFile};
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use bytes::{Bytes, BytesMut};
use tracing::{debug, error};

pub const TITLE_FIELD: &str = "Title";
pub const DESCRIPTION_FIELD: &str = "Description";
pub const BRANDING_DIRECTION_FIELD: &str = "Branding_Direction";
pub const PRODUCT_IMAGE_FIELD: &str = "Product_Image";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// File part of the form, held in memory until the form is known to be valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub original_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Raw form contents; every field may still be missing.
#[derive(Debug, Default)]
pub struct SubmissionForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub branding_direction: Option<String>,
    pub image: Option<UploadedImage>,
}

/// One accepted submission. Lives for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub title: String,
    pub description: String,
    pub branding_direction: String,
    pub image: Option<StoredFile>,
}

impl SubmissionForm {
    /// Read every part of the body, rejecting a file larger than `max_file_bytes`.
    pub async fn read(mut multipart: Multipart, max_file_bytes: u64) -> Result<Self, SubmitError> {
        let mut form = SubmissionForm::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match name.as_str() {
                TITLE_FIELD => form.title = Some(field.text().await?),
                DESCRIPTION_FIELD => form.description = Some(field.text().await?),
                BRANDING_DIRECTION_FIELD => form.branding_direction = Some(field.text().await?),
                PRODUCT_IMAGE_FIELD => {
                    let image = read_file(field, max_file_bytes).await?;
                    if image.is_none() {
                        continue;
                    }
                    if form.image.is_some() {
                        return Err(SubmitError::DuplicateFile);
                    }
                    form.image = image;
                }
                _ => debug!(field = %name, "Ignoring unknown form field"),
            }
        }

        Ok(form)
    }

    /// Check required fields, yielding the text fields and the optional image.
    pub fn validate(self) -> Result<(ValidFields, Option<UploadedImage>), SubmitError> {
        let fields = ValidFields {
            title: required(self.title, TITLE_FIELD)?,
            description: required(self.description, DESCRIPTION_FIELD)?,
            branding_direction: required(self.branding_direction, BRANDING_DIRECTION_FIELD)?,
        };
        Ok((fields, self.image))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidFields {
    pub title: String,
    pub description: String,
    pub branding_direction: String,
}

/// Read and validate the form, then persist the image (if any) under a unique name.
pub async fn receive(
    multipart: Multipart,
    storage: &StorageRoot,
    max_file_bytes: u64,
) -> Result<Submission, SubmitError> {
    let (fields, image) = SubmissionForm::read(multipart, max_file_bytes)
        .await?
        .validate()?;

    let image = match image {
        Some(upload) => {
            let stored = storage
                .store(&upload.original_name, &upload.content_type, &upload.data)
                .await
                .inspect_err(|error| {
                    error!(original_name = %upload.original_name, %error, "Failed to store upload");
                })?;
            Some(stored)
        }
        None => None,
    };

    Ok(Submission {
        title: fields.title,
        description: fields.description,
        branding_direction: fields.branding_direction,
        image,
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, SubmitError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or(SubmitError::MissingField(field))
}

/// `None` for the empty part browsers send when no file was chosen.
async fn read_file(
    mut field: Field<'_>,
    max_file_bytes: u64,
) -> Result<Option<UploadedImage>, SubmitError> {
    let original_name = field.file_name().unwrap_or_default().to_string();
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&original_name)
                .first_or(mime_guess::mime::APPLICATION_OCTET_STREAM)
                .to_string()
        });

    let mut data = BytesMut::new();
    while let Some(chunk) = field.chunk().await? {
        if (data.len() + chunk.len()) as u64 > max_file_bytes {
            return Err(SubmitError::FileTooLarge {
                limit: max_file_bytes,
            });
        }
        data.extend_from_slice(&chunk);
    }

    if original_name.is_empty() && data.is_empty() {
        return Ok(None);
    }

    let content_type = if content_type.is_empty() {
        FALLBACK_CONTENT_TYPE.to_string()
    } else {
        content_type
    };

    Ok(Some(UploadedImage {
        original_name,
        content_type,
        data: data.freeze(),
    }))
}
