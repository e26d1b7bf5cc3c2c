//! Known optional fields of a downstream response, as the result view reads them.
//!
//! The relay never reshapes the response; this projection only serves logging
//! here and mirrors what the client shell does in the browser.

use crate::relay::RelayResponse;
use serde_json::Value as JsonValue;

const IMAGE_FIELDS: [&str; 3] = ["image1", "image2", "image3"];
const VIDEO_FIELD: &str = "video";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaRefs {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Bare file names of up to three generated images
    pub images: Vec<String>,
    pub video: Option<String>,
}

impl MediaRefs {
    /// Missing, non-string or empty fields are skipped; a body that isn't a JSON
    /// object projects to nothing.
    pub fn project(response: &RelayResponse) -> Self {
        let Ok(JsonValue::Object(fields)) = serde_json::from_slice::<JsonValue>(response.as_bytes())
        else {
            return Self::default();
        };

        let text = |key: &str| fields.get(key).and_then(JsonValue::as_str).map(str::to_string);
        let file = |key: &str| {
            fields
                .get(key)
                .and_then(JsonValue::as_str)
                .and_then(bare_filename)
                .map(str::to_string)
        };

        Self {
            title: text("title"),
            description: text("description"),
            images: IMAGE_FIELDS.iter().filter_map(|key| file(*key)).collect(),
            video: file(VIDEO_FIELD),
        }
    }

    /// Everything "download all" fetches: images first, then the video.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.images
            .iter()
            .map(String::as_str)
            .chain(self.video.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.video.is_none()
    }
}

/// Last segment of a path written with either separator style.
pub fn bare_filename(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
}
