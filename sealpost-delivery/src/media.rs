//! Attachment size and dimension limits per transport.
//!
//! Decoding and scaling images is left to an [`ImageCodec`]; this module only
//! decides whether an attachment fits a [`MediaConstraints`] profile and, for
//! images, asks the codec to make it fit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Other,
}

impl MediaKind {
    /// Classify by MIME type prefix, ignoring case.
    #[must_use]
    pub fn from_mime(content_type: &str) -> Self {
        let content_type = content_type.trim().to_ascii_lowercase();
        if content_type.starts_with("image/") {
            Self::Image
        } else if content_type.starts_with("audio/") {
            Self::Audio
        } else if content_type.starts_with("video/") {
            Self::Video
        } else {
            Self::Other
        }
    }
}

/// A named limit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub name: &'static str,
    pub image_max_width: u32,
    pub image_max_height: u32,
    pub image_max_size: usize,
    pub audio_max_size: usize,
    pub video_max_size: usize,
}

impl MediaConstraints {
    pub const MMS: Self = Self {
        name: "MMS",
        image_max_width: 1024,
        image_max_height: 1024,
        image_max_size: 280 * KIB,
        audio_max_size: 280 * KIB,
        video_max_size: 280 * KIB,
    };

    pub const PUSH: Self = Self {
        name: "Push",
        image_max_width: 1280,
        image_max_height: 1280,
        image_max_size: 420 * KIB,
        audio_max_size: 100 * MIB,
        video_max_size: 100 * MIB,
    };
}

/// Which limit set applies, chosen by the transport a message leaves on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaProfile {
    #[default]
    Mms,
    Push,
}

impl MediaProfile {
    #[must_use]
    pub const fn constraints(self) -> MediaConstraints {
        match self {
            Self::Mms => MediaConstraints::MMS,
            Self::Push => MediaConstraints::PUSH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.content_type)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("{content_type} attachments cannot be resized")]
    NotResizable { content_type: String },

    #[error("Attachment of {size} bytes does not fit the {profile} profile")]
    TooLarge { profile: &'static str, size: usize },

    #[error("Image could not be decoded: {0}")]
    Decode(String),
}

/// Image decoding and scaling.
pub trait ImageCodec: Send + Sync + std::fmt::Debug {
    /// Width and height of the encoded image.
    fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), MediaError>;

    /// Re-encode to fit within the bounding box and byte ceiling.
    fn scale(
        &self,
        data: &[u8],
        max_width: u32,
        max_height: u32,
        max_size: usize,
    ) -> Result<Vec<u8>, MediaError>;
}

impl<T: ImageCodec + ?Sized> ImageCodec for Arc<T> {
    fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), MediaError> {
        (**self).dimensions(data)
    }

    fn scale(
        &self,
        data: &[u8],
        max_width: u32,
        max_height: u32,
        max_size: usize,
    ) -> Result<Vec<u8>, MediaError> {
        (**self).scale(data, max_width, max_height, max_size)
    }
}

/// Stand-in when no codec is configured: every image is undecodable.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NoImageCodec;

impl ImageCodec for NoImageCodec {
    fn dimensions(&self, _data: &[u8]) -> Result<(u32, u32), MediaError> {
        Err(MediaError::Decode("no image codec configured".to_string()))
    }

    fn scale(
        &self,
        _data: &[u8],
        _max_width: u32,
        _max_height: u32,
        _max_size: usize,
    ) -> Result<Vec<u8>, MediaError> {
        Err(MediaError::Decode("no image codec configured".to_string()))
    }
}

/// Checks and normalises attachments against one profile.
#[derive(Debug)]
pub struct MediaChecker<C> {
    profile: MediaConstraints,
    codec: C,
}

impl<C: ImageCodec> MediaChecker<C> {
    #[must_use]
    pub const fn new(profile: MediaConstraints, codec: C) -> Self {
        Self { profile, codec }
    }

    #[must_use]
    pub const fn profile(&self) -> &MediaConstraints {
        &self.profile
    }

    /// Whether the attachment can be sent as-is. Non-media always fits.
    #[must_use]
    pub fn is_satisfied(&self, attachment: &Attachment) -> bool {
        let profile = &self.profile;
        match attachment.kind() {
            MediaKind::Image => {
                attachment.size() <= profile.image_max_size && self.is_within_bounds(attachment)
            }
            MediaKind::Audio => attachment.size() <= profile.audio_max_size,
            MediaKind::Video => attachment.size() <= profile.video_max_size,
            MediaKind::Other => true,
        }
    }

    /// Image dimensions are positive and inside the bounding box. An image
    /// that cannot be decoded is out of bounds.
    #[must_use]
    pub fn is_within_bounds(&self, attachment: &Attachment) -> bool {
        match self.codec.dimensions(&attachment.data) {
            Ok((width, height)) => {
                width > 0
                    && width <= self.profile.image_max_width
                    && height > 0
                    && height <= self.profile.image_max_height
            }
            Err(err) => {
                warn!(error = %err, "Failed to read image dimensions");
                false
            }
        }
    }

    #[must_use]
    pub fn can_resize(&self, attachment: &Attachment) -> bool {
        attachment.kind() == MediaKind::Image
    }

    /// Scale an image to fit the profile.
    ///
    /// # Errors
    /// `NotResizable` for anything but images; otherwise whatever the codec
    /// reports.
    pub fn resize(&self, attachment: &Attachment) -> Result<Attachment, MediaError> {
        if !self.can_resize(attachment) {
            return Err(MediaError::NotResizable {
                content_type: attachment.content_type.clone(),
            });
        }

        let data = self.codec.scale(
            &attachment.data,
            self.profile.image_max_width,
            self.profile.image_max_height,
            self.profile.image_max_size,
        )?;

        Ok(Attachment {
            content_type: attachment.content_type.clone(),
            data,
        })
    }

    /// Bring every attachment into the profile before the message is queued.
    ///
    /// # Errors
    /// `TooLarge` for the first attachment that neither fits nor can be
    /// resized to fit.
    pub fn prepare(&self, attachments: Vec<Attachment>) -> Result<Vec<Attachment>, MediaError> {
        attachments
            .into_iter()
            .map(|attachment| {
                if self.is_satisfied(&attachment) {
                    return Ok(attachment);
                }

                let too_large = MediaError::TooLarge {
                    profile: self.profile.name,
                    size: attachment.size(),
                };

                if !self.can_resize(&attachment) {
                    return Err(too_large);
                }

                debug!(
                    profile = self.profile.name,
                    size = attachment.size(),
                    "Resizing image attachment"
                );
                let resized = self.resize(&attachment)?;
                if self.is_satisfied(&resized) {
                    Ok(resized)
                } else {
                    Err(too_large)
                }
            })
            .collect()
    }
}
