//! Splitting payloads into transport-sized segments.
//!
//! Plaintext bodies follow the SMS text rules ([`divide_text`]). Secure
//! payloads are binary and framed by [`MultipartHandler`], which prefixes
//! every segment with a 3-byte header:
//!
//! | byte | meaning |
//! |------|---------|
//! | 0 | [`SegmentKind`] tag |
//! | 1 | zero-based segment index |
//! | 2 | total segment count |

use thiserror::Error;

/// Header bytes at the front of every secure segment.
pub const HEADER_LEN: usize = 3;

/// The largest number of segments one payload may be split into.
pub const MAX_SEGMENTS: usize = u8::MAX as usize;

const GSM_SINGLE: usize = 160;
const GSM_MULTIPART: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_MULTIPART: usize = 67;

const GSM_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";
const GSM_EXTENSION: &str = "\u{c}^{}\\[~]|€";

/// Septets `c` occupies in the GSM 7-bit alphabet, if it is representable.
fn gsm_septets(c: char) -> Option<usize> {
    if GSM_BASIC.contains(c) {
        Some(1)
    } else if GSM_EXTENSION.contains(c) {
        Some(2)
    } else {
        None
    }
}

/// Split a plaintext body into SMS parts.
///
/// Bodies that fit the GSM 7-bit alphabet get 160 septets in a single part or
/// 153 per part once concatenated; anything else is counted in UTF-16 units
/// with 70 and 67. Characters are never split across parts.
#[must_use]
pub fn divide_text(body: &str) -> Vec<String> {
    let gsm = body.chars().all(|c| gsm_septets(c).is_some());
    let cost = |c: char| {
        if gsm {
            gsm_septets(c).unwrap_or(1)
        } else {
            c.len_utf16()
        }
    };
    let (single, multipart) = if gsm {
        (GSM_SINGLE, GSM_MULTIPART)
    } else {
        (UCS2_SINGLE, UCS2_MULTIPART)
    };

    if body.chars().map(cost).sum::<usize>() <= single {
        return vec![body.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut used = 0;

    for c in body.chars() {
        let width = cost(c);
        if used + width > multipart {
            parts.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(c);
        used += width;
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// What a secure segment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentKind {
    Secure = 1,
    KeyExchange = 2,
    EndSession = 3,
}

impl TryFrom<u8> for SegmentKind {
    type Error = MultipartError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::Secure),
            2 => Ok(Self::KeyExchange),
            3 => Ok(Self::EndSession),
            other => Err(MultipartError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("Payload needs {needed} segments, at most {MAX_SEGMENTS} are allowed")]
    TooManySegments { needed: usize },

    #[error("Segment is shorter than its header")]
    Truncated,

    #[error("Unknown segment kind {0}")]
    UnknownKind(u8),

    #[error("Segments disagree on kind or total")]
    Inconsistent,

    #[error("Segment {index} is missing or duplicated")]
    Missing { index: usize },

    #[error("No segments to reassemble")]
    Empty,
}

/// Frames binary payloads into fixed-capacity segments and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartHandler {
    capacity: usize,
}

impl MultipartHandler {
    /// `capacity` is the size of a whole segment, header included. It is
    /// raised to fit at least one payload byte.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(HEADER_LEN + 1),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    const fn chunk_len(&self) -> usize {
        self.capacity - HEADER_LEN
    }

    /// Split `payload` into framed segments. An empty payload still produces
    /// one segment.
    ///
    /// # Errors
    /// `TooManySegments` if the payload needs more than [`MAX_SEGMENTS`].
    pub fn divide(&self, kind: SegmentKind, payload: &[u8]) -> Result<Vec<Vec<u8>>, MultipartError> {
        let needed = payload.len().div_ceil(self.chunk_len()).max(1);
        let total = u8::try_from(needed).map_err(|_| MultipartError::TooManySegments { needed })?;

        if payload.is_empty() {
            return Ok(vec![vec![kind as u8, 0, total]]);
        }

        Ok(payload
            .chunks(self.chunk_len())
            .zip(0u8..)
            .map(|(chunk, index)| {
                let mut segment = Vec::with_capacity(HEADER_LEN + chunk.len());
                segment.extend_from_slice(&[kind as u8, index, total]);
                segment.extend_from_slice(chunk);
                segment
            })
            .collect())
    }

    /// Rebuild a payload from its segments, in any order.
    ///
    /// # Errors
    /// If a segment is malformed, segments disagree, or any is missing.
    pub fn reassemble<S: AsRef<[u8]>>(
        &self,
        segments: &[S],
    ) -> Result<(SegmentKind, Vec<u8>), MultipartError> {
        let first = segments.first().ok_or(MultipartError::Empty)?.as_ref();
        if first.len() < HEADER_LEN {
            return Err(MultipartError::Truncated);
        }

        let kind = SegmentKind::try_from(first[0])?;
        let total = usize::from(first[2]);
        if total != segments.len() {
            return Err(MultipartError::Inconsistent);
        }

        let mut ordered: Vec<Option<&[u8]>> = vec![None; total];
        for segment in segments {
            let segment = segment.as_ref();
            if segment.len() < HEADER_LEN {
                return Err(MultipartError::Truncated);
            }
            if segment[0] != kind as u8 || usize::from(segment[2]) != total {
                return Err(MultipartError::Inconsistent);
            }

            let index = usize::from(segment[1]);
            match ordered.get_mut(index) {
                Some(slot @ None) => *slot = Some(&segment[HEADER_LEN..]),
                _ => return Err(MultipartError::Missing { index }),
            }
        }

        let mut payload = Vec::new();
        for (index, chunk) in ordered.into_iter().enumerate() {
            payload.extend_from_slice(chunk.ok_or(MultipartError::Missing { index })?);
        }

        Ok((kind, payload))
    }
}
