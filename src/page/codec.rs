//! Fixed-size page frame encode/decode.
//!
//! Every page is exactly `page_size` bytes. The first byte is a [`PageKind`]
//! discriminant; the last four bytes are a CRC32 over everything preceding
//! them. Unused suffix bytes between the payload and the checksum are
//! zero-filled.

use crate::errors::{EngineError, Result};

const CRC_LEN: usize = 4;

/// Discriminant stored in the first byte of every page frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Metadata = 0,
    Leaf = 1,
    Internal = 2,
    Overflow = 3,
    Freelist = 4,
}

impl PageKind {
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Metadata),
            1 => Some(Self::Leaf),
            2 => Some(Self::Internal),
            3 => Some(Self::Overflow),
            4 => Some(Self::Freelist),
            _ => None,
        }
    }
}

/// A decoded page frame: its kind tag and the raw bytes following it, up to
/// (but excluding) the trailing CRC32.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub kind: PageKind,
    pub body: Vec<u8>,
}

/// Encodes `kind` and `body` into a zero-padded, CRC32-checked `page_size`
/// byte frame.
///
/// # Errors
/// Returns [`EngineError::InvalidArgument`] if `body` does not fit within a
/// page of the given size.
pub fn encode_page(kind: PageKind, body: &[u8], page_size: usize) -> Result<Vec<u8>> {
    let capacity = page_size
        .checked_sub(1 + CRC_LEN)
        .ok_or_else(|| EngineError::InvalidArgument("page_size too small".into()))?;
    if body.len() > capacity {
        return Err(EngineError::InvalidArgument(format!(
            "page body of {} bytes exceeds capacity {capacity}",
            body.len()
        )));
    }

    let mut frame = vec![0u8; page_size];
    frame[0] = kind as u8;
    frame[1..1 + body.len()].copy_from_slice(body);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&frame[..page_size - CRC_LEN]);
    let crc = hasher.finalize();
    frame[page_size - CRC_LEN..].copy_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decodes a `page_size` byte frame, validating its CRC32 and kind tag.
///
/// # Errors
/// Returns [`EngineError::CorruptPage`] if the frame is too short, the kind
/// byte is unrecognized, or the checksum does not match.
pub fn decode_page(page_id: u64, frame: &[u8]) -> Result<RawPage> {
    if frame.len() < 1 + CRC_LEN {
        return Err(EngineError::CorruptPage {
            page_id,
            reason: "frame shorter than header".into(),
        });
    }
    let page_size = frame.len();
    let stored_crc = u32::from_le_bytes(frame[page_size - CRC_LEN..].try_into().unwrap());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&frame[..page_size - CRC_LEN]);
    if hasher.finalize() != stored_crc {
        return Err(EngineError::CorruptPage { page_id, reason: "crc32 mismatch".into() });
    }

    let kind = PageKind::from_byte(frame[0])
        .ok_or_else(|| EngineError::CorruptPage { page_id, reason: "unknown page kind".into() })?;
    let body = frame[1..page_size - CRC_LEN].to_vec();
    Ok(RawPage { kind, body })
}
