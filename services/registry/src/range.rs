//! `Content-Range` validation for chunked blob uploads.

use crate::error::{RegistryError, RegistryResult};

/// An inclusive byte range `start..=end` of a blob upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset, inclusive.
    pub start: i64,
    /// Last byte offset, inclusive.
    pub end: i64,
}

impl ContentRange {
    /// Number of bytes covered by the range.
    pub fn length(&self) -> i64 {
        self.end.wrapping_sub(self.start).wrapping_add(1)
    }

    /// Whether the range starts at the beginning of the blob.
    pub fn is_initial(&self) -> bool {
        self.start == 0
    }
}

/// Check a `Content-Range: <start>-<end>` header against the `Content-Length` header.
///
/// Checks run in a fixed order (format, start, end, ordering, length,
/// arithmetic) and the first failing one is reported.
pub fn parse_content_range(range: &str, length: &str) -> RegistryResult<ContentRange> {
    let parts: Vec<&str> = range.split('-').collect();
    let &[start, end] = parts.as_slice() else {
        return Err(RegistryError::ContentRangeInvalid("invalid format"));
    };

    let start: i64 = start
        .parse()
        .map_err(|_| RegistryError::ContentRangeInvalid("invalid start"))?;
    let end: i64 = end
        .parse()
        .map_err(|_| RegistryError::ContentRangeInvalid("invalid end"))?;

    if start > end {
        return Err(RegistryError::ContentRangeInvalid("start > end"));
    }

    let content_len: i64 = length
        .parse()
        .map_err(|_| RegistryError::ContentRangeInvalid("invalid content length"))?;

    // Wrapping, so an end of i64::MAX cannot panic.
    if content_len != end.wrapping_sub(start).wrapping_add(1) {
        return Err(RegistryError::ContentRangeInvalid(
            "content length != (end-start)+1",
        ));
    }

    Ok(ContentRange { start, end })
}
