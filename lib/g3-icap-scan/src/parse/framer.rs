/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{Buf, BytesMut};

use crate::IcapParseError;

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const CRLF_CRLF: &[u8] = b"\r\n\r\n";

/// Accumulates bytes up to a delimiter across any number of reads.
///
/// The partial delimiter match is kept between calls to `feed`, so the
/// delimiter itself may be split over several reads. Bytes after the
/// delimiter are never consumed.
#[derive(Default)]
pub(crate) struct LineFramer {
    line: Vec<u8>,
    matched: usize,
}

impl LineFramer {
    /// Returns true if a full unit is available in `line()`.
    ///
    /// All bytes consumed from `buf` are moved into the internal buffer, and
    /// the delimiter is stripped when it is found.
    pub(crate) fn feed(
        &mut self,
        buf: &mut BytesMut,
        delimiter: &[u8],
        max_size: usize,
    ) -> Result<bool, IcapParseError> {
        let mut end = None;
        let mut i = 0;
        while i < buf.len() {
            if self.matched == 0 {
                let Some(p) = memchr::memchr(delimiter[0], &buf[i..]) else {
                    break;
                };
                i += p;
            }
            let b = buf[i];
            if b == delimiter[self.matched] {
                self.matched += 1;
                if self.matched == delimiter.len() {
                    end = Some(i + 1);
                    break;
                }
            } else if b == delimiter[0] {
                self.matched = 1;
            } else {
                self.matched = 0;
            }
            i += 1;
        }

        let consumed = end.unwrap_or(buf.len());
        let mut content_len = self.line.len() + consumed;
        if end.is_some() {
            content_len -= delimiter.len();
        }
        if content_len > max_size {
            return Err(IcapParseError::TooLargeHeader(max_size));
        }

        self.line.extend_from_slice(&buf[..consumed]);
        buf.advance(consumed);
        if end.is_some() {
            self.line.truncate(content_len);
            self.matched = 0;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    #[inline]
    pub(crate) fn line(&self) -> &[u8] {
        &self.line
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.line.clear();
        self.matched = 0;
    }
}
