/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix16Checked;

use super::IcapLineParseError;

pub(crate) struct ChunkedLine<'a> {
    pub(crate) chunk_size: usize,
    pub(crate) extension: Option<&'a str>,
}

impl<'a> ChunkedLine<'a> {
    /// Parse a chunk size line with the trailing CRLF already stripped
    pub(crate) fn parse(line: &'a str) -> Result<ChunkedLine<'a>, IcapLineParseError> {
        let buf = line.as_bytes();
        let (chunk_size, offset) = usize::from_radix_16_checked(buf);
        if offset == 0 {
            return Err(IcapLineParseError::InvalidChunkSize);
        }
        let Some(chunk_size) = chunk_size else {
            return Err(IcapLineParseError::InvalidChunkSize);
        };

        if buf.len() == offset {
            return Ok(ChunkedLine {
                chunk_size,
                extension: None,
            });
        }

        match buf[offset] {
            b';' => Ok(ChunkedLine {
                chunk_size,
                extension: Some(line[offset + 1..].trim()),
            }),
            _ => Err(IcapLineParseError::InvalidChunkSize),
        }
    }
}
