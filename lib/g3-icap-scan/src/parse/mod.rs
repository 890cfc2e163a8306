/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::IcapLineParseError;

mod framer;
pub(crate) use framer::{CRLF, CRLF_CRLF, LineFramer};

mod header_line;
pub(crate) use header_line::HeaderLine;

mod status_line;
pub(crate) use status_line::StatusLine;

mod chunked_line;
pub(crate) use chunked_line::ChunkedLine;

mod encapsulated;
pub(crate) use encapsulated::Encapsulated;
