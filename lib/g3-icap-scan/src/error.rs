/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::str::Utf8Error;

use thiserror::Error;

use crate::{IcapLineParseError, IcapSessionState};

const MAX_DEBUG_STR_LEN: usize = 10;

/// Truncate a protocol value before it is put into an error
pub(crate) fn excerpt(s: &str) -> String {
    match s.char_indices().nth(MAX_DEBUG_STR_LEN) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum IcapParseError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
    #[error("no {0} header found")]
    MissingHeader(&'static str),
    #[error("violation records truncated, {0} declared")]
    TruncatedViolations(usize),
    #[error("unknown disposition code {0}")]
    UnknownDisposition(String),
    #[error("zero sized payload chunk")]
    EmptyPayload,
    #[error("too large header, should be less than {0}")]
    TooLargeHeader(usize),
    #[error("stream closed before the end of message")]
    NotLongEnough,
    #[error("invalid encapsulated http status line: {0}")]
    InvalidHttpStatusLine(IcapLineParseError),
    #[error("invalid utf-8 encoding: {0}")]
    InvalidUtf8Encoding(#[from] Utf8Error),
}

#[derive(Debug, Error)]
pub enum IcapScanError {
    #[error("parse error: {0}")]
    ParseError(#[from] IcapParseError),
    #[error("invalid icap status line: {0}")]
    ParseErrorIcapStatus(String),
    #[error("icap server error")]
    ServerError,
    #[error("not connected to icap server")]
    NotConnected,
    #[error("timed out")]
    Timeout,
    #[error("no free session")]
    NoFreeConnection,
    #[error("no more routes allowed")]
    NoMoreRoutes,
    #[error("session in use")]
    SessionInUse,
    #[error("scan request failed: {0:?}")]
    ScanRequestFailed(io::Error),
    #[error("internal error: {0}")]
    InternalError(&'static str),
    #[error("connection reuse not implemented")]
    ConnectionReuseNotImplemented,
    #[error("inactivity timeout")]
    InactivityTimeout,
    #[error("channel disconnected, state: {0}")]
    Disconnected(IcapSessionState),
}

#[derive(Debug, Error)]
pub enum IcapFutureError {
    #[error("wait timeout")]
    WaitTimeout,
    #[error("scan failed: {0}")]
    Failed(#[from] IcapScanError),
}
