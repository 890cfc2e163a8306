/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix10Checked;

use super::IcapLineParseError;

pub(crate) struct StatusLine<'a> {
    pub(crate) code: u16,
    pub(crate) reason: &'a str,
}

impl<'a> StatusLine<'a> {
    const MINIMAL_LENGTH: usize = 12; // "ICAP/1.0 200"

    pub(crate) fn parse_icap(line: &'a str) -> Result<StatusLine<'a>, IcapLineParseError> {
        if line.len() < Self::MINIMAL_LENGTH {
            return Err(IcapLineParseError::NotLongEnough);
        }

        let (version, left) = line
            .split_once(' ')
            .ok_or(IcapLineParseError::NoDelimiterFound(' '))?;
        if version != "ICAP/1.0" {
            return Err(IcapLineParseError::InvalidIcapVersion);
        }
        Self::parse_code_reason(left)
    }

    /// Parse the status line of the http response embedded in a RESPMOD response
    pub(crate) fn parse_http(line: &'a str) -> Result<StatusLine<'a>, IcapLineParseError> {
        let (version, left) = line
            .split_once(' ')
            .ok_or(IcapLineParseError::NoDelimiterFound(' '))?;
        match version {
            "HTTP/1.0" | "HTTP/1.1" => {}
            _ => return Err(IcapLineParseError::InvalidHttpVersion),
        }
        Self::parse_code_reason(left)
    }

    fn parse_code_reason(left: &'a str) -> Result<StatusLine<'a>, IcapLineParseError> {
        let left = left.trim_start();
        let (code, len) = u16::from_radix_10_checked(left.as_bytes());
        let Some(code) = code else {
            return Err(IcapLineParseError::InvalidStatusCode);
        };
        if len != 3 {
            return Err(IcapLineParseError::InvalidStatusCode);
        }

        let reason = &left[len..];
        if !reason.is_empty() && !reason.starts_with(' ') {
            return Err(IcapLineParseError::InvalidStatusCode);
        }
        Ok(StatusLine {
            code,
            reason: reason.trim(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal() {
        let status = StatusLine::parse_icap("ICAP/1.0 201 Created").unwrap();
        assert_eq!(status.code, 201);
        assert_eq!(status.reason, "Created");

        let status = StatusLine::parse_http("HTTP/1.1 200 OK").unwrap();
        assert_eq!(status.code, 200);
        assert_eq!(status.reason, "OK");
    }

    #[test]
    fn no_reason() {
        let status = StatusLine::parse_icap("ICAP/1.0 204").unwrap();
        assert_eq!(status.code, 204);
        assert_eq!(status.reason, "");
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            StatusLine::parse_icap("ICAP/1.0 abc Created"),
            Err(IcapLineParseError::InvalidStatusCode)
        ));
        assert!(matches!(
            StatusLine::parse_icap("ICAP/1.1 200 OK"),
            Err(IcapLineParseError::InvalidIcapVersion)
        ));
        assert!(matches!(
            StatusLine::parse_icap("ICAP/1.0 2000 OK"),
            Err(IcapLineParseError::InvalidStatusCode)
        ));
        assert!(matches!(
            StatusLine::parse_icap("ICAP/1.0 99999999 OK"),
            Err(IcapLineParseError::InvalidStatusCode)
        ));
        assert!(matches!(
            StatusLine::parse_http("HTTP/2 200 OK"),
            Err(IcapLineParseError::InvalidHttpVersion)
        ));
    }
}
