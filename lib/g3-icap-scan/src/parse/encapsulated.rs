/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix10Checked;

use crate::IcapParseError;
use crate::error::excerpt;

/// Section offsets announced in the ICAP `Encapsulated` header
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Encapsulated {
    pub(crate) req_hdr: Option<usize>,
    pub(crate) req_body: Option<usize>,
    pub(crate) res_hdr: Option<usize>,
    pub(crate) res_body: Option<usize>,
    pub(crate) null_body: Option<usize>,
}

impl Encapsulated {
    pub(crate) const HEADER_NAME: &'static str = "Encapsulated";

    pub(crate) fn parse(value: &str) -> Result<Self, IcapParseError> {
        let mut encapsulated = Encapsulated::default();

        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let Some((name, offset)) = part.split_once('=') else {
                return Err(IcapParseError::InvalidValue(
                    Self::HEADER_NAME,
                    excerpt(part),
                ));
            };
            let offset = offset.trim();
            let (v, len) = usize::from_radix_10_checked(offset.as_bytes());
            let offset = match v {
                Some(v) if len > 0 && len == offset.len() => v,
                _ => {
                    return Err(IcapParseError::InvalidValue(
                        Self::HEADER_NAME,
                        excerpt(offset),
                    ));
                }
            };

            match name.trim().to_ascii_lowercase().as_str() {
                "req-hdr" => encapsulated.req_hdr = Some(offset),
                "req-body" => encapsulated.req_body = Some(offset),
                "res-hdr" => encapsulated.res_hdr = Some(offset),
                "res-body" => encapsulated.res_body = Some(offset),
                "null-body" => encapsulated.null_body = Some(offset),
                _ => {}
            }
        }

        Ok(encapsulated)
    }
}
