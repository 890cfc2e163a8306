/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;

use super::IcapResponseConsumer;
use crate::error::excerpt;
use crate::parse::{Encapsulated, HeaderLine};
use crate::{IcapParseError, IcapScanError, IcapScanResult, ScanDisposition};

const VIOLATIONS_FOUND_HEADER: &str = "X-Violations-Found";
const LINES_PER_VIOLATION: usize = 4;

/// Consumer for servers that report infections in `X-Violations-Found`.
///
/// A 201 response carries the violation count in that header, followed by
/// one group of filename, name, id and disposition lines per violation.
#[derive(Default)]
pub struct ViolationsResponseConsumer {}

impl ViolationsResponseConsumer {
    fn handle_ok(&self, headers: &[String]) -> Result<IcapScanResult, IcapScanError> {
        let Some((_, header)) = HeaderLine::find(headers, Encapsulated::HEADER_NAME) else {
            return Ok(IcapScanResult::default());
        };

        let encapsulated = Encapsulated::parse(header.value)?;
        if encapsulated.res_body.is_some() {
            Ok(IcapScanResult::clean())
        } else {
            Ok(IcapScanResult::default())
        }
    }

    fn handle_violations(&self, headers: &[String]) -> Result<IcapScanResult, IcapScanError> {
        let (index, header) = HeaderLine::find(headers, VIOLATIONS_FOUND_HEADER)
            .ok_or(IcapParseError::MissingHeader(VIOLATIONS_FOUND_HEADER))?;
        let count = usize::from_str(header.value).map_err(|_| {
            IcapParseError::InvalidValue(VIOLATIONS_FOUND_HEADER, excerpt(header.value))
        })?;

        let mut result = IcapScanResult::default();
        result.set_num_violations(count);
        if count == 0 {
            return Ok(result);
        }

        let start = index + 1;
        let end = count
            .checked_mul(LINES_PER_VIOLATION)
            .and_then(|n| n.checked_add(start))
            .filter(|end| *end <= headers.len())
            .ok_or(IcapParseError::TruncatedViolations(count))?;
        let group = &headers[start..end];

        let disposition = ScanDisposition::from_code(&group[3])?;
        result.set_violation(
            group[0].trim().to_string(),
            group[1].trim().to_string(),
            group[2].trim().to_string(),
        );
        result.set_disposition(disposition);
        Ok(result)
    }
}

impl IcapResponseConsumer for ViolationsResponseConsumer {
    fn receive(&self, status: u16, headers: &[String]) -> Result<IcapScanResult, IcapScanError> {
        match status {
            200 => self.handle_ok(headers),
            201 => self.handle_violations(headers),
            _ => Ok(IcapScanResult::default()),
        }
    }
}
