/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;

use bytes::Bytes;

use crate::IcapParseError;
use crate::error::excerpt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanDisposition {
    Clean,
    InfectedUnrepaired,
    InfectedRepaired,
    InfectedReplaced,
}

impl ScanDisposition {
    /// Map the disposition code sent after each violation record
    pub fn from_code(code: &str) -> Result<Self, IcapParseError> {
        match code.trim() {
            "0" => Ok(ScanDisposition::InfectedUnrepaired),
            "1" => Ok(ScanDisposition::InfectedRepaired),
            "2" => Ok(ScanDisposition::InfectedReplaced),
            s => Err(IcapParseError::UnknownDisposition(excerpt(s))),
        }
    }

    pub fn code(&self) -> i8 {
        match self {
            ScanDisposition::Clean => -1,
            ScanDisposition::InfectedUnrepaired => 0,
            ScanDisposition::InfectedRepaired => 1,
            ScanDisposition::InfectedReplaced => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDisposition::Clean => "Clean",
            ScanDisposition::InfectedUnrepaired => "InfectedUnrepaired",
            ScanDisposition::InfectedRepaired => "InfectedRepaired",
            ScanDisposition::InfectedReplaced => "InfectedReplaced",
        }
    }

    #[inline]
    pub fn is_infected(&self) -> bool {
        !matches!(self, ScanDisposition::Clean)
    }
}

impl fmt::Display for ScanDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one scan.
///
/// Only the first violation record is kept, while `num_violations` is the
/// count announced by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IcapScanResult {
    disposition: Option<ScanDisposition>,
    num_violations: usize,
    violation_filename: Option<String>,
    violation_name: Option<String>,
    violation_id: Option<String>,
    cleaned_bytes: Option<Bytes>,
}

impl IcapScanResult {
    pub fn clean() -> Self {
        IcapScanResult {
            disposition: Some(ScanDisposition::Clean),
            ..Default::default()
        }
    }

    #[inline]
    pub fn disposition(&self) -> Option<ScanDisposition> {
        self.disposition
    }

    #[inline]
    pub fn num_violations(&self) -> usize {
        self.num_violations
    }

    #[inline]
    pub fn violation_filename(&self) -> Option<&str> {
        self.violation_filename.as_deref()
    }

    #[inline]
    pub fn violation_name(&self) -> Option<&str> {
        self.violation_name.as_deref()
    }

    #[inline]
    pub fn violation_id(&self) -> Option<&str> {
        self.violation_id.as_deref()
    }

    #[inline]
    pub fn cleaned_bytes(&self) -> Option<&Bytes> {
        self.cleaned_bytes.as_ref()
    }

    pub fn set_disposition(&mut self, disposition: ScanDisposition) {
        self.disposition = Some(disposition);
    }

    pub fn set_num_violations(&mut self, num: usize) {
        self.num_violations = num;
    }

    pub fn set_violation(&mut self, filename: String, name: String, id: String) {
        self.violation_filename = Some(filename);
        self.violation_name = Some(name);
        self.violation_id = Some(id);
    }

    pub fn set_cleaned_bytes(&mut self, data: Bytes) {
        self.cleaned_bytes = Some(data);
    }
}

impl fmt::Display for IcapScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NumberOfViolations: {}, ViolationFilename: {}, ViolationId: {}, ViolationName: {}, Disposition: {}",
            self.num_violations,
            self.violation_filename.as_deref().unwrap_or_default(),
            self.violation_id.as_deref().unwrap_or_default(),
            self.violation_name.as_deref().unwrap_or_default(),
            self.disposition.map(|d| d.as_str()).unwrap_or("None"),
        )
    }
}
