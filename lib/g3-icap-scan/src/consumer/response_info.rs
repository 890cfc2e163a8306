/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::IcapResponseConsumer;
use crate::parse::HeaderLine;
use crate::{IcapScanError, IcapScanResult, ScanDisposition};

const RESPONSE_INFO_HEADER: &str = "X-Response-Info";

/// Consumer for servers that report the verdict in `X-Response-Info`
#[derive(Default)]
pub struct ResponseInfoConsumer {}

impl IcapResponseConsumer for ResponseInfoConsumer {
    fn receive(&self, status: u16, headers: &[String]) -> Result<IcapScanResult, IcapScanError> {
        let mut result = IcapScanResult::default();
        if status == 500 {
            return Ok(result);
        }

        if let Some((_, header)) = HeaderLine::find(headers, RESPONSE_INFO_HEADER) {
            if header.value == "Clean" {
                result.set_disposition(ScanDisposition::Clean);
            } else {
                result.set_disposition(ScanDisposition::InfectedUnrepaired);
            }
        }
        Ok(result)
    }
}
