/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Vendor specific interpretation of ICAP response headers.

use crate::{IcapScanError, IcapScanResult};

mod violations;
pub use violations::ViolationsResponseConsumer;

mod response_info;
pub use response_info::ResponseInfoConsumer;

pub trait IcapResponseConsumer: Send + Sync {
    /// Build a scan result from the status code and the raw header lines.
    ///
    /// `headers` starts with the status line. A result without disposition
    /// means the consumer found nothing to report.
    fn receive(&self, status: u16, headers: &[String]) -> Result<IcapScanResult, IcapScanError>;
}
