/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use humanize_rs::ParseError;
use yaml_rust::Yaml;

use super::{IcapScanConfig, IcapVendorStyle};

impl IcapScanConfig {
    pub fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = v else {
            return Err(anyhow!(
                "yaml value type for 'icap scan config' should be 'map'"
            ));
        };

        let mut config = IcapScanConfig::default();
        for (k, v) in map.iter() {
            let k = k
                .as_str()
                .ok_or_else(|| anyhow!("yaml key type should be 'string'"))?;
            config.set_by_yaml_kv(k, v)?;
        }
        Ok(config)
    }

    pub fn set_by_yaml_kv(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match normalize(k).as_str() {
            "connect_timeout" => {
                self.connect_timeout =
                    as_duration(v).context(format!("invalid humanize duration value for key {k}"))?;
                Ok(())
            }
            "inactivity_timeout" | "idle_timeout" => {
                self.inactivity_timeout =
                    as_duration(v).context(format!("invalid humanize duration value for key {k}"))?;
                Ok(())
            }
            "max_sessions_per_route" | "max_sessions" => {
                self.max_sessions_per_route =
                    as_usize(v).context(format!("invalid usize value for key {k}"))?;
                Ok(())
            }
            "reuse_session" | "reuse_connection" => {
                self.reuse_session = as_bool(v).context(format!("invalid bool value for key {k}"))?;
                Ok(())
            }
            "max_routes" => {
                self.max_routes = as_usize(v).context(format!("invalid usize value for key {k}"))?;
                Ok(())
            }
            "max_session_time" => {
                self.max_session_time =
                    as_duration(v).context(format!("invalid humanize duration value for key {k}"))?;
                Ok(())
            }
            "max_command_count" => {
                self.max_command_count =
                    as_u64(v).context(format!("invalid u64 value for key {k}"))?;
                Ok(())
            }
            "max_header_size" => {
                self.max_header_size =
                    as_usize(v).context(format!("invalid usize value for key {k}"))?;
                Ok(())
            }
            "user_agent" => {
                self.user_agent = as_string(v).context(format!("invalid string value for key {k}"))?;
                Ok(())
            }
            "default_service" | "service" => {
                self.default_service =
                    as_string(v).context(format!("invalid string value for key {k}"))?;
                Ok(())
            }
            "vendor" | "vendor_style" => {
                let s = as_string(v).context(format!("invalid string value for key {k}"))?;
                self.vendor = IcapVendorStyle::from_str(&s)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {}", k)),
        }
    }
}

fn normalize(key: &str) -> String {
    key.to_lowercase().replace('-', "_")
}

fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(value) => match humanize_rs::duration::parse(value) {
            Ok(v) => Ok(v),
            Err(ParseError::MissingUnit) => {
                let u = u64::from_str(value).map_err(|_| anyhow!("invalid duration string"))?;
                Ok(Duration::from_secs(u))
            }
            Err(e) => Err(anyhow!("invalid humanize duration string: {e}")),
        },
        Yaml::Integer(value) => {
            let u = u64::try_from(*value).map_err(|_| anyhow!("unsupported duration value"))?;
            Ok(Duration::from_secs(u))
        }
        _ => Err(anyhow!(
            "yaml value type for humanize duration should be 'string' or 'integer'"
        )),
    }
}

fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(s) => Ok(usize::from_str(s)?),
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'usize' should be 'string' or 'integer'"
        )),
    }
}

fn as_u64(v: &Yaml) -> anyhow::Result<u64> {
    match v {
        Yaml::String(s) => Ok(u64::from_str(s)?),
        Yaml::Integer(i) => Ok(u64::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'u64' should be 'string' or 'integer'"
        )),
    }
}

fn as_bool(v: &Yaml) -> anyhow::Result<bool> {
    match v {
        Yaml::String(s) => match s.to_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(true),
            "off" | "false" | "no" | "0" => Ok(false),
            _ => Err(anyhow!("invalid yaml string value for 'bool': {s}")),
        },
        Yaml::Boolean(value) => Ok(*value),
        Yaml::Integer(i) => Ok(*i != 0),
        _ => Err(anyhow!(
            "yaml value type for 'bool' should be 'boolean' / 'string' / 'integer'"
        )),
    }
}

fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.to_string()),
        Yaml::Integer(i) => Ok(i.to_string()),
        _ => Err(anyhow!(
            "yaml value type for string should be 'string' or 'integer'"
        )),
    }
}
