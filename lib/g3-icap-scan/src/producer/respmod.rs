/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::Write;

use bytes::Bytes;

use super::{IcapRequestProducer, RespmodRequest};
use crate::IcapRoute;

pub const RESPMOD_TRAILER: &[u8] = b"\r\n0\r\n\r\n";

const HTTP_RESPONSE_HEADER: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Builds OPTIONS and RESPMOD requests carrying a file as a http 200 response
pub struct DefaultRequestProducer {
    user_agent: String,
    default_service: String,
}

impl DefaultRequestProducer {
    pub const DEFAULT_SERVICE: &'static str = "SYMCScanResp-AV";

    pub fn new(user_agent: &str) -> Self {
        DefaultRequestProducer {
            user_agent: user_agent.to_string(),
            default_service: Self::DEFAULT_SERVICE.to_string(),
        }
    }

    pub fn set_default_service(&mut self, service: &str) {
        self.default_service = service.trim_start_matches('/').to_string();
    }

    fn service<'a>(&'a self, route: &'a IcapRoute) -> &'a str {
        if route.service().is_empty() {
            &self.default_service
        } else {
            route.service()
        }
    }
}

impl IcapRequestProducer for DefaultRequestProducer {
    fn build_options(&self, route: &IcapRoute) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        let _ = write!(
            buf,
            "OPTIONS icap://{}/{} ICAP/1.0\r\n",
            route.uri_host(),
            self.service(route)
        );
        let _ = write!(buf, "Host: {}\r\n", route.host());
        let _ = write!(buf, "User-Agent: {}\r\n", self.user_agent);
        buf.extend_from_slice(b"Encapsulated: null-body=0\r\n\r\n");
        buf
    }

    fn build_respmod(
        &self,
        route: &IcapRoute,
        filename: &str,
        payload: Bytes,
        keep_alive: bool,
    ) -> RespmodRequest {
        let mut req_hdr = Vec::with_capacity(128);
        let _ = write!(
            req_hdr,
            "GET /{} HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
            filename.trim_start_matches('/'),
            route.uri_host(),
            route.port()
        );
        let res_hdr = req_hdr.len();
        let res_body = res_hdr + HTTP_RESPONSE_HEADER.len();

        let mut header = Vec::with_capacity(256 + res_body);
        let _ = write!(
            header,
            "RESPMOD icap://{}:{}/{} ICAP/1.0\r\n",
            route.uri_host(),
            route.port(),
            self.service(route)
        );
        let _ = write!(header, "Host: {}\r\n", route.host());
        if keep_alive {
            header.extend_from_slice(b"Connection: keep-alive\r\n");
        } else {
            header.extend_from_slice(b"Connection: close\r\n");
        }
        let _ = write!(
            header,
            "Encapsulated: req-hdr=0, res-hdr={res_hdr}, res-body={res_body}\r\n\r\n"
        );
        header.extend_from_slice(&req_hdr);
        header.extend_from_slice(HTTP_RESPONSE_HEADER);
        let _ = write!(header, "{:x}\r\n", payload.len());

        RespmodRequest {
            header,
            payload,
            trailer: RESPMOD_TRAILER,
        }
    }
}
