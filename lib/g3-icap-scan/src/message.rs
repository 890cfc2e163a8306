/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use log::debug;

use crate::consumer::IcapResponseConsumer;
use crate::error::excerpt;
use crate::parse::{
    CRLF, CRLF_CRLF, ChunkedLine, Encapsulated, HeaderLine, IcapLineParseError, LineFramer,
    StatusLine,
};
use crate::{IcapParseError, IcapScanError, IcapScanResult};

const ICAP_VERSION_PREFIX: &str = "ICAP/1.0";
const MAX_PAYLOAD_PREALLOCATE: usize = 64 * 1024;
const CHUNK_END: &[u8] = b"\r\n0\r\n\r\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseStage {
    IcapMessage,
    ResHeader,
    ResPayloadLength,
    Payload,
    Done,
}

/// Incremental parser for one ICAP response.
///
/// Feed it with whatever has been read so far. It resumes where the last
/// call stopped, and always consumes all bytes it is given.
pub struct IcapResponseMessage {
    stage: ParseStage,
    next_stages: VecDeque<ParseStage>,
    framer: LineFramer,
    max_header_size: usize,
    headers: Vec<String>,
    status: Option<u16>,
    payload_len: usize,
    payload: Vec<u8>,
    chunk_end_left: usize,
    cause: Option<IcapScanError>,
    result: IcapScanResult,
}

impl IcapResponseMessage {
    pub fn new(max_header_size: usize) -> Self {
        IcapResponseMessage {
            stage: ParseStage::IcapMessage,
            next_stages: VecDeque::with_capacity(4),
            framer: LineFramer::default(),
            max_header_size,
            headers: Vec::new(),
            status: None,
            payload_len: 0,
            payload: Vec::new(),
            chunk_end_left: 0,
            cause: None,
            result: IcapScanResult::default(),
        }
    }

    pub fn reset(&mut self) {
        self.stage = ParseStage::IcapMessage;
        self.next_stages.clear();
        self.framer.clear();
        self.headers.clear();
        self.status = None;
        self.payload_len = 0;
        self.payload.clear();
        self.chunk_end_left = 0;
        self.cause = None;
        self.result = IcapScanResult::default();
    }

    #[inline]
    pub fn stage(&self) -> ParseStage {
        self.stage
    }

    #[inline]
    pub fn is_parsing_done(&self) -> bool {
        self.stage == ParseStage::Done
    }

    /// The raw ICAP header lines, starting with the status line
    #[inline]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[inline]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    #[inline]
    pub fn result(&self) -> &IcapScanResult {
        &self.result
    }

    #[inline]
    pub fn cause(&self) -> Option<&IcapScanError> {
        self.cause.as_ref()
    }

    /// The tail of the chunk terminator not received along with the payload
    pub(crate) fn chunk_end_left(&self) -> &'static [u8] {
        &CHUNK_END[CHUNK_END.len() - self.chunk_end_left..]
    }

    fn skip_chunk_end(&mut self, buf: &mut BytesMut) {
        let left = self.chunk_end_left();
        let n = left.iter().zip(buf.iter()).take_while(|(a, b)| a == b).count();
        self.chunk_end_left = if n == buf.len() { left.len() - n } else { 0 };
        buf.clear();
    }

    pub(crate) fn take_outcome(&mut self) -> Result<IcapScanResult, IcapScanError> {
        match self.cause.take() {
            Some(e) => Err(e),
            None => Ok(std::mem::take(&mut self.result)),
        }
    }

    /// Mark the message as failed if the stream ended in the middle of it.
    ///
    /// Returns false if nothing of the message has been received yet.
    pub(crate) fn set_truncated(&mut self) -> bool {
        match self.stage {
            ParseStage::Done => false,
            ParseStage::IcapMessage if self.framer.is_empty() => false,
            _ => {
                self.cause = Some(IcapParseError::NotLongEnough.into());
                self.stage = ParseStage::Done;
                true
            }
        }
    }

    pub fn parse(&mut self, buf: &mut BytesMut, consumer: &dyn IcapResponseConsumer) {
        if let Err(e) = self.parse_stages(buf, consumer) {
            debug!("icap response parse failed in stage {:?}: {e}", self.stage);
            self.cause = Some(e);
            self.stage = ParseStage::Done;
            buf.clear();
        }
    }

    fn parse_stages(
        &mut self,
        buf: &mut BytesMut,
        consumer: &dyn IcapResponseConsumer,
    ) -> Result<(), IcapScanError> {
        loop {
            match self.stage {
                ParseStage::IcapMessage => {
                    if !self.framer.feed(buf, CRLF_CRLF, self.max_header_size)? {
                        return Ok(());
                    }
                    let head = std::str::from_utf8(self.framer.line())
                        .map_err(IcapParseError::InvalidUtf8Encoding)?;
                    self.headers.extend(head.split("\r\n").map(String::from));
                    self.framer.clear();

                    self.handle_icap_message(consumer)?;
                    self.set_next_stages()?;
                }
                ParseStage::ResHeader => {
                    if !self.framer.feed(buf, CRLF_CRLF, self.max_header_size)? {
                        return Ok(());
                    }
                    let head = std::str::from_utf8(self.framer.line())
                        .map_err(IcapParseError::InvalidUtf8Encoding)?;
                    let status_line = head.split("\r\n").next().unwrap_or_default();
                    let status = StatusLine::parse_http(status_line)
                        .map_err(IcapParseError::InvalidHttpStatusLine)?;
                    debug!(
                        "encapsulated http response: {} {}",
                        status.code, status.reason
                    );
                    self.framer.clear();
                    self.next_stage();
                }
                ParseStage::ResPayloadLength => {
                    if !self.framer.feed(buf, CRLF, self.max_header_size)? {
                        return Ok(());
                    }
                    let line = std::str::from_utf8(self.framer.line())
                        .map_err(IcapParseError::InvalidUtf8Encoding)?
                        .trim();
                    let chunk = ChunkedLine::parse(line)
                        .map_err(|_| IcapParseError::InvalidValue("payload length", excerpt(line)))?;
                    self.payload_len = chunk.chunk_size;
                    self.payload.clear();
                    self.payload
                        .reserve(self.payload_len.min(MAX_PAYLOAD_PREALLOCATE));
                    self.framer.clear();
                    self.next_stage();
                }
                ParseStage::Payload => {
                    if self.payload_len == 0 {
                        return Err(IcapParseError::EmptyPayload.into());
                    }
                    let to_read = (self.payload_len - self.payload.len()).min(buf.len());
                    self.payload.extend_from_slice(&buf[..to_read]);
                    buf.advance(to_read);
                    if self.payload.len() < self.payload_len {
                        return Ok(());
                    }

                    // the chunk trailer is not needed
                    self.chunk_end_left = CHUNK_END.len();
                    self.skip_chunk_end(buf);
                    let payload = std::mem::take(&mut self.payload);
                    self.result.set_cleaned_bytes(Bytes::from(payload));
                    self.next_stage();
                }
                ParseStage::Done => {
                    self.skip_chunk_end(buf);
                    return Ok(());
                }
            }
        }
    }

    fn handle_icap_message(
        &mut self,
        consumer: &dyn IcapResponseConsumer,
    ) -> Result<(), IcapScanError> {
        let first = self.headers.first().map(String::as_str).unwrap_or_default();
        if !first.starts_with(ICAP_VERSION_PREFIX) {
            return Err(IcapScanError::ParseErrorIcapStatus(excerpt(first)));
        }
        let code = match StatusLine::parse_icap(first) {
            Ok(status) => status.code,
            Err(IcapLineParseError::InvalidStatusCode) => {
                let value = first[ICAP_VERSION_PREFIX.len()..].trim_start();
                return Err(IcapParseError::InvalidValue("icap status", excerpt(value)).into());
            }
            Err(_) => return Err(IcapScanError::ParseErrorIcapStatus(excerpt(first))),
        };
        self.status = Some(code);

        let result = consumer.receive(code, &self.headers)?;
        if result.disposition().is_some() {
            self.result = result;
        }

        match code {
            200 | 201 => Ok(()),
            500 => Err(IcapScanError::ServerError),
            _ => Err(IcapScanError::ParseErrorIcapStatus(excerpt(first))),
        }
    }

    fn set_next_stages(&mut self) -> Result<(), IcapScanError> {
        let (_, header) = HeaderLine::find(&self.headers, Encapsulated::HEADER_NAME)
            .ok_or(IcapParseError::MissingHeader(Encapsulated::HEADER_NAME))?;
        let encapsulated = Encapsulated::parse(header.value)?;

        self.next_stages.clear();
        if encapsulated.res_hdr.is_some() {
            self.next_stages.push_back(ParseStage::ResHeader);
        }
        if encapsulated.res_body.is_some() {
            self.next_stages.push_back(ParseStage::ResPayloadLength);
            self.next_stages.push_back(ParseStage::Payload);
        }
        self.next_stages.push_back(ParseStage::Done);
        self.next_stage();
        Ok(())
    }

    fn next_stage(&mut self) {
        self.stage = self.next_stages.pop_front().unwrap_or(ParseStage::Done);
    }
}

impl fmt::Display for IcapResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(e) = &self.cause {
            write!(f, "cause: {e}, ")?;
        }
        write!(f, "headers: {}", self.headers.join(", "))
    }
}
