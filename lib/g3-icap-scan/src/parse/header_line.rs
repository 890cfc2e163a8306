/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::IcapLineParseError;

pub(crate) struct HeaderLine<'a> {
    pub(crate) name: &'a str,
    pub(crate) value: &'a str,
}

impl<'a> HeaderLine<'a> {
    pub(crate) fn parse(line: &'a str) -> Result<HeaderLine<'a>, IcapLineParseError> {
        let p = memchr::memchr(b':', line.as_bytes())
            .ok_or(IcapLineParseError::NoDelimiterFound(':'))?;
        if p == 0 {
            return Err(IcapLineParseError::MissingHeaderName);
        }

        let name = line[0..p].trim_end();
        let value = line[p + 1..].trim();
        Ok(HeaderLine { name, value })
    }

    /// Find the first header with the given name, skipping the status line
    pub(crate) fn find(headers: &'a [String], name: &str) -> Option<(usize, HeaderLine<'a>)> {
        headers
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, line)| HeaderLine::parse(line).ok().map(|h| (i, h)))
            .find(|(_, h)| h.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        let header = HeaderLine::parse("测试: 结果").unwrap();
        assert_eq!(header.name, "测试");
        assert_eq!(header.value, "结果");
    }

    #[test]
    fn missing_name() {
        assert!(matches!(
            HeaderLine::parse(": value"),
            Err(IcapLineParseError::MissingHeaderName)
        ));
        assert!(matches!(
            HeaderLine::parse("virus.msg"),
            Err(IcapLineParseError::NoDelimiterFound(':'))
        ));
    }

    #[test]
    fn find() {
        let headers = [
            "ICAP/1.0 200 OK".to_string(),
            "virus.msg".to_string(),
            "ISTag: \"abc\"".to_string(),
            "encapsulated: null-body=0".to_string(),
        ];
        let (index, header) = HeaderLine::find(&headers, "Encapsulated").unwrap();
        assert_eq!(index, 3);
        assert_eq!(header.value, "null-body=0");

        assert!(HeaderLine::find(&headers, "X-Violations-Found").is_none());
    }
}
