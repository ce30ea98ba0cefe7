use crate::error::Error;

/// Length-prefix delimiter: `<ascii decimal length>"MLEN"<payload>`.
pub const DELIMITER: &[u8; 4] = b"MLEN";

/// The delimiter must complete within this many header bytes. Ten decimal
/// digits are enough for any accepted length; a peer streaming a longer
/// prefix is rejected without consuming further input.
pub const MAX_HEADER_SIZE: usize = 14;

/// Largest payload a frame may announce.
pub const MAX_PAYLOAD_SIZE: u64 = u32::MAX as u64;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Number of payload bytes that follow the delimiter.
    pub payload_len: usize,
    /// Number of bytes the prefix and delimiter occupy.
    pub header_len: usize,
}

/// Prepend the length prefix and delimiter to `payload`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let prefix = payload.len().to_string();
    let mut out = Vec::with_capacity(prefix.len() + DELIMITER.len() + payload.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(DELIMITER);
    out.extend_from_slice(payload);
    out
}

/// Incrementally scan `buf` for a complete frame header.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some(header))` once
/// the prefix and delimiter have been seen, and an error when the header
/// cannot be valid no matter what else arrives. The length prefix accepts
/// the digits `0-9` only.
pub fn scan_header(buf: &[u8]) -> Result<Option<Header>, Error> {
    let window = &buf[..buf.len().min(MAX_HEADER_SIZE)];

    match find_delimiter(window) {
        Some(at) => {
            let digits = &buf[..at];
            if digits.is_empty() {
                return Err(Error::MissingLength);
            }
            let mut payload_len: u64 = 0;
            for &byte in digits {
                if !byte.is_ascii_digit() {
                    return Err(Error::BadLengthByte(byte));
                }
                payload_len = payload_len * 10 + u64::from(byte - b'0');
                if payload_len > MAX_PAYLOAD_SIZE {
                    return Err(Error::LengthTooLarge(payload_len));
                }
            }
            Ok(Some(Header {
                payload_len: payload_len as usize,
                header_len: at + DELIMITER.len(),
            }))
        }
        None => {
            if buf.len() >= MAX_HEADER_SIZE {
                return Err(Error::HeaderTooLong(buf.len()));
            }
            // Digits seen so far must already be valid; fail fast on junk.
            for &byte in buf {
                if !byte.is_ascii_digit() && !DELIMITER.contains(&byte) {
                    return Err(Error::BadLengthByte(byte));
                }
            }
            Ok(None)
        }
    }
}

fn find_delimiter(window: &[u8]) -> Option<usize> {
    window
        .windows(DELIMITER.len())
        .position(|chunk| chunk == DELIMITER)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_prefixes_length() {
        let frame = encode_frame(b"hello");
        assert_eq!(frame, b"5MLENhello");

        let frame = encode_frame(&[]);
        assert_eq!(frame, b"0MLEN");
    }

    #[test]
    fn scan_complete_header() {
        let header = scan_header(b"5MLENhello").unwrap().unwrap();
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.header_len, 5);

        let header = scan_header(b"1024MLEN").unwrap().unwrap();
        assert_eq!(header.payload_len, 1024);
        assert_eq!(header.header_len, 8);
    }

    #[test]
    fn scan_incomplete_header() {
        assert_eq!(scan_header(b"").unwrap(), None);
        assert_eq!(scan_header(b"12").unwrap(), None);
        assert_eq!(scan_header(b"12ML").unwrap(), None);
        assert_eq!(scan_header(b"12MLE").unwrap(), None);
    }

    #[test]
    fn scan_rejects_missing_length() {
        assert!(matches!(scan_header(b"MLEN"), Err(Error::MissingLength)));
    }

    #[test]
    fn scan_rejects_colon_in_prefix() {
        // Byte 58 (':') sorts just after '9'; it is not a digit.
        assert!(matches!(
            scan_header(b"1:MLENx"),
            Err(Error::BadLengthByte(b':'))
        ));
    }

    #[test]
    fn scan_rejects_non_digit_prefix() {
        assert!(matches!(
            scan_header(b"12a4MLEN"),
            Err(Error::BadLengthByte(b'a'))
        ));
        assert!(matches!(scan_header(b"-1"), Err(Error::BadLengthByte(b'-'))));
    }

    #[test]
    fn scan_rejects_unbounded_prefix() {
        // Fourteen digits and still no delimiter: reject, do not wait for more.
        assert!(matches!(
            scan_header(b"99999999999999"),
            Err(Error::HeaderTooLong(14))
        ));
    }

    #[test]
    fn scan_rejects_oversized_length() {
        let frame = format!("{}MLEN", u64::from(u32::MAX) + 1);
        assert!(matches!(
            scan_header(frame.as_bytes()),
            Err(Error::LengthTooLarge(_))
        ));
    }

    #[test]
    fn scan_accepts_max_length() {
        let frame = format!("{}MLEN", u32::MAX);
        let header = scan_header(frame.as_bytes()).unwrap().unwrap();
        assert_eq!(header.payload_len, u32::MAX as usize);
    }

    #[test]
    fn roundtrip_arbitrary_payloads() {
        for payload in [&b""[..], b"x", b"MLEN", &[0u8; 4096]] {
            let frame = encode_frame(payload);
            let header = scan_header(&frame).unwrap().unwrap();
            assert_eq!(header.payload_len, payload.len());
            assert_eq!(&frame[header.header_len..], payload);
        }
    }
}
