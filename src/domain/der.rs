//! Just enough DER to read and write the receipt payload: definite lengths,
//! single-byte tags, unsigned integers and string types.

use super::receipt::ReceiptError;

pub(crate) const TAG_INTEGER: u8 = 0x02;
pub(crate) const TAG_OCTET_STRING: u8 = 0x04;
pub(crate) const TAG_UTF8_STRING: u8 = 0x0c;
pub(crate) const TAG_IA5_STRING: u8 = 0x16;
pub(crate) const TAG_SEQUENCE: u8 = 0x30;
pub(crate) const TAG_SET: u8 = 0x31;

/// Longest length prefix accepted, in bytes.
const MAX_LENGTH_OCTETS: usize = 4;

fn malformed(message: impl Into<String>) -> ReceiptError {
    ReceiptError::Malformed(message.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tlv<'a> {
    pub tag: u8,
    pub contents: &'a [u8],
}

pub(crate) struct DerReader<'a> {
    input: &'a [u8],
}

impl<'a> DerReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn read(&mut self) -> Result<Tlv<'a>, ReceiptError> {
        let (&tag, rest) = self
            .input
            .split_first()
            .ok_or_else(|| malformed("truncated tag"))?;
        if tag & 0x1f == 0x1f {
            return Err(malformed(format!("unsupported multi-byte tag {tag:#04x}")));
        }

        let (&first, mut rest) = rest
            .split_first()
            .ok_or_else(|| malformed("truncated length"))?;
        let len = if first < 0x80 {
            first as usize
        } else {
            let octets = (first & 0x7f) as usize;
            if octets == 0 || octets > MAX_LENGTH_OCTETS {
                return Err(malformed("unsupported length encoding"));
            }
            if rest.len() < octets {
                return Err(malformed("truncated length"));
            }
            let len = rest[..octets]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | b as usize);
            rest = &rest[octets..];
            len
        };

        if rest.len() < len {
            return Err(malformed(format!(
                "value of {len} bytes overruns input of {} bytes",
                rest.len()
            )));
        }
        let (contents, remaining) = rest.split_at(len);
        self.input = remaining;
        Ok(Tlv { tag, contents })
    }

    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8], ReceiptError> {
        let tlv = self.read()?;
        if tlv.tag != tag {
            return Err(malformed(format!(
                "expected tag {tag:#04x}, found {:#04x}",
                tlv.tag
            )));
        }
        Ok(tlv.contents)
    }
}

pub(crate) fn decode_unsigned(bytes: &[u8]) -> Result<u64, ReceiptError> {
    let digits = match bytes {
        [] => return Err(malformed("empty integer")),
        [first, ..] if first & 0x80 != 0 => return Err(malformed("negative integer")),
        [0, rest @ ..] if !rest.is_empty() => rest,
        _ => bytes,
    };
    if digits.len() > 8 {
        return Err(malformed("integer does not fit in 64 bits"));
    }
    Ok(digits.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

pub(crate) fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    let mut out = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

pub(crate) fn write_tlv(out: &mut Vec<u8>, tag: u8, contents: &[u8]) {
    out.push(tag);
    let len = contents.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(contents);
}

pub(crate) fn tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contents.len() + 6);
    write_tlv(&mut out, tag, contents);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_lengths() {
        let short = tlv(TAG_OCTET_STRING, &[1, 2, 3]);
        assert_eq!(short, vec![0x04, 0x03, 1, 2, 3]);

        let payload = vec![0xaa; 300];
        let long = tlv(TAG_OCTET_STRING, &payload);
        assert_eq!(&long[..4], &[0x04, 0x82, 0x01, 0x2c]);

        let mut reader = DerReader::new(&long);
        assert_eq!(reader.expect(TAG_OCTET_STRING).unwrap(), payload.as_slice());
        assert!(reader.is_empty());
    }

    #[test]
    fn test_unsigned_integers_keep_sign_bit_clear() {
        assert_eq!(encode_unsigned(0), vec![0]);
        assert_eq!(encode_unsigned(127), vec![0x7f]);
        assert_eq!(encode_unsigned(128), vec![0, 0x80]);
        assert_eq!(encode_unsigned(u64::MAX).len(), 9);

        for value in [0, 1, 127, 128, 1701, 65_535, u64::MAX] {
            assert_eq!(decode_unsigned(&encode_unsigned(value)).unwrap(), value);
        }
    }

    #[test]
    fn test_rejects_negative_and_oversized_integers() {
        assert!(decode_unsigned(&[0xff]).is_err());
        assert!(decode_unsigned(&[]).is_err());
        assert!(decode_unsigned(&[1; 9]).is_err());
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = DerReader::new(&[0x04, 0x05, 1, 2]);
        assert!(matches!(reader.read(), Err(ReceiptError::Malformed(_))));

        let mut reader = DerReader::new(&[0x04]);
        assert!(reader.read().is_err());

        let mut reader = DerReader::new(&[0x04, 0x80]);
        assert!(reader.read().is_err());
    }

    #[test]
    fn test_expect_reports_wrong_tag() {
        let bytes = tlv(TAG_INTEGER, &[1]);
        let mut reader = DerReader::new(&bytes);
        let err = reader.expect(TAG_SET).unwrap_err();
        assert!(err.to_string().contains("expected tag 0x31"));
    }
}
