#![forbid(unsafe_code)]
//! Encoding, varint, and buffer utilities shared by the log, the stores and the indexes.

pub mod ord {
    //! Order-preserving encoders used for index keys.

    const SIGN_BIT: u64 = 1 << 63;

    /// Appends `v` in big-endian order.
    pub fn put_u64(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a signed integer so that byte order matches numeric order.
    pub fn put_i64(dst: &mut Vec<u8>, v: i64) {
        put_u64(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Appends a double so that byte order matches numeric order (NaN sorts last).
    pub fn put_f64(dst: &mut Vec<u8>, v: f64) {
        let bits = v.to_bits();
        let encoded = if bits & SIGN_BIT != 0 {
            !bits
        } else {
            bits ^ SIGN_BIT
        };
        put_u64(dst, encoded);
    }

    /// Appends a string terminated so that prefixes sort before extensions.
    pub fn put_str(dst: &mut Vec<u8>, s: &str) {
        for &byte in s.as_bytes() {
            if byte == 0 {
                dst.extend_from_slice(&[0, 0xff]);
            } else {
                dst.push(byte);
            }
        }
        dst.extend_from_slice(&[0, 0]);
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::types::{PenumbraError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(PenumbraError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(PenumbraError::Corruption("varint exceeds 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(PenumbraError::Corruption("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        encode_u64(((v << 1) ^ (v >> 63)) as u64, out);
    }

    /// Decodes a ZigZag varint.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod buf {
    //! A slice-backed reader that reports truncation as corruption.

    use crate::types::{PenumbraError, Result};

    use super::var;

    /// Sequential reader over a byte slice.
    #[derive(Debug)]
    pub struct Reader<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Reader<'a> {
        /// Starts reading at offset zero.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Current offset.
        pub fn position(&self) -> usize {
            self.off
        }

        /// Bytes left to read.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Whether every byte has been consumed.
        pub fn is_empty(&self) -> bool {
            self.remaining() == 0
        }

        /// Takes the next `n` bytes.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(PenumbraError::Corruption("reader offset overflow"))?;
            let slice = self
                .buf
                .get(self.off..end)
                .ok_or(PenumbraError::Corruption("buffer truncated"))?;
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u16.
        pub fn u16(&mut self) -> Result<u16> {
            let mut raw = [0u8; 2];
            raw.copy_from_slice(self.take(2)?);
            Ok(u16::from_be_bytes(raw))
        }

        /// Reads a big-endian u32.
        pub fn u32(&mut self) -> Result<u32> {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(self.take(4)?);
            Ok(u32::from_be_bytes(raw))
        }

        /// Reads a big-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(self.take(8)?);
            Ok(u64::from_be_bytes(raw))
        }

        /// Reads an unsigned varint.
        pub fn var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a ZigZag varint.
        pub fn var_i64(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Reads a u32-length-prefixed UTF-8 string.
        pub fn string(&mut self) -> Result<String> {
            let len = self.u32()? as usize;
            let bytes = self.take(len)?;
            String::from_utf8(bytes.to_vec())
                .map_err(|_| PenumbraError::Corruption("string is not valid UTF-8"))
        }
    }

    /// Appends a u32-length-prefixed UTF-8 string.
    pub fn put_string(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u32).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_edges() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut out = Vec::new();
            var::encode_u64(v, &mut out);
            let mut off = 0;
            assert_eq!(var::decode_u64(&out, &mut off).unwrap(), v);
            assert_eq!(off, out.len());
        }
        let mut off = 0;
        assert!(var::decode_u64(&[0x80, 0x80], &mut off).is_err());
    }

    #[test]
    fn zigzag_negative_values() {
        for v in [0i64, -1, 1, i64::MIN, i64::MAX, -300] {
            let mut out = Vec::new();
            var::encode_i64(v, &mut out);
            let mut off = 0;
            assert_eq!(var::decode_i64(&out, &mut off).unwrap(), v);
        }
    }

    #[test]
    fn ordered_encodings_sort_numerically() {
        let mut values = vec![-5.5f64, 3.0, -0.0, 100.25, -1000.0];
        let mut encoded: Vec<(Vec<u8>, f64)> = values
            .iter()
            .map(|v| {
                let mut out = Vec::new();
                ord::put_f64(&mut out, *v);
                (out, *v)
            })
            .collect();
        encoded.sort_by(|a, b| a.0.cmp(&b.0));
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let sorted: Vec<f64> = encoded.into_iter().map(|(_, v)| v).collect();
        assert_eq!(sorted, values);

        let mut a = Vec::new();
        let mut b = Vec::new();
        ord::put_str(&mut a, "ab");
        ord::put_str(&mut b, "abc");
        assert!(a < b);
    }

    #[test]
    fn reader_reports_truncation() {
        let mut reader = buf::Reader::new(&[0, 0, 0, 5, b'h', b'i']);
        assert!(matches!(
            reader.string(),
            Err(crate::types::PenumbraError::Corruption(_))
        ));
        let mut reader = buf::Reader::new(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(reader.u64().unwrap(), 0x0102030405060708);
        assert_eq!(reader.u8().unwrap(), 9);
        assert!(reader.is_empty());
    }
}
