//! Framed self-describing binary encoding of primitives.
//!
//! Integers are big-endian. Booleans are the sentinel bytes `0x12` (true)
//! and `0x34` (false) so framing drift is caught at the first misread.
//! Strings, timestamps, and dates carry an explicit present byte (0/1).
//! Encoding is deterministic: identical input yields identical bytes.

use chrono::{DateTime, Utc};

use relwatch_util::errors::RelwatchError;

/// Sentinel byte encoding boolean `true`.
pub const BOOL_TRUE: u8 = 0x12;
/// Sentinel byte encoding boolean `false`.
pub const BOOL_FALSE: u8 = 0x34;

/// Zone id written for every timestamp. Decoding accepts any zone string
/// and normalizes to UTC; the epoch millis are authoritative.
const ZONE_UTC: &str = "UTC";

/// Serializes primitives into a growable buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(if value { BOOL_TRUE } else { BOOL_FALSE });
    }

    /// Length-prefixed byte array.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
    }

    /// Raw bytes without a length prefix.
    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Present byte (0/1) followed by a length-prefixed UTF-8 string.
    pub fn put_string(&mut self, value: Option<&str>) {
        match value {
            None => self.put_u8(0),
            Some(s) => {
                self.put_u8(1);
                self.put_bytes(s.as_bytes());
            }
        }
    }

    /// Present byte, zone-id string, epoch-millis i64.
    pub fn put_timestamp(&mut self, value: Option<DateTime<Utc>>) {
        match value {
            None => self.put_u8(0),
            Some(ts) => {
                self.put_u8(1);
                self.put_string(Some(ZONE_UTC));
                self.put_i64(ts.timestamp_millis());
            }
        }
    }

    /// Present byte, epoch-millis i64.
    pub fn put_date(&mut self, value: Option<DateTime<Utc>>) {
        match value {
            None => self.put_u8(0),
            Some(ts) => {
                self.put_u8(1);
                self.put_i64(ts.timestamp_millis());
            }
        }
    }
}

/// Reads primitives back out of a buffer, tracking the current offset.
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// The offset of the next unread byte; useful in error reports.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RelwatchError> {
        if self.remaining() < n {
            return Err(RelwatchError::decode(
                format!("unexpected end of input, needed {n} bytes, had {}", self.remaining()),
                self.offset,
            ));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, RelwatchError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, RelwatchError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_i32(&mut self) -> Result<i32, RelwatchError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, RelwatchError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_i64(&mut self) -> Result<i64, RelwatchError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }

    pub fn get_u64(&mut self) -> Result<u64, RelwatchError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    /// A raw slice of exactly `len` bytes, without a length prefix.
    pub fn get_slice(&mut self, len: usize) -> Result<&'a [u8], RelwatchError> {
        self.take(len)
    }

    pub fn get_f64(&mut self) -> Result<f64, RelwatchError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_bits(u64::from_be_bytes(buf)))
    }

    pub fn get_bool(&mut self) -> Result<bool, RelwatchError> {
        let offset = self.offset;
        match self.get_u8()? {
            BOOL_TRUE => Ok(true),
            BOOL_FALSE => Ok(false),
            other => Err(RelwatchError::decode(
                format!("invalid boolean byte 0x{other:02x}"),
                offset,
            )),
        }
    }

    /// Length-prefixed byte array.
    pub fn get_bytes(&mut self) -> Result<Vec<u8>, RelwatchError> {
        let offset = self.offset;
        let len = self.get_u32()? as usize;
        if len > self.remaining() {
            return Err(RelwatchError::decode(
                format!("length {len} exceeds remaining input {}", self.remaining()),
                offset,
            ));
        }
        Ok(self.take(len)?.to_vec())
    }

    fn get_present(&mut self) -> Result<bool, RelwatchError> {
        let offset = self.offset;
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RelwatchError::decode(
                format!("invalid present byte 0x{other:02x}"),
                offset,
            )),
        }
    }

    pub fn get_string(&mut self) -> Result<Option<String>, RelwatchError> {
        if !self.get_present()? {
            return Ok(None);
        }
        let offset = self.offset;
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| RelwatchError::decode(format!("invalid UTF-8 string: {e}"), offset))
    }

    /// A string that must be present.
    pub fn get_required_string(&mut self, what: &str) -> Result<String, RelwatchError> {
        let offset = self.offset;
        self.get_string()?
            .ok_or_else(|| RelwatchError::decode(format!("missing required {what}"), offset))
    }

    pub fn get_timestamp(&mut self) -> Result<Option<DateTime<Utc>>, RelwatchError> {
        if !self.get_present()? {
            return Ok(None);
        }
        // The zone id is informational; values are normalized to UTC.
        let _zone = self.get_string()?;
        let offset = self.offset;
        let millis = self.get_i64()?;
        millis_to_datetime(millis, offset).map(Some)
    }

    pub fn get_date(&mut self) -> Result<Option<DateTime<Utc>>, RelwatchError> {
        if !self.get_present()? {
            return Ok(None);
        }
        let offset = self.offset;
        let millis = self.get_i64()?;
        millis_to_datetime(millis, offset).map(Some)
    }
}

fn millis_to_datetime(millis: i64, offset: usize) -> Result<DateTime<Utc>, RelwatchError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        RelwatchError::decode(format!("epoch millis {millis} out of range"), offset)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn integer_roundtrip() {
        let mut enc = Encoder::new();
        enc.put_u8(0xAB);
        enc.put_u16(0xDEAD);
        enc.put_i32(-12345);
        enc.put_i64(i64::MIN);
        enc.put_f64(2.5);

        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.get_u8().unwrap(), 0xAB);
        assert_eq!(dec.get_u16().unwrap(), 0xDEAD);
        assert_eq!(dec.get_i32().unwrap(), -12345);
        assert_eq!(dec.get_i64().unwrap(), i64::MIN);
        assert_eq!(dec.get_f64().unwrap(), 2.5);
        assert!(dec.is_empty());
    }

    #[test]
    fn integers_are_big_endian() {
        let mut enc = Encoder::new();
        enc.put_u16(0x1234);
        assert_eq!(enc.bytes(), &[0x12, 0x34]);

        let mut enc = Encoder::new();
        enc.put_i32(1);
        assert_eq!(enc.bytes(), &[0, 0, 0, 1]);
    }

    #[test]
    fn bool_sentinels() {
        let mut enc = Encoder::new();
        enc.put_bool(true);
        enc.put_bool(false);
        assert_eq!(enc.bytes(), &[0x12, 0x34]);

        let mut dec = Decoder::new(enc.bytes());
        assert!(dec.get_bool().unwrap());
        assert!(!dec.get_bool().unwrap());
    }

    #[test]
    fn bad_bool_byte_is_an_error() {
        let mut dec = Decoder::new(&[0x00]);
        let err = dec.get_bool().unwrap_err();
        assert!(err.to_string().contains("invalid boolean byte"));
    }

    #[test]
    fn string_roundtrip_including_none() {
        let mut enc = Encoder::new();
        enc.put_string(Some("hello"));
        enc.put_string(None);
        enc.put_string(Some(""));

        let mut dec = Decoder::new(enc.bytes());
        assert_eq!(dec.get_string().unwrap().as_deref(), Some("hello"));
        assert_eq!(dec.get_string().unwrap(), None);
        assert_eq!(dec.get_string().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn bad_present_byte_is_an_error() {
        let mut dec = Decoder::new(&[7]);
        assert!(dec.get_string().is_err());
    }

    #[test]
    fn bytes_length_is_validated() {
        let mut enc = Encoder::new();
        enc.put_u32(100);
        enc.put_raw(b"short");
        let mut dec = Decoder::new(enc.bytes());
        let err = dec.get_bytes().unwrap_err();
        assert!(err.to_string().contains("exceeds remaining"));
    }

    #[test]
    fn timestamp_and_date_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2021, 7, 12, 12, 13, 0).unwrap();
        let mut enc = Encoder::new();
        enc.put_timestamp(Some(ts));
        enc.put_timestamp(None);
        enc.put_date(Some(ts));
        enc.put_date(None);

        let mut dec = Decoder::new(enc.bytes());
        assert_eq!(dec.get_timestamp().unwrap(), Some(ts));
        assert_eq!(dec.get_timestamp().unwrap(), None);
        assert_eq!(dec.get_date().unwrap(), Some(ts));
        assert_eq!(dec.get_date().unwrap(), None);
        assert!(dec.is_empty());
    }

    #[test]
    fn encoding_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let encode = || {
            let mut enc = Encoder::new();
            enc.put_string(Some("x"));
            enc.put_timestamp(Some(ts));
            enc.put_bool(true);
            enc.into_bytes()
        };
        assert_eq!(encode(), encode());
    }

    #[test]
    fn offset_tracks_position() {
        let mut enc = Encoder::new();
        enc.put_u16(7);
        enc.put_u8(1);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.offset(), 0);
        dec.get_u16().unwrap();
        assert_eq!(dec.offset(), 2);
        dec.get_u8().unwrap();
        assert_eq!(dec.offset(), 3);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn eof_reports_offset() {
        let mut dec = Decoder::new(&[0x00]);
        dec.get_u8().unwrap();
        match dec.get_i64() {
            Err(RelwatchError::Decode { offset, .. }) => assert_eq!(offset, 1),
            other => panic!("expected decode error, got {other:?}"),
        }
    }
}
