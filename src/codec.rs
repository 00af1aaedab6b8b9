//! The on-disk TLV wire format shared by every segment file.
//!
//! A record is one or more fields, each `[tag: 1 byte][length: 1 byte][payload]`.
//! A `Put` is a `Key` field followed by a `Value` field; a `Tombstone` is a
//! lone `Key` field tagged as a tombstone. Fields are never framed, checksummed,
//! or padded: the codec only knows how to read and write exactly one record at
//! a time, starting at a record boundary.

use std::io::{self, Read, Write};

use crate::error::{SegmentError, WriteError};

/// Maximum length, in bytes, of a key or a value.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

const TAG_KEY: u8 = 0;
const TAG_VALUE: u8 = 1;
const TAG_TOMBSTONE: u8 = 2;

/// A single log record: either a live key-value pair or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Put { key: Vec<u8>, value: Vec<u8> },
    Tombstone { key: Vec<u8> },
}

impl Record {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Record {
        Record::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn tombstone(key: impl Into<Vec<u8>>) -> Record {
        Record::Tombstone { key: key.into() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Record::Put { key, .. } => key,
            Record::Tombstone { key } => key,
        }
    }

    /// Serialized size of this record in bytes, per §4.1: `2 + len(key)` for a
    /// tombstone, `4 + len(key) + len(value)` for a put.
    pub fn encoded_len(&self) -> usize {
        match self {
            Record::Put { key, value } => 2 + key.len() + 2 + value.len(),
            Record::Tombstone { key } => 2 + key.len(),
        }
    }

    /// Serialize this record, writing it to `out`. Fails with
    /// [`WriteError::KeyOversize`]/[`WriteError::ValueOversize`] before
    /// writing anything if a field exceeds [`MAX_FIELD_LEN`].
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), WriteError> {
        match self {
            Record::Put { key, value } => {
                if key.len() > MAX_FIELD_LEN {
                    return Err(WriteError::KeyOversize);
                }
                if value.len() > MAX_FIELD_LEN {
                    return Err(WriteError::ValueOversize);
                }
                let mut buf = Vec::with_capacity(self.encoded_len());
                write_field(&mut buf, TAG_KEY, key);
                write_field(&mut buf, TAG_VALUE, value);
                out.write_all(&buf)?;
            }
            Record::Tombstone { key } => {
                if key.len() > MAX_FIELD_LEN {
                    return Err(WriteError::KeyOversize);
                }
                let mut buf = Vec::with_capacity(self.encoded_len());
                write_field(&mut buf, TAG_TOMBSTONE, key);
                out.write_all(&buf)?;
            }
        }
        Ok(())
    }

    /// Parse exactly one record from `src`, which must be positioned at a
    /// record boundary. Returns `Ok(None)` at a clean end-of-stream (no bytes
    /// available before the next tag), or `Err` for any other failure,
    /// including a truncated record (a tag was read but its payload wasn't).
    pub fn read_from<R: Read>(src: &mut R) -> Result<Option<Record>, SegmentError> {
        let mut pending_key: Option<Vec<u8>> = None;
        loop {
            let tag = match read_u8(src)? {
                Some(b) => b,
                None if pending_key.is_none() => return Ok(None),
                None => {
                    return Err(SegmentError::CorruptDB(
                        "truncated record: KEY with no following field".to_string(),
                    ))
                }
            };
            let len = read_required_u8(src)?;
            match tag {
                TAG_KEY => {
                    if pending_key.is_some() {
                        return Err(SegmentError::CorruptDB("KEY after KEY".to_string()));
                    }
                    pending_key = Some(read_payload(src, len)?);
                }
                TAG_VALUE => {
                    let key = pending_key.take().ok_or_else(|| {
                        SegmentError::CorruptDB("VALUE without KEY".to_string())
                    })?;
                    let value = read_payload(src, len)?;
                    return Ok(Some(Record::Put { key, value }));
                }
                TAG_TOMBSTONE => {
                    if pending_key.is_some() {
                        return Err(SegmentError::CorruptDB("TOMBSTONE after KEY".to_string()));
                    }
                    let key = read_payload(src, len)?;
                    return Ok(Some(Record::Tombstone { key }));
                }
                other => {
                    return Err(SegmentError::CorruptDB(format!("unknown tag {}", other)));
                }
            }
        }
    }
}

fn write_field(buf: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    buf.push(tag);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
}

fn read_u8<R: Read>(src: &mut R) -> Result<Option<u8>, SegmentError> {
    let mut b = [0u8; 1];
    match src.read(&mut b)? {
        0 => Ok(None),
        _ => Ok(Some(b[0])),
    }
}

fn read_required_u8<R: Read>(src: &mut R) -> Result<u8, SegmentError> {
    read_u8(src)?.ok_or_else(|| {
        SegmentError::CorruptDB("truncated record: missing length byte".to_string())
    })
}

fn read_payload<R: Read>(src: &mut R, len: u8) -> Result<Vec<u8>, SegmentError> {
    let mut payload = vec![0u8; len as usize];
    src.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SegmentError::CorruptDB("truncated record: short payload".to_string())
        } else {
            SegmentError::IOError(e)
        }
    })?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(r: &Record) -> Record {
        let mut buf = Vec::new();
        r.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        Record::read_from(&mut cursor).unwrap().unwrap()
    }

    #[test]
    fn put_roundtrips() {
        let r = Record::put("key", "value");
        assert_eq!(roundtrip(&r), r);
    }

    #[test]
    fn tombstone_roundtrips() {
        let r = Record::tombstone("key");
        assert_eq!(roundtrip(&r), r);
    }

    #[test]
    fn empty_stream_is_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert_eq!(Record::read_from(&mut cursor).unwrap(), None);
    }

    #[test]
    fn zero_length_fields_are_accepted() {
        let r = Record::put("", "");
        assert_eq!(roundtrip(&r), r);
    }

    #[test]
    fn concatenated_records_parse_in_order() {
        let mut buf = Vec::new();
        Record::put("1", "value").write_to(&mut buf).unwrap();
        Record::put("2", "another").write_to(&mut buf).unwrap();
        Record::tombstone("1").write_to(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(
            Record::read_from(&mut cursor).unwrap(),
            Some(Record::put("1", "value"))
        );
        assert_eq!(
            Record::read_from(&mut cursor).unwrap(),
            Some(Record::put("2", "another"))
        );
        assert_eq!(
            Record::read_from(&mut cursor).unwrap(),
            Some(Record::tombstone("1"))
        );
        assert_eq!(Record::read_from(&mut cursor).unwrap(), None);
    }

    #[test]
    fn key_after_key_is_corrupt() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[TAG_KEY, 1, b'a']);
        buf.extend_from_slice(&[TAG_KEY, 1, b'b']);
        let mut cursor = Cursor::new(buf);
        let err = Record::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, SegmentError::CorruptDB(_)));
    }

    #[test]
    fn value_without_key_is_corrupt() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[TAG_VALUE, 1, b'a']);
        let mut cursor = Cursor::new(buf);
        let err = Record::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, SegmentError::CorruptDB(_)));
    }

    #[test]
    fn tombstone_after_key_is_corrupt() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[TAG_KEY, 1, b'a']);
        buf.extend_from_slice(&[TAG_TOMBSTONE, 1, b'b']);
        let mut cursor = Cursor::new(buf);
        let err = Record::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, SegmentError::CorruptDB(_)));
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[99, 1, b'a']);
        let mut cursor = Cursor::new(buf);
        let err = Record::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, SegmentError::CorruptDB(_)));
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[TAG_KEY, 5, b'a', b'b']);
        let mut cursor = Cursor::new(buf);
        let err = Record::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, SegmentError::CorruptDB(_)));
    }

    #[test]
    fn oversize_key_rejected_before_any_write() {
        let key = vec![0u8; MAX_FIELD_LEN + 1];
        let r = Record::put(key, "value");
        let mut buf = Vec::new();
        let err = r.write_to(&mut buf).unwrap_err();
        assert!(matches!(err, WriteError::KeyOversize));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversize_value_rejected_before_any_write() {
        let value = vec![0u8; MAX_FIELD_LEN + 1];
        let r = Record::put("key", value);
        let mut buf = Vec::new();
        let err = r.write_to(&mut buf).unwrap_err();
        assert!(matches!(err, WriteError::ValueOversize));
        assert!(buf.is_empty());
    }

    #[test]
    fn encoded_len_matches_actual_write_size() {
        let r = Record::put("hello", "world");
        let mut buf = Vec::new();
        r.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), r.encoded_len());

        let t = Record::tombstone("hello");
        let mut buf = Vec::new();
        t.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), t.encoded_len());
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_prop(key in proptest::collection::vec(proptest::num::u8::ANY, 1..=MAX_FIELD_LEN),
                           value in proptest::collection::vec(proptest::num::u8::ANY, 1..=MAX_FIELD_LEN)) {
            let r = Record::put(key, value);
            let mut buf = Vec::new();
            r.write_to(&mut buf).unwrap();
            let mut cursor = Cursor::new(buf);
            let parsed = Record::read_from(&mut cursor).unwrap().unwrap();
            proptest::prop_assert_eq!(parsed, r);
        }

        #[test]
        fn tombstone_roundtrip_prop(key in proptest::collection::vec(proptest::num::u8::ANY, 1..=MAX_FIELD_LEN)) {
            let r = Record::tombstone(key);
            let mut buf = Vec::new();
            r.write_to(&mut buf).unwrap();
            let mut cursor = Cursor::new(buf);
            let parsed = Record::read_from(&mut cursor).unwrap().unwrap();
            proptest::prop_assert_eq!(parsed, r);
        }
    }
}
