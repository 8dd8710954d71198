//! Needle codec: framing and parsing of a single record.
//!
//! The super block treats a needle as an opaque, self-describing frame. It
//! only asks the codec for sizes, encoding, and header/body parsing; it never
//! interprets payload bytes itself. [`StandardNeedleCodec`] is the concrete
//! implementation shipped with this crate so the container is usable without
//! wiring in an external codec.

use crate::error::NeedleError;
use crate::offset::{round_up_to_padding, PADDING_UNIT};
use byteorder::{ByteOrder, LittleEndian};

/// Status a needle frame carries in its flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Ok,
    Del,
}

/// Parsed needle header, independent of payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub key: i64,
    pub cookie: i64,
    pub data_size: i32,
    pub flag: Flag,
}

/// Small interface a needle codec must satisfy.
///
/// Implementations own the on-disk frame layout; the super block only calls
/// through this trait.
pub trait NeedleCodec {
    /// Fixed size in bytes of the header portion of a frame.
    fn header_size(&self) -> usize;

    /// Largest payload length this codec will frame.
    fn max_frame_size(&self) -> usize;

    /// Byte offset of the flag field within a frame, from frame start.
    fn flag_field_offset(&self) -> usize;

    /// Fixed byte pattern written at `flag_field_offset` to mark a tombstone.
    fn del_flag_bytes(&self) -> &'static [u8];

    /// Compute `(padding, framed_len)` for a payload of `payload_len` bytes.
    fn frame_size(&self, payload_len: usize) -> Result<(usize, usize), NeedleError>;

    /// Encode a full frame (header + payload + trailer + padding) into `dst`.
    fn encode(
        &self,
        dst: &mut Vec<u8>,
        key: i64,
        cookie: i64,
        payload: &[u8],
    ) -> Result<(), NeedleError>;

    /// Parse the header portion of a frame. `bytes` must be at least
    /// `header_size()` long.
    fn parse_header(&self, bytes: &[u8]) -> Result<Header, NeedleError>;

    /// Validate the body (payload + trailer) of a frame against its header.
    fn parse_body(&self, header: &Header, body: &[u8]) -> Result<(), NeedleError>;
}

const MAGIC: [u8; 4] = *b"NDL1";
const TRAILER_SIZE: usize = 4;
const FLAG_OK: u8 = 0;
const FLAG_DEL: u8 = 1;
const DEL_FLAG_BYTES: [u8; 1] = [FLAG_DEL];

/// `magic(4) | key(8) | cookie(8) | data_size(4) | flag(1)` = 25 bytes,
/// followed by the payload and a 4-byte CRC32 trailer, then padding to
/// [`PADDING_UNIT`].
pub struct StandardNeedleCodec {
    max_frame_size: usize,
}

impl StandardNeedleCodec {
    const HEADER_SIZE: usize = 4 + 8 + 8 + 4 + 1;
    const FLAG_FIELD_OFFSET: usize = 24;

    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for StandardNeedleCodec {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl NeedleCodec for StandardNeedleCodec {
    fn header_size(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn flag_field_offset(&self) -> usize {
        Self::FLAG_FIELD_OFFSET
    }

    fn del_flag_bytes(&self) -> &'static [u8] {
        &DEL_FLAG_BYTES
    }

    fn frame_size(&self, payload_len: usize) -> Result<(usize, usize), NeedleError> {
        if payload_len > self.max_frame_size {
            return Err(NeedleError::PayloadTooLarge {
                len: payload_len,
                max: self.max_frame_size,
            });
        }
        let unpadded = Self::HEADER_SIZE + payload_len + TRAILER_SIZE;
        let framed = round_up_to_padding(unpadded as i64) as usize;
        Ok((framed - unpadded, framed))
    }

    fn encode(
        &self,
        dst: &mut Vec<u8>,
        key: i64,
        cookie: i64,
        payload: &[u8],
    ) -> Result<(), NeedleError> {
        let (padding, framed) = self.frame_size(payload.len())?;
        dst.clear();
        dst.reserve(framed);

        dst.extend_from_slice(&MAGIC);
        let mut buf8 = [0u8; 8];
        LittleEndian::write_i64(&mut buf8, key);
        dst.extend_from_slice(&buf8);
        LittleEndian::write_i64(&mut buf8, cookie);
        dst.extend_from_slice(&buf8);
        let mut buf4 = [0u8; 4];
        LittleEndian::write_i32(&mut buf4, payload.len() as i32);
        dst.extend_from_slice(&buf4);
        dst.push(FLAG_OK);

        dst.extend_from_slice(payload);

        let checksum = crc32fast::hash(&dst[..]);
        LittleEndian::write_u32(&mut buf4, checksum);
        dst.extend_from_slice(&buf4);

        dst.resize(dst.len() + padding, 0);
        Ok(())
    }

    fn parse_header(&self, bytes: &[u8]) -> Result<Header, NeedleError> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(NeedleError::Truncated {
                wanted: Self::HEADER_SIZE,
                got: bytes.len(),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(NeedleError::BadHeaderMagic);
        }
        let key = LittleEndian::read_i64(&bytes[4..12]);
        let cookie = LittleEndian::read_i64(&bytes[12..20]);
        let data_size = LittleEndian::read_i32(&bytes[20..24]);
        let flag = match bytes[24] {
            FLAG_OK => Flag::Ok,
            _ => Flag::Del,
        };
        Ok(Header {
            key,
            cookie,
            data_size,
            flag,
        })
    }

    fn parse_body(&self, header: &Header, body: &[u8]) -> Result<(), NeedleError> {
        let data_size = header.data_size.max(0) as usize;
        let wanted = data_size + TRAILER_SIZE;
        if body.len() < wanted {
            return Err(NeedleError::Truncated {
                wanted,
                got: body.len(),
            });
        }
        let trailer_start = data_size;
        let expected = LittleEndian::read_u32(&body[trailer_start..trailer_start + TRAILER_SIZE]);

        let mut hasher = crc32fast::Hasher::new();
        let mut header_bytes = [0u8; StandardNeedleCodec::HEADER_SIZE];
        header_bytes[0..4].copy_from_slice(&MAGIC);
        LittleEndian::write_i64(&mut header_bytes[4..12], header.key);
        LittleEndian::write_i64(&mut header_bytes[12..20], header.cookie);
        LittleEndian::write_i32(&mut header_bytes[20..24], header.data_size);
        header_bytes[24] = match header.flag {
            Flag::Ok => FLAG_OK,
            Flag::Del => FLAG_DEL,
        };
        hasher.update(&header_bytes);
        hasher.update(&body[..data_size]);
        let actual = hasher.finalize();

        if actual != expected {
            return Err(NeedleError::ChecksumMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_roundtrip() {
        let codec = StandardNeedleCodec::default();
        let mut frame = Vec::new();
        codec.encode(&mut frame, 7, 9, b"hello").unwrap();

        let header = codec.parse_header(&frame[..codec.header_size()]).unwrap();
        assert_eq!(header.key, 7);
        assert_eq!(header.cookie, 9);
        assert_eq!(header.data_size, 5);
        assert_eq!(header.flag, Flag::Ok);

        codec
            .parse_body(&header, &frame[codec.header_size()..])
            .unwrap();
    }

    #[test]
    fn frame_size_is_padded() {
        let codec = StandardNeedleCodec::default();
        let (_, framed) = codec.frame_size(5).unwrap();
        assert_eq!(framed % PADDING_UNIT as usize, 0);
    }

    #[test]
    fn checksum_mismatch_detected() {
        let codec = StandardNeedleCodec::default();
        let mut frame = Vec::new();
        codec.encode(&mut frame, 1, 1, b"payload").unwrap();
        // corrupt a payload byte
        let payload_start = codec.header_size();
        frame[payload_start] ^= 0xFF;

        let header = codec.parse_header(&frame[..codec.header_size()]).unwrap();
        let err = codec
            .parse_body(&header, &frame[codec.header_size()..])
            .unwrap_err();
        assert!(matches!(err, NeedleError::ChecksumMismatch));
    }

    #[test]
    fn oversized_payload_rejected() {
        let codec = StandardNeedleCodec::new(4);
        let err = codec.frame_size(5).unwrap_err();
        assert!(matches!(err, NeedleError::PayloadTooLarge { .. }));
    }
}
