use crate::{
    constants::{HEADER_LEN, MAGIC, VERSION},
    error::ProtoError,
};

/// Packet header (wire format).
///
/// Encoding rules:
/// - Fixed size: exactly `HEADER_LEN` bytes.
/// - Integer fields are little-endian.
///
/// Decode rules:
/// - Requires `buf.len() >= HEADER_LEN`.
/// - Requires `buf[0..2] == MAGIC` and `version == VERSION`.
/// - Requires `buf.len() == HEADER_LEN + payload_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Wire-format version. `decode()` rejects versions != `VERSION`.
    pub version: u8,

    /// Message identifier. `decode()` does not validate it; the codec does.
    pub msg_id: u8,

    /// Payload length in bytes.
    pub payload_len: u32,
}

impl Header {
    /// Header size in bytes for the current wire layout.
    pub const LEN: usize = HEADER_LEN;

    pub fn new(msg_id: u8) -> Self {
        Self {
            version: VERSION,
            msg_id,
            payload_len: 0,
        }
    }

    /// Encode this header into `out`.
    ///
    /// Offsets (bytes):
    /// - 0..2 magic
    /// - 2    version
    /// - 3    msg_id
    /// - 4..8 payload_len (u32 LE)
    pub fn encode_into(&self, out: &mut [u8; HEADER_LEN]) {
        out[0..2].copy_from_slice(&MAGIC);
        out[2] = self.version;
        out[3] = self.msg_id;
        out[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Decode a packet buffer that contains exactly `[Header][Payload]`.
    pub fn decode(buf: &[u8]) -> Result<(Header, &[u8]), ProtoError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtoError::TooShort);
        }
        if buf[0..2] != MAGIC {
            return Err(ProtoError::BadMagic);
        }

        let version = buf[2];
        if version != VERSION {
            return Err(ProtoError::UnsupportedVersion(version));
        }

        let msg_id = buf[3];
        let payload_len = read_u32_le(buf, 4)?;

        if buf.len() != HEADER_LEN + payload_len as usize {
            return Err(ProtoError::LengthMismatch);
        }

        let h = Header {
            version,
            msg_id,
            payload_len,
        };

        Ok((h, &buf[HEADER_LEN..]))
    }
}

fn read_u32_le(buf: &[u8], start: usize) -> Result<u32, ProtoError> {
    let bytes: [u8; 4] = buf
        .get(start..start + 4)
        .ok_or(ProtoError::TooShort)?
        .try_into()
        .map_err(|_| ProtoError::TooShort)?;
    Ok(u32::from_le_bytes(bytes))
}
