/// Magic bytes at the beginning of every packet.
/// Used to quickly reject unrelated or corrupted data.
pub const MAGIC: [u8; 2] = *b"DS";

/// Wire-format protocol version.
/// Bump this only for breaking changes to the header layout or message formats.
pub const VERSION: u8 = 1;

/// Fixed header length in bytes (wire format).
pub const HEADER_LEN: usize = 8;
