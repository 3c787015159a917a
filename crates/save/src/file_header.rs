// ---------------------------------------------------------------------------
// file_header – checkpoint file header with magic bytes, version, checksum
// ---------------------------------------------------------------------------
//
// Header format (24 bytes, fixed-size, little-endian):
//   [0..4]   Magic bytes: "MONC"
//   [4..8]   Format version (u32)
//   [8..12]  Flags (u32: bit 0 = lz4-compressed payload)
//   [12..16] Simulation day of the checkpoint (u32)
//   [16..20] Uncompressed payload size (u32)
//   [20..24] xxHash32 checksum of the payload bytes following the header
//
// On save: encode -> compress -> prepend header (checksum of stored bytes).
// On load: check magic -> validate version and checksum -> strip header.

use xxhash_rust::xxh32::xxh32;

/// Magic bytes identifying a checkpoint file.
pub const MAGIC: [u8; 4] = *b"MONC";

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Current header format version.
pub const HEADER_FORMAT_VERSION: u32 = 1;

/// Flag bit: payload is lz4-compressed.
pub const FLAG_COMPRESSED: u32 = 1;

const XXHASH_SEED: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub format_version: u32,
    pub flags: u32,
    pub day: u32,
    pub uncompressed_size: u32,
    pub checksum: u32,
}

/// Wrap payload bytes with a checkpoint header.
pub fn wrap_with_header(payload: &[u8], day: u32, uncompressed_size: u32, flags: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&HEADER_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&day.to_le_bytes());
    out.extend_from_slice(&uncompressed_size.to_le_bytes());
    out.extend_from_slice(&xxh32(payload, XXHASH_SEED).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parse and validate the header; returns it together with the payload.
pub fn unwrap_header(bytes: &[u8]) -> Result<(FileHeader, &[u8]), String> {
    if bytes.len() < 4 || bytes[..4] != MAGIC {
        return Err("not a checkpoint file (missing magic bytes)".to_string());
    }
    if bytes.len() < HEADER_SIZE {
        return Err(format!(
            "checkpoint truncated: {} bytes, header needs {}",
            bytes.len(),
            HEADER_SIZE
        ));
    }

    let read_u32 = |offset: usize| -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    };

    let header = FileHeader {
        format_version: read_u32(4),
        flags: read_u32(8),
        day: read_u32(12),
        uncompressed_size: read_u32(16),
        checksum: read_u32(20),
    };

    if header.format_version > HEADER_FORMAT_VERSION {
        return Err(format!(
            "checkpoint format version {} is newer than supported ({})",
            header.format_version, HEADER_FORMAT_VERSION
        ));
    }

    let payload = &bytes[HEADER_SIZE..];
    let checksum = xxh32(payload, XXHASH_SEED);
    if checksum != header.checksum {
        return Err(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x} (corrupt checkpoint)",
            header.checksum, checksum
        ));
    }

    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let payload = b"soil state".to_vec();
        let wrapped = wrap_with_header(&payload, 42, payload.len() as u32, 0);
        assert_eq!(wrapped.len(), HEADER_SIZE + payload.len());

        let (header, restored) = unwrap_header(&wrapped).unwrap();
        assert_eq!(header.day, 42);
        assert_eq!(header.format_version, HEADER_FORMAT_VERSION);
        assert_eq!(restored, payload.as_slice());
    }

    #[test]
    fn test_missing_magic_rejected() {
        assert!(unwrap_header(b"XXXXrest").is_err());
        assert!(unwrap_header(b"MO").is_err());
    }

    #[test]
    fn test_truncated_header_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 4]);
        assert!(unwrap_header(&bytes).is_err());
    }

    #[test]
    fn test_corruption_detected() {
        let payload = vec![7u8; 64];
        let mut wrapped = wrap_with_header(&payload, 1, 64, 0);
        // Flip one payload byte.
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0xFF;
        let err = unwrap_header(&wrapped).unwrap_err();
        assert!(err.contains("checksum"), "{err}");
    }

    #[test]
    fn test_newer_version_rejected() {
        let payload = b"x".to_vec();
        let mut wrapped = wrap_with_header(&payload, 0, 1, 0);
        wrapped[4..8].copy_from_slice(&(HEADER_FORMAT_VERSION + 1).to_le_bytes());
        let err = unwrap_header(&wrapped).unwrap_err();
        assert!(err.contains("newer"), "{err}");
    }
}
