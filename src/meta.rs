use serde::{Deserialize, Serialize};

use crate::codec::CompressionMode;

/// Name of the out-of-band metadata entry appended after the body entry.
pub const META_ENTRY_NAME: &str = "tarvault.meta.json";

/// Default body entry name before the codec suffix is applied.
pub const DEFAULT_INSIDE_NAME: &str = "payload.tar";

/// The metadata record stored as the archive's final entry: everything the
/// integrity checker needs to re-derive and compare the content digest.
/// Exactly one per archive, written only after the body entry and its
/// padding are fully flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub inside_filename: String,
    pub compression_mode: Option<CompressionMode>,
    pub hash_algorithm: Option<String>,
    pub hash_value: Option<String>,
    pub creation_time: i64,
    pub uncompressed_archive_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_write_rate: Option<f64>,
}

impl ArchiveMeta {
    pub fn new(
        inside_filename: String,
        compression_mode: Option<CompressionMode>,
        creation_time: i64,
    ) -> Self {
        ArchiveMeta {
            inside_filename,
            compression_mode,
            hash_algorithm: None,
            hash_value: None,
            creation_time,
            uncompressed_archive_size: 0,
            io_write_rate: None,
        }
    }

    /// Default inside-entry name for the codec: `payload.tar` plus suffix.
    pub fn inside_name_for(mode: Option<CompressionMode>) -> String {
        match mode {
            None => DEFAULT_INSIDE_NAME.to_string(),
            Some(mode) => format!("{}{}", DEFAULT_INSIDE_NAME, mode.suffix()),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod test_meta {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let mut meta = ArchiveMeta::new(
            ArchiveMeta::inside_name_for(Some(CompressionMode::Gzip)),
            Some(CompressionMode::Gzip),
            1700000000,
        );
        meta.hash_algorithm = Some("sha256".to_string());
        meta.hash_value = Some("00ff".to_string());
        meta.uncompressed_archive_size = 1234;

        let parsed = ArchiveMeta::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn no_compression_serializes_as_null() {
        let meta = ArchiveMeta::new(ArchiveMeta::inside_name_for(None), None, 0);
        let json = String::from_utf8(meta.to_json().unwrap()).unwrap();
        assert!(json.contains("\"compression_mode\":null"));
        assert!(json.contains("\"inside_filename\":\"payload.tar\""));
        // The optional rate is omitted entirely when absent.
        assert!(!json.contains("io_write_rate"));
    }

    #[test]
    fn inside_names_carry_codec_suffix() {
        assert_eq!(ArchiveMeta::inside_name_for(None), "payload.tar");
        assert_eq!(
            ArchiveMeta::inside_name_for(Some(CompressionMode::Bzip2)),
            "payload.tar.bz2"
        );
        assert_eq!(
            ArchiveMeta::inside_name_for(Some(CompressionMode::Zstd)),
            "payload.tar.zst"
        );
    }
}
