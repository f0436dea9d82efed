use serde::{Deserialize, Serialize};

/// Everything a media-transport collaborator needs to later fetch and
/// decrypt a message attachment. Stored verbatim at ingestion time and
/// returned verbatim on lookup; the archive never validates or
/// re-derives any of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub media_type: String,
    pub filename: String,
    pub url: String,
    #[serde(with = "base64_bytes")]
    pub media_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub file_sha256: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Serde adapter: binary columns as base64 strings in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
