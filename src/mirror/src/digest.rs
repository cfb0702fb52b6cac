//! Content digests in `algorithm:encoded` form.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use stevedore_core::error::MirrorError;

/// A content digest, e.g. `sha256:4fe8…`.
///
/// The encoded part is kept lowercase hex exactly as parsed; equality and
/// hashing operate on the full `algorithm:encoded` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageDigest {
    algorithm: String,
    encoded: String,
}

impl ImageDigest {
    /// Compute the sha256 digest of a byte buffer (manifest bytes, blobs).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            encoded: format!("{:x}", Sha256::digest(bytes)),
        }
    }

    /// The algorithm part (e.g. "sha256").
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The encoded part, without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for ImageDigest {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| MirrorError::BadReference(format!("invalid digest {s:?}")))?;
        match algorithm {
            "sha256" | "sha512" => {}
            _ => {
                return Err(MirrorError::BadReference(format!(
                    "unsupported digest algorithm {algorithm:?} in {s:?}"
                )));
            }
        }
        if encoded.is_empty() || !encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MirrorError::BadReference(format!("invalid digest {s:?}")));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            encoded: encoded.to_lowercase(),
        })
    }
}

impl Serialize for ImageDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ImageDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_parse_and_display() {
        let d: ImageDigest = format!("sha256:{HEX}").parse().unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.encoded(), HEX);
        assert_eq!(d.to_string(), format!("sha256:{HEX}"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<ImageDigest>().is_err());
        assert!("sha256".parse::<ImageDigest>().is_err());
        assert!("sha256:".parse::<ImageDigest>().is_err());
        assert!("md5:abcd".parse::<ImageDigest>().is_err());
        assert!("sha256:not-hex!".parse::<ImageDigest>().is_err());
    }

    #[test]
    fn test_from_bytes() {
        // "hello world" sha256
        let d = ImageDigest::from_bytes(b"hello world");
        assert_eq!(d.encoded(), HEX);
    }

    #[test]
    fn test_serde_round_trip() {
        let d: ImageDigest = format!("sha256:{HEX}").parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"sha256:{HEX}\""));
        let back: ImageDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
