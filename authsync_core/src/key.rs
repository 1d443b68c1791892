//! SSH public key records as they appear in an authorized-keys store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::KeyTreeError;

/// Prefix shared by the canonical text form of every [`KeyAlgorithm`].
const ALGORITHM_PREFIX: &str = "ssh-";

/// The closed set of supported key types.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyAlgorithm {
    Dsa,
    Ecdsa,
    EcdsaSk,
    Ed25519,
    Ed25519Sk,
    Rsa,
}

impl KeyAlgorithm {
    pub const ALL: [KeyAlgorithm; 6] = [
        KeyAlgorithm::Dsa,
        KeyAlgorithm::Ecdsa,
        KeyAlgorithm::EcdsaSk,
        KeyAlgorithm::Ed25519,
        KeyAlgorithm::Ed25519Sk,
        KeyAlgorithm::Rsa,
    ];

    /// Upper-case enumeration name, e.g. `ECDSA_SK`.
    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Dsa => "DSA",
            KeyAlgorithm::Ecdsa => "ECDSA",
            KeyAlgorithm::EcdsaSk => "ECDSA_SK",
            KeyAlgorithm::Ed25519 => "ED25519",
            KeyAlgorithm::Ed25519Sk => "ED25519_SK",
            KeyAlgorithm::Rsa => "RSA",
        }
    }

    /// Looks an algorithm up by its bare name (`ed25519`, `ECDSA SK`, ...).
    ///
    /// Matching is case-insensitive and spaces are read as underscores.
    pub fn from_name(name: &str) -> Result<Self, KeyTreeError> {
        let normalized = name.to_uppercase().replace(' ', "_");
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.name() == normalized)
            .ok_or_else(|| KeyTreeError::InvalidAlgorithm(name.to_owned()))
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ALGORITHM_PREFIX}{}", self.name().to_lowercase())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = KeyTreeError;

    /// Accepts the canonical `ssh-<name>` token as well as a bare name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = match s.get(..ALGORITHM_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(ALGORITHM_PREFIX) => {
                &s[ALGORITHM_PREFIX.len()..]
            }
            _ => s,
        };
        Self::from_name(bare).map_err(|_| KeyTreeError::InvalidAlgorithm(s.to_owned()))
    }
}

/// One SSH public key: algorithm, key material and an optional comment.
///
/// Material and comment lose trailing whitespace on construction; leading
/// whitespace of the comment is kept as written.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct KeyRecord {
    algorithm: KeyAlgorithm,
    material: String,
    comment: Option<String>,
}

impl KeyRecord {
    pub fn new(
        algorithm: KeyAlgorithm,
        material: impl Into<String>,
        comment: Option<String>,
    ) -> Self {
        let material = material.into().trim_end().to_owned();
        let comment = comment.map(|c| c.trim_end().to_owned());
        Self {
            algorithm,
            material,
            comment,
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

impl fmt::Display for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.material)?;
        if let Some(comment) = &self.comment {
            write!(f, " {comment}")?;
        }
        Ok(())
    }
}

impl FromStr for KeyRecord {
    type Err = KeyTreeError;

    /// Parses `"<algorithm> <material>[ <comment>]"`.
    ///
    /// Tokens are separated by single spaces; everything after the second
    /// separator is the comment.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.splitn(3, ' ');
        let algorithm = parts.next().unwrap_or_default();
        let material = parts.next().unwrap_or_default();
        if algorithm.is_empty() || material.trim_end().is_empty() {
            return Err(KeyTreeError::malformed(
                0,
                format!("{line:?} is not a valid ssh key"),
            ));
        }
        let algorithm = algorithm.parse::<KeyAlgorithm>()?;
        let comment = parts
            .next()
            .map(str::trim_end)
            .filter(|c| !c.is_empty())
            .map(str::to_owned);
        Ok(Self::new(algorithm, material, comment))
    }
}

impl Serialize for KeyRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let line = String::deserialize(deserializer)?;
        line.parse().map_err(de::Error::custom)
    }
}
