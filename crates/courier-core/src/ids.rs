use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountId {
    bytes: [u8; 32],
}

impl AccountId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != 64 {
            return None;
        }
        let decoded = hex::decode(hex_str).ok()?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Some(Self { bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Order-independent hash of the sorted account pair.
pub fn thread_id_for_pair(a: &AccountId, b: &AccountId) -> String {
    let (left, right) = if a.as_bytes() <= b.as_bytes() {
        (a, b)
    } else {
        (b, a)
    };
    let mut hasher = Hasher::new();
    hasher.update(b"courier:thread:dm:v1");
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hasher.finalize().to_hex().to_string()
}
