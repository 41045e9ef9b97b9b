//! Opaque cursor tokens: JSON, then URL-safe base64 without padding.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use super::PageError;

/// A resumable position in a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cursor {
    /// A notification position or an aggregate version.
    Position(u64),
    /// Per-application boundaries of a merged listing. Items at or above
    /// an application's boundary lie before the cursor in newest-first
    /// order.
    Merged(BTreeMap<String, u64>),
}

impl Cursor {
    /// Encode as an opaque token.
    ///
    /// # Errors
    ///
    /// Returns [`PageError::Codec`] if the cursor cannot be serialized.
    pub fn encode(&self) -> Result<String, PageError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode an opaque token.
    ///
    /// # Errors
    ///
    /// Returns [`PageError::InvalidCursor`] for anything [`encode`](Self::encode)
    /// did not produce.
    pub fn decode(token: &str) -> Result<Self, PageError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| PageError::InvalidCursor(token.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|_| PageError::InvalidCursor(token.to_string()))
    }

    /// Decode a token that must hold a single position.
    pub(crate) fn decode_position(token: &str) -> Result<u64, PageError> {
        match Self::decode(token)? {
            Self::Position(position) => Ok(position),
            Self::Merged(_) => Err(PageError::InvalidCursor(token.to_string())),
        }
    }

    /// Decode a token that must hold merged boundaries.
    pub(crate) fn decode_merged(token: &str) -> Result<BTreeMap<String, u64>, PageError> {
        match Self::decode(token)? {
            Self::Merged(boundaries) => Ok(boundaries),
            Self::Position(_) => Err(PageError::InvalidCursor(token.to_string())),
        }
    }
}
