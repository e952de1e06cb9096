// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The error taxonomy of the texture streaming subsystem.
//!
//! Per-texture errors never propagate into rendering code; a texture in any
//! error state simply renders as a fallback. The variants here exist so the
//! policy engine can tell the sticky conditions (a confirmed-missing asset, a
//! malformed image) from the transient ones (a timed-out fetch, a corrupt
//! cache entry that is simply re-fetched).

use std::fmt;

/// Everything that can go wrong with a single texture.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureError {
    /// The authoritative source confirmed no data exists for this id.
    /// Sticky until an explicit forced refetch clears it.
    MissingAsset,
    /// A fetch received no bytes for the configured idle window. Non-sticky;
    /// retried on the next priority pass if the texture is still wanted.
    FetchTimeout,
    /// On-disk cache data failed validation. Treated as a cache miss.
    CorruptCacheEntry {
        /// What the validation found.
        detail: String,
    },
    /// Decoded dimensions exceed the hard maximum. Treated like a missing
    /// asset so the decoder and GPU layer never see the data.
    OversizedImage {
        /// Decoded width in texels.
        width: u32,
        /// Decoded height in texels.
        height: u32,
    },
    /// The decoded image violates a structural constraint other than size
    /// (non-power-of-two dimensions, bad component count, short buffer).
    MalformedImage(String),
    /// An error surfaced by a collaborator (GPU backend, transport).
    Backend(String),
}

impl TextureError {
    /// Whether this error permanently parks the texture until a forced
    /// refetch. Sticky errors are surfaced to consumers as "use a fallback".
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            TextureError::MissingAsset
                | TextureError::OversizedImage { .. }
                | TextureError::MalformedImage(_)
        )
    }
}

impl fmt::Display for TextureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureError::MissingAsset => {
                write!(f, "The authoritative source holds no data for this asset.")
            }
            TextureError::FetchTimeout => {
                write!(f, "Fetch received no bytes within the idle window.")
            }
            TextureError::CorruptCacheEntry { detail } => {
                write!(f, "Cache entry failed validation: {detail}")
            }
            TextureError::OversizedImage { width, height } => {
                write!(f, "Image dimensions {width}x{height} exceed the hard maximum.")
            }
            TextureError::MalformedImage(detail) => {
                write!(f, "Malformed image: {detail}")
            }
            TextureError::Backend(detail) => {
                write!(f, "Collaborator reported an error: {detail}")
            }
        }
    }
}

impl std::error::Error for TextureError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_classification_matches_taxonomy() {
        assert!(TextureError::MissingAsset.is_sticky());
        assert!(TextureError::OversizedImage {
            width: 4096,
            height: 4096
        }
        .is_sticky());
        assert!(TextureError::MalformedImage("short buffer".into()).is_sticky());
        assert!(!TextureError::FetchTimeout.is_sticky());
        assert!(!TextureError::CorruptCacheEntry {
            detail: "truncated".into()
        }
        .is_sticky());
        assert!(!TextureError::Backend("device lost".into()).is_sticky());
    }

    #[test]
    fn display_names_the_failing_condition() {
        let err = TextureError::OversizedImage {
            width: 8192,
            height: 64,
        };
        assert_eq!(
            format!("{err}"),
            "Image dimensions 8192x64 exceed the hard maximum."
        );

        let err = TextureError::CorruptCacheEntry {
            detail: "record points past end of data file".into(),
        };
        assert_eq!(
            format!("{err}"),
            "Cache entry failed validation: record points past end of data file"
        );
    }
}
