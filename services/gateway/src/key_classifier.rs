use serde::Deserialize;

/// Prefix for images stored as uploaded or re-hosted
pub const ORIGINAL_PREFIX: &str = "original-thumbnails/";

/// Prefix for images produced by the resize job
pub const RESIZED_PREFIX: &str = "resized-thumbnails/";

/// Bare folder-marker keys that never represent an asset
const EXCLUDED_KEYS: [&str; 2] = [ORIGINAL_PREFIX, RESIZED_PREFIX];

/// Which leaf namespace a key lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Original,
    Resized,
}

impl Variant {
    pub fn prefix(self) -> &'static str {
        match self {
            Variant::Original => ORIGINAL_PREFIX,
            Variant::Resized => RESIZED_PREFIX,
        }
    }
}

/// Classification of a storage key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyClass {
    /// Folder marker, never listed
    Excluded,
    /// Displayable asset with the caption derived from the key
    Leaf { variant: Variant, caption: String },
    /// Key outside both known prefixes; no caption can be derived
    Unclassified,
}

/// What the listing does with `KeyClass::Unclassified` keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclassifiedPolicy {
    /// List them with no caption
    #[default]
    Keep,
    /// Leave them out of listings
    Exclude,
}

/// Classify a storage key by exact exclusion match, then by leading prefix.
pub fn classify(key: &str) -> KeyClass {
    if EXCLUDED_KEYS.contains(&key) {
        return KeyClass::Excluded;
    }

    for variant in [Variant::Original, Variant::Resized] {
        if let Some(caption) = key.strip_prefix(variant.prefix()) {
            return KeyClass::Leaf {
                variant,
                caption: caption.to_string(),
            };
        }
    }

    KeyClass::Unclassified
}

/// Storage key for a newly ingested original image
pub fn original_key(name: &str) -> String {
    format!("{ORIGINAL_PREFIX}{name}")
}
