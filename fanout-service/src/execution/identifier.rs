// Instance Identifiers
// Builds and parses the composite block_uuid of fanned-out block runs

use serde_json::Value;
use std::collections::BTreeMap;

/// Separates a block uuid from its instance suffix segments
pub const SEGMENT_SEPARATOR: char = ':';

/// Joins per-ancestor parts inside one segment of a custom-id suffix
pub const PART_SEPARATOR: &str = "__";

/// Metadata key an item may set to override its instance identifier
pub const CUSTOM_ID_KEY: &str = "block_uuid";

/// One ancestor's contribution to an instance position
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    /// Uuid of the dynamic ancestor (or the incremental block itself)
    pub ancestor: String,
    pub index: usize,
    /// Per-item metadata the ancestor wrote, if any
    pub metadata: Option<Value>,
}

impl Coordinate {
    pub fn new(ancestor: impl Into<String>, index: usize) -> Self {
        Self {
            ancestor: ancestor.into(),
            index,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata.filter(|m| !m.is_null());
        self
    }

    /// Caller-supplied identifier from the item metadata
    pub fn custom_id(&self) -> Option<String> {
        match self.metadata.as_ref()?.get(CUSTOM_ID_KEY)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Build the uuid of a block instance at the given position.
///
/// Plain positions produce `block:i:j`. When any coordinate carries a custom
/// identifier the suffix becomes `block:i__j:idA__idB`, with each id falling
/// back to its index, so the indexes can still be recovered.
pub fn instance_uuid(block_uuid: &str, coords: &[Coordinate]) -> String {
    if coords.is_empty() {
        return block_uuid.to_string();
    }

    let indexes: Vec<String> = coords.iter().map(|c| c.index.to_string()).collect();
    let custom: Vec<Option<String>> = coords.iter().map(Coordinate::custom_id).collect();

    if custom.iter().all(Option::is_none) {
        return format!("{block_uuid}{SEGMENT_SEPARATOR}{}", indexes.join(":"));
    }

    let ids: Vec<String> = custom
        .into_iter()
        .zip(indexes.iter())
        .map(|(id, index)| id.unwrap_or_else(|| index.clone()))
        .collect();

    format!(
        "{block_uuid}{SEGMENT_SEPARATOR}{}{SEGMENT_SEPARATOR}{}",
        indexes.join(PART_SEPARATOR),
        ids.join(PART_SEPARATOR)
    )
}

/// Uuid of an instance whose position has no coordinates, which happens when
/// every axis of the combination was empty. The suffix is its ordinal so the
/// run is still recognized as an instance.
pub fn placeholder_uuid(block_uuid: &str, ordinal: usize) -> String {
    format!("{block_uuid}{SEGMENT_SEPARATOR}{ordinal}")
}

/// Split an instance uuid into its block uuid and optional suffix
pub fn split_instance_uuid(uuid: &str) -> (&str, Option<&str>) {
    match uuid.split_once(SEGMENT_SEPARATOR) {
        Some((base, suffix)) => (base, Some(suffix)),
        None => (uuid, None),
    }
}

/// The block uuid an instance was cloned from
pub fn base_uuid(uuid: &str) -> &str {
    split_instance_uuid(uuid).0
}

/// Whether the uuid names a fanned-out instance rather than a base run
pub fn is_instance_uuid(uuid: &str) -> bool {
    split_instance_uuid(uuid).1.is_some()
}

/// Recover the ancestor -> index mapping encoded in an instance uuid.
///
/// `keys` are the ancestors present in the instance position, in schema
/// order. Returns `None` when the suffix does not match either encoding.
pub fn decode_indexes(uuid: &str, keys: &[String]) -> Option<BTreeMap<String, usize>> {
    let suffix = split_instance_uuid(uuid).1?;
    if keys.is_empty() {
        // placeholder instance
        return suffix.parse::<usize>().ok().map(|_| BTreeMap::new());
    }

    let zip = |parts: Vec<&str>| -> Option<BTreeMap<String, usize>> {
        if parts.len() != keys.len() {
            return None;
        }
        keys.iter()
            .zip(parts)
            .map(|(key, part)| part.parse::<usize>().ok().map(|i| (key.clone(), i)))
            .collect()
    };

    if let Some(indexes) = zip(suffix.split(SEGMENT_SEPARATOR).collect()) {
        return Some(indexes);
    }

    let (indexes, _ids) = suffix.split_once(SEGMENT_SEPARATOR)?;
    zip(indexes.split(PART_SEPARATOR).collect())
}
