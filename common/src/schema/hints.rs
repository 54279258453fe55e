use super::inference::{ScalarType, TypeSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?$").unwrap()
});

/// field paths worth calling out to the model when it lays out tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldHints {
    /// date/time fields, by name or by iso-looking examples
    pub timestamps: Vec<String>,
    /// low-cardinality label fields (status, category, type, ...)
    pub categories: Vec<String>,
    /// arrays of objects, i.e. child table candidates
    pub collections: Vec<String>,
}

impl FieldHints {
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() && self.categories.is_empty() && self.collections.is_empty()
    }
}

fn looks_like_timestamp(key: &str, examples: &[Value]) -> bool {
    let lowered = key.to_lowercase();
    if lowered.contains("date")
        || lowered.contains("time")
        || lowered.contains("updated")
        || lowered.contains("created")
        || lowered.ends_with("_at")
    {
        return true;
    }

    !examples.is_empty()
        && examples
            .iter()
            .all(|v| v.as_str().map(|s| ISO_DATE_REGEX.is_match(s)).unwrap_or(false))
}

fn looks_like_category(key: &str) -> bool {
    let lowered = key.to_lowercase();
    ["status", "category", "type", "kind", "tag", "group", "folder", "state", "class"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

pub fn derive_field_hints(spec: &TypeSpec) -> FieldHints {
    let mut timestamps = BTreeSet::new();
    let mut categories = BTreeSet::new();
    let mut collections = BTreeSet::new();

    fn walk(
        spec: &TypeSpec,
        path: &[String],
        timestamps: &mut BTreeSet<String>,
        categories: &mut BTreeSet<String>,
        collections: &mut BTreeSet<String>,
    ) {
        match spec {
            TypeSpec::Object { fields, .. } => {
                for (key, value) in fields {
                    let mut full_path = path.to_vec();
                    full_path.push(key.clone());
                    let joined = full_path.join(".");

                    if let TypeSpec::Scalar { types, examples } = value {
                        if types.contains(&ScalarType::String) || types.contains(&ScalarType::Integer) {
                            if looks_like_timestamp(key, examples) {
                                timestamps.insert(joined.clone());
                            } else if types.contains(&ScalarType::String) && looks_like_category(key) {
                                categories.insert(joined.clone());
                            }
                        }
                    }

                    walk(value, &full_path, timestamps, categories, collections);
                }
            }
            TypeSpec::Array { items: Some(items) } => {
                if matches!(items.as_ref(), TypeSpec::Object { .. }) {
                    collections.insert(if path.is_empty() {
                        "[]".to_string()
                    } else {
                        path.join(".")
                    });
                }

                let mut new_path = path.to_vec();
                new_path.push("[]".to_string());
                walk(items, &new_path, timestamps, categories, collections);
            }
            _ => {}
        }
    }

    walk(spec, &[], &mut timestamps, &mut categories, &mut collections);

    FieldHints {
        timestamps: timestamps.into_iter().collect(),
        categories: categories.into_iter().collect(),
        collections: collections.into_iter().collect(),
    }
}
