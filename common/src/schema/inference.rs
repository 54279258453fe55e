use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_MAX_DEPTH: usize = 6;
const MAX_EXAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    /// nested value past the depth limit or of conflicting shape, kept as json text
    Json,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Null => "null",
            ScalarType::Boolean => "boolean",
            ScalarType::Integer => "integer",
            ScalarType::Number => "number",
            ScalarType::String => "string",
            ScalarType::Json => "json",
        }
    }
}

/// shape of a json document, discovered down to a fixed depth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeSpec {
    Scalar {
        types: BTreeSet<ScalarType>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        examples: Vec<Value>,
    },
    Object {
        fields: BTreeMap<String, TypeSpec>,
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        required: BTreeSet<String>,
    },
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Box<TypeSpec>>,
    },
}

impl TypeSpec {
    pub fn scalar(scalar: ScalarType) -> Self {
        TypeSpec::Scalar {
            types: BTreeSet::from([scalar]),
            examples: Vec::new(),
        }
    }

    fn opaque() -> Self {
        Self::scalar(ScalarType::Json)
    }

    fn is_null_only(&self) -> bool {
        matches!(self, TypeSpec::Scalar { types, .. } if types.iter().all(|t| *t == ScalarType::Null))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeSpec::Scalar { .. } => "scalar",
            TypeSpec::Object { .. } => "object",
            TypeSpec::Array { .. } => "array",
        }
    }

    /// compact one-line description, e.g. `string | null` or `array<object>`
    pub fn summary(&self) -> String {
        match self {
            TypeSpec::Scalar { types, .. } => types
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
            TypeSpec::Object { .. } => "object".to_string(),
            TypeSpec::Array { items: Some(items) } => format!("array<{}>", items.summary()),
            TypeSpec::Array { items: None } => "array<unknown>".to_string(),
        }
    }
}

fn scalar_type_of(value: &Value) -> ScalarType {
    match value {
        Value::Null => ScalarType::Null,
        Value::Bool(_) => ScalarType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => ScalarType::Integer,
        Value::Number(_) => ScalarType::Number,
        Value::String(_) => ScalarType::String,
        Value::Array(_) | Value::Object(_) => ScalarType::Json,
    }
}

fn merge_examples(mut lhs: Vec<Value>, rhs: Vec<Value>) -> Vec<Value> {
    for value in rhs {
        if lhs.len() >= MAX_EXAMPLES {
            break;
        }
        if !lhs.contains(&value) {
            lhs.push(value);
        }
    }
    lhs
}

fn merge_scalar_types(lhs: BTreeSet<ScalarType>, rhs: BTreeSet<ScalarType>) -> BTreeSet<ScalarType> {
    let mut merged: BTreeSet<ScalarType> = lhs.union(&rhs).copied().collect();

    // integers widen to number when both are seen
    if merged.contains(&ScalarType::Number) {
        merged.remove(&ScalarType::Integer);
    }

    merged
}

pub fn merge_type_specs(lhs: TypeSpec, rhs: TypeSpec) -> TypeSpec {
    if lhs.is_null_only() && !matches!(rhs, TypeSpec::Scalar { .. }) {
        return rhs;
    }
    if rhs.is_null_only() && !matches!(lhs, TypeSpec::Scalar { .. }) {
        return lhs;
    }

    match (lhs, rhs) {
        (
            TypeSpec::Scalar { types: lt, examples: le },
            TypeSpec::Scalar { types: rt, examples: re },
        ) => TypeSpec::Scalar {
            types: merge_scalar_types(lt, rt),
            examples: merge_examples(le, re),
        },
        (
            TypeSpec::Object { fields: mut lf, required: lr },
            TypeSpec::Object { fields: rf, required: rr },
        ) => {
            for (key, rhs_field) in rf {
                let merged = match lf.remove(&key) {
                    Some(lhs_field) => merge_type_specs(lhs_field, rhs_field),
                    None => rhs_field,
                };
                lf.insert(key, merged);
            }

            // a field is required only if every sample carried it
            let required = lr.intersection(&rr).cloned().collect();

            TypeSpec::Object {
                fields: lf,
                required,
            }
        }
        (TypeSpec::Array { items: li }, TypeSpec::Array { items: ri }) => TypeSpec::Array {
            items: match (li, ri) {
                (Some(l), Some(r)) => Some(Box::new(merge_type_specs(*l, *r))),
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(r),
                (None, None) => None,
            },
        },
        _ => TypeSpec::opaque(),
    }
}

pub fn infer_type_spec(payload: &Value) -> TypeSpec {
    infer_type_spec_with_depth(payload, DEFAULT_MAX_DEPTH)
}

pub fn infer_type_spec_with_depth(payload: &Value, max_depth: usize) -> TypeSpec {
    fn visit(node: &Value, depth: usize, max_depth: usize) -> TypeSpec {
        match node {
            Value::Object(_) | Value::Array(_) if depth >= max_depth => TypeSpec::opaque(),
            Value::Object(obj) => {
                let mut fields = BTreeMap::new();
                let mut required = BTreeSet::new();

                for (key, value) in obj {
                    fields.insert(key.clone(), visit(value, depth + 1, max_depth));
                    if !value.is_null() {
                        required.insert(key.clone());
                    }
                }

                TypeSpec::Object { fields, required }
            }
            Value::Array(arr) => {
                let mut items: Option<TypeSpec> = None;

                for value in arr {
                    let value_spec = visit(value, depth + 1, max_depth);
                    items = Some(match items {
                        None => value_spec,
                        Some(existing) => merge_type_specs(existing, value_spec),
                    });
                }

                TypeSpec::Array {
                    items: items.map(Box::new),
                }
            }
            _ => TypeSpec::Scalar {
                types: BTreeSet::from([scalar_type_of(node)]),
                examples: if node.is_null() {
                    Vec::new()
                } else {
                    vec![node.clone()]
                },
            },
        }
    }

    visit(payload, 0, max_depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_simple_object() {
        let payload = json!({
            "name": "test",
            "age": 42
        });

        let spec = infer_type_spec(&payload);
        let TypeSpec::Object { fields, required } = spec else {
            panic!("expected object");
        };
        assert_eq!(fields["age"].summary(), "integer");
        assert_eq!(fields["name"].summary(), "string");
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn test_infer_array_merges_items() {
        let payload = json!([
            {"name": "alice"},
            {"name": "bob", "age": 30}
        ]);

        let spec = infer_type_spec(&payload);
        let TypeSpec::Array { items: Some(items) } = spec else {
            panic!("expected array with items");
        };
        let TypeSpec::Object { fields, required } = *items else {
            panic!("expected object items");
        };
        assert!(fields.contains_key("age"));
        assert!(required.contains("name"));
        assert!(!required.contains("age"));
    }

    #[test]
    fn test_integer_widens_to_number() {
        let spec = infer_type_spec(&json!([1, 2.5, null]));
        let TypeSpec::Array { items: Some(items) } = spec else {
            panic!("expected array");
        };
        assert_eq!(items.summary(), "null | number");
    }

    #[test]
    fn test_null_then_object_keeps_object() {
        let spec = infer_type_spec(&json!([null, {"a": 1}]));
        let TypeSpec::Array { items: Some(items) } = spec else {
            panic!("expected array");
        };
        assert_eq!(items.kind_name(), "object");
    }

    #[test]
    fn test_conflicting_shapes_become_opaque() {
        let spec = infer_type_spec(&json!([{"a": 1}, [1, 2]]));
        let TypeSpec::Array { items: Some(items) } = spec else {
            panic!("expected array");
        };
        assert_eq!(items.summary(), "json");
    }

    #[test]
    fn test_depth_limit() {
        let payload = json!({"a": {"b": {"c": 1}}});
        let spec = infer_type_spec_with_depth(&payload, 2);
        let TypeSpec::Object { fields, .. } = spec else {
            panic!("expected object");
        };
        let TypeSpec::Object { fields: inner, .. } = &fields["a"] else {
            panic!("expected nested object");
        };
        assert_eq!(inner["b"].summary(), "json");
    }

    #[test]
    fn test_examples_are_capped_and_unique() {
        let spec = infer_type_spec(&json!(["a", "b", "a", "c", "d"]));
        let TypeSpec::Array { items: Some(items) } = spec else {
            panic!("expected array");
        };
        let TypeSpec::Scalar { examples, .. } = *items else {
            panic!("expected scalar");
        };
        assert_eq!(examples, vec![json!("a"), json!("b"), json!("c")]);
    }
}
