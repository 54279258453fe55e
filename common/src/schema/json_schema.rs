use crate::schema::inference::{ScalarType, TypeSpec};
use serde_json::{json, Map, Value};

/// render an inferred type spec as json schema draft 2020-12
#[tracing::instrument(skip(spec), fields(title = ?title))]
pub fn to_json_schema(spec: &TypeSpec, title: Option<&str>) -> Value {
    tracing::debug!("converting type spec to json schema format");

    let mut result = convert(spec);

    if let Value::Object(map) = &mut result {
        map.insert(
            "$schema".to_string(),
            json!("https://json-schema.org/draft/2020-12/schema"),
        );
        if let Some(t) = title {
            map.insert("title".to_string(), json!(t));
        }
    }

    result
}

fn convert(spec: &TypeSpec) -> Value {
    match spec {
        TypeSpec::Scalar { types, examples } => {
            let mut result = Map::new();

            // opaque values carry no type constraint
            let names: Vec<&str> = types
                .iter()
                .filter(|t| **t != ScalarType::Json)
                .map(|t| t.as_str())
                .collect();

            if types.contains(&ScalarType::Json) {
                result.insert(
                    "description".to_string(),
                    json!("nested value stored as json text"),
                );
            } else if names.len() == 1 {
                result.insert("type".to_string(), json!(names[0]));
            } else if !names.is_empty() {
                result.insert("type".to_string(), json!(names));
            }

            if !examples.is_empty() {
                result.insert("examples".to_string(), json!(examples));
            }

            Value::Object(result)
        }
        TypeSpec::Object { fields, required } => {
            let properties: Map<String, Value> = fields
                .iter()
                .map(|(key, value)| (key.clone(), convert(value)))
                .collect();

            let mut result = json!({
                "type": "object",
                "properties": properties,
            });

            if !required.is_empty() {
                result["required"] = json!(required);
            }

            result
        }
        TypeSpec::Array { items } => {
            let mut result = json!({ "type": "array" });
            if let Some(items) = items {
                result["items"] = convert(items);
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::inference::infer_type_spec;
    use serde_json::json;

    #[test]
    fn test_simple_string_schema() {
        let spec = infer_type_spec(&json!("hello"));
        let result = to_json_schema(&spec, None);

        assert_eq!(result["$schema"], "https://json-schema.org/draft/2020-12/schema");
        assert_eq!(result["type"], "string");
        assert_eq!(result["examples"], json!(["hello"]));
    }

    #[test]
    fn test_object_schema_with_properties() {
        let spec = infer_type_spec(&json!({"name": "ada", "age": 36, "nick": null}));
        let result = to_json_schema(&spec, Some("person"));

        assert_eq!(result["title"], "person");
        assert_eq!(result["type"], "object");
        assert_eq!(result["properties"]["name"]["type"], "string");
        assert_eq!(result["properties"]["age"]["type"], "integer");
        assert_eq!(result["properties"]["nick"]["type"], "null");
        assert_eq!(result["required"], json!(["age", "name"]));
    }

    #[test]
    fn test_array_schema() {
        let result = to_json_schema(&infer_type_spec(&json!([1.5, 2])), None);

        assert_eq!(result["type"], "array");
        assert_eq!(result["items"]["type"], "number");
    }

    #[test]
    fn test_multiple_types() {
        let result = to_json_schema(&infer_type_spec(&json!([true, "x"])), None);

        assert_eq!(result["items"]["type"], json!(["boolean", "string"]));
    }

    #[test]
    fn test_opaque_has_no_type() {
        let result = to_json_schema(&infer_type_spec(&json!([{"a": 1}, 3])), None);

        assert!(result["items"].get("type").is_none());
        assert!(result["items"]["description"].is_string());
    }
}
