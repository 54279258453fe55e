use crate::error::AttemptError;
use crate::llm::message::Message;
use crate::schema::hints::FieldHints;
use crate::schema::model::{ColumnSpec, SchemaSet, TableSpec};
use serde_json::Value;

const MAX_SAMPLE_ITEMS: usize = 3;
const MAX_SAMPLE_STRING: usize = 200;

pub const QUERY_SYSTEM_PROMPT: &str =
    "you translate questions about a sqlite database into one read-only sql query.\n\n\
     rules:\n\
     - write exactly one SELECT statement (a WITH ... SELECT is fine) in the sqlite dialect.\n\
     - use only the tables and columns listed in the schema. never invent names.\n\
     - join a child table to its parent through the listed references.\n\
     - when a column lists example values, match the user's words against those spellings.\n\
     - put the query in a ```sql fenced block.\n\
     - put a one or two sentence plain-language explanation in an ```explanation fenced block.\n\
     - no other fenced blocks.";

pub const LAYOUT_SYSTEM_PROMPT: &str =
    "you design flat relational sqlite schemas for json documents. \
     output only one ```json fenced block, no commentary.";

pub const MAPPING_SYSTEM_PROMPT: &str =
    "you describe how json documents map onto sqlite tables. \
     output only one ```json fenced block, no commentary.";

pub const ANNOTATION_SYSTEM_PROMPT: &str =
    "you document sqlite columns for an assistant that writes queries. \
     output only one ```json fenced block, no commentary.";

fn render_column(column: &ColumnSpec, schema: &SchemaSet) -> String {
    let mut line = if column.description.trim().is_empty() {
        format!("{}: {}", column.name, column.sql_type.trim())
    } else {
        format!(
            "{}: {} — {}",
            column.name,
            column.sql_type.trim(),
            column.description.trim()
        )
    };

    if let Some(examples) = column.example_values.as_ref().filter(|e| !e.is_empty()) {
        line.push_str(&format!(" [examples: {}]", examples.join(", ")));
    }

    if let Some(range) = &column.range {
        if range.exceptions.is_empty() {
            line.push_str(&format!(" [range: {}..{}]", range.min, range.max));
        } else {
            let also: Vec<&str> = range.exceptions.iter().map(|s| s.as_str()).collect();
            line.push_str(&format!(
                " [range: {}..{} (also: {})]",
                range.min,
                range.max,
                also.join(", ")
            ));
        }
    }

    if let Some(fk) = &column.foreign_key {
        // name the target column only when it is itself visible
        let target = schema.table(&fk.table);
        let target_column_visible = target
            .and_then(|t| t.column(&fk.column))
            .map(|c| c.visible_to_llm)
            .unwrap_or(false);
        let table_name = target.map(|t| t.name.as_str()).unwrap_or(fk.table.as_str());

        if target_column_visible {
            line.push_str(&format!(" [references: {}.{}]", table_name, fk.column));
        } else {
            line.push_str(&format!(" [references: {}]", table_name));
        }
    }

    line
}

fn render_table(table: &TableSpec, schema: &SchemaSet) -> Option<String> {
    let columns: Vec<String> = table
        .visible_columns()
        .map(|c| format!("  - {}", render_column(c, schema)))
        .collect();

    if columns.is_empty() {
        return None;
    }

    let mut header = format!("table {}", table.name);
    if table.name.eq_ignore_ascii_case(&schema.main_table) {
        header.push_str(" (main table)");
    } else if let Some(parent) = table.parent_name() {
        header.push_str(&format!(" (many rows per {} row)", parent));
    }
    if !table.description.trim().is_empty() {
        header.push_str(&format!(": {}", table.description.trim()));
    }

    Some(format!("{}\n{}", header, columns.join("\n")))
}

/// schema text shown to the model; hidden columns never appear
pub fn render_schema(schema: &SchemaSet) -> String {
    schema
        .tree_order()
        .into_iter()
        .filter_map(|t| render_table(t, schema))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// conversation prefix for one question: system rules + schema, then the question
pub fn build_query_prompt(question: &str, schema: &SchemaSet) -> Vec<Message> {
    let system = format!(
        "{}\n\ndatabase schema:\n{}",
        QUERY_SYSTEM_PROMPT,
        render_schema(schema)
    );

    vec![Message::system(system), Message::user(question)]
}

/// user turn explaining why the previous attempt was rejected
pub fn build_corrective_prompt(failed_sql: Option<&str>, error: &AttemptError) -> String {
    match (error, failed_sql) {
        (AttemptError::Extraction(e), _) => format!(
            "your previous reply could not be used: {}.\n\
             reply again with the query in a ```sql fenced block and the explanation in an \
             ```explanation fenced block.",
            e
        ),
        (AttemptError::Execution(e), Some(sql)) => format!(
            "the previous query failed.\n\nsql:\n```sql\n{}\n```\n\nerror ({}): {}\n\n\
             write a corrected query that answers the original question, using only the \
             tables and columns in the schema. reply with a ```sql block and an \
             ```explanation block.",
            sql, e.kind, e.message
        ),
        (AttemptError::Execution(e), None) => format!(
            "the previous query failed.\n\nerror ({}): {}\n\n\
             write a corrected query that answers the original question. reply with a \
             ```sql block and an ```explanation block.",
            e.kind, e.message
        ),
    }
}

/// shorten a sample document for prompts: long arrays and strings are cut
pub fn abridge_sample(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_SAMPLE_ITEMS)
                .map(abridge_sample)
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), abridge_sample(v)))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > MAX_SAMPLE_STRING => {
            let cut: String = s.chars().take(MAX_SAMPLE_STRING).collect();
            Value::String(format!("{}...", cut))
        }
        other => other.clone(),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn build_layout_prompt(type_spec: &Value, hints: &FieldHints, sample: &Value) -> String {
    let mut hint_lines = Vec::new();

    if !hints.collections.is_empty() {
        hint_lines.push(format!(
            "arrays of objects (child table candidates): {}",
            hints.collections.join(", ")
        ));
    }
    if !hints.timestamps.is_empty() {
        hint_lines.push(format!("timestamp candidates: {}", hints.timestamps.join(", ")));
    }
    if !hints.categories.is_empty() {
        hint_lines.push(format!("category candidates: {}", hints.categories.join(", ")));
    }

    let hints_text = if hint_lines.is_empty() {
        "no notable fields detected".to_string()
    } else {
        hint_lines.join("\n")
    };

    format!(
        "design sqlite tables that hold documents shaped like the sample below.\n\
         - one main table holds one row per top-level record.\n\
         - each array of objects becomes a child table with a foreign key to its parent table.\n\
         - each table has at most one parent. no many-to-many junction tables.\n\
         - give every table that has children an integer key column the children can reference.\n\
         - flatten nested objects into prefixed columns (address_city, address_zip).\n\
         - arrays of scalars become a child table with one value column.\n\
         - identifiers are snake_case; types are INTEGER, REAL or TEXT. dates are iso TEXT.\n\
         - give every table and column a short description.\n\n\
         reply with json of this shape:\n\
         ```json\n\
         {{\"main_table\": \"orders\", \"tables\": [\n  \
         {{\"name\": \"orders\", \"description\": \"...\", \"columns\": [\n    \
         {{\"name\": \"id\", \"sql_type\": \"INTEGER\", \"description\": \"...\"}}]}},\n  \
         {{\"name\": \"order_items\", \"description\": \"...\", \"columns\": [\n    \
         {{\"name\": \"order_id\", \"sql_type\": \"INTEGER\", \"description\": \"...\", \
         \"foreign_key\": {{\"table\": \"orders\", \"column\": \"id\"}}}}]}}]}}\n\
         ```\n\n\
         type specification:\n{}\n\nhints:\n{}\n\nsample:\n{}",
        pretty(type_spec),
        hints_text,
        pretty(&abridge_sample(sample))
    )
}

pub fn build_mapping_prompt(schema: &SchemaSet, sample: &Value) -> String {
    let schema_json = serde_json::to_value(schema).unwrap_or(Value::Null);

    format!(
        "describe where every column's value comes from in the sample document.\n\
         - list every table once. \"path\" locates the table's records: from the document root \
         for the main table, from each parent record for child tables. use \"\" when the \
         record is the value itself. an array at the path yields one record per element.\n\
         - column sources:\n  \
         {{\"source\": \"field\", \"path\": \"a.b\"}} - dotted path inside the record\n  \
         {{\"source\": \"parent\", \"column\": \"id\"}} - copy a column of the parent row\n  \
         {{\"source\": \"row_key\"}} - generated 1-based integer key\n  \
         {{\"source\": \"index\"}} - position of the record in its array\n  \
         {{\"source\": \"value\"}} - the record itself (arrays of scalars)\n\
         - foreign key columns use the parent source; key columns that children reference use row_key \
         unless the document already has a unique id.\n\n\
         reply with json of this shape:\n\
         ```json\n\
         {{\"tables\": [{{\"table\": \"orders\", \"path\": \"orders\", \"columns\": {{\
         \"id\": {{\"source\": \"row_key\"}}, \"customer\": {{\"source\": \"field\", \"path\": \"customer.name\"}}}}}}]}}\n\
         ```\n\n\
         schema:\n{}\n\nsample:\n{}",
        pretty(&schema_json),
        pretty(&abridge_sample(sample))
    )
}

pub fn build_annotation_prompt(schema: &SchemaSet, sample: &Value) -> String {
    let schema_json = serde_json::to_value(schema).unwrap_or(Value::Null);

    format!(
        "annotate every column for an assistant that turns questions into sql.\n\
         - description: one short sentence on what the column means and its format.\n\
         - visible_to_llm: false for surrogate keys and bookkeeping columns a user would never \
         ask about; foreign key columns stay visible so joins remain possible.\n\
         - profile: {{\"kind\": \"distinct\", \"limit\": 12}} for low-cardinality labels \
         (status, country, category), {{\"kind\": \"range\"}} for numbers and dates, \
         omit otherwise.\n\n\
         reply with json of this shape:\n\
         ```json\n\
         {{\"columns\": [{{\"table\": \"orders\", \"column\": \"status\", \"description\": \"...\", \
         \"visible_to_llm\": true, \"profile\": {{\"kind\": \"distinct\", \"limit\": 12}}}}]}}\n\
         ```\n\n\
         schema:\n{}\n\nsample:\n{}",
        pretty(&schema_json),
        pretty(&abridge_sample(sample))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionError, ExecutionErrorKind, ExtractionError};
    use crate::schema::hints::derive_field_hints;
    use crate::schema::inference::infer_type_spec;
    use crate::schema::json_schema::to_json_schema;
    use crate::schema::model::ColumnSpec;
    use serde_json::json;

    fn travel_schema() -> SchemaSet {
        SchemaSet::new(
            "bookings",
            vec![
                TableSpec::new(
                    "bookings",
                    vec![
                        ColumnSpec::new("booking_ref", "TEXT", "public booking code"),
                        ColumnSpec::new("secret_ledger_key", "INTEGER", "internal key").hidden(),
                        ColumnSpec::new("payment_token_xq", "TEXT", "card token")
                            .hidden()
                            .with_examples(["tok_visa_4242", "tok_amex_0005"]),
                    ],
                )
                .with_description("one row per booking"),
                TableSpec::new(
                    "flights",
                    vec![
                        ColumnSpec::new("booking_ledger", "INTEGER", "owning booking")
                            .references("bookings", "secret_ledger_key"),
                        ColumnSpec::new("destination", "TEXT", "arrival city")
                            .with_examples(["Paris", "Rome"]),
                        ColumnSpec::new("fare", "REAL", "ticket price").with_range("19.5", "840"),
                    ],
                ),
                TableSpec::new(
                    "audit_trail",
                    vec![ColumnSpec::new("hidden_actor_zz", "TEXT", "who changed it").hidden()],
                ),
            ],
        )
    }

    fn all_text(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_hidden_columns_never_leak() {
        let schema = travel_schema();
        let messages = build_query_prompt("which bookings went to Paris?", &schema);
        let text = all_text(&messages);

        for table in &schema.tables {
            for column in table.columns.iter().filter(|c| !c.visible_to_llm) {
                assert!(!text.contains(&column.name), "leaked {}", column.name);
                for example in column.example_values.iter().flatten() {
                    assert!(!text.contains(example.as_str()), "leaked {}", example);
                }
            }
        }
    }

    #[test]
    fn test_table_without_visible_columns_is_omitted() {
        let text = render_schema(&travel_schema());
        assert!(!text.contains("audit_trail"));
    }

    #[test]
    fn test_reference_to_hidden_key_names_only_table() {
        let text = render_schema(&travel_schema());
        assert!(text.contains("booking_ledger: INTEGER — owning booking [references: bookings]"));
    }

    #[test]
    fn test_reference_mentions_omitted_table() {
        let mut schema = travel_schema();
        schema.tables[0].columns[0].visible_to_llm = false;

        let text = render_schema(&schema);
        assert!(!text.contains("table bookings"));
        assert!(text.contains("[references: bookings]"));
    }

    #[test]
    fn test_column_rendering_with_hints() {
        let text = render_schema(&travel_schema());
        assert!(text.contains("table bookings (main table): one row per booking"));
        assert!(text.contains("table flights (many rows per bookings row)"));
        assert!(text.contains("  - destination: TEXT — arrival city [examples: Paris, Rome]"));
        assert!(text.contains("  - fare: REAL — ticket price [range: 19.5..840]"));
        assert!(text.contains("  - booking_ref: TEXT — public booking code\n"));
    }

    #[test]
    fn test_range_exceptions_render() {
        let mut schema = travel_schema();
        let fare = schema.tables[1].column_mut("fare").unwrap();
        fare.range
            .as_mut()
            .unwrap()
            .exceptions
            .insert("waived".to_string());

        let text = render_schema(&schema);
        assert!(text.contains("[range: 19.5..840 (also: waived)]"));
    }

    #[test]
    fn test_question_is_final_user_turn() {
        let messages = build_query_prompt("flights to Paris in March", &travel_schema());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, crate::llm::MessageRole::System);
        assert_eq!(messages[1], Message::user("flights to Paris in March"));
    }

    #[test]
    fn test_corrective_prompt_carries_engine_message() {
        let error = AttemptError::Execution(ExecutionError::new(
            ExecutionErrorKind::UnknownColumn,
            "no such column: arrival_gate",
        ));
        let text = build_corrective_prompt(Some("SELECT arrival_gate FROM flights"), &error);

        assert!(text.contains("SELECT arrival_gate FROM flights"));
        assert!(text.contains("no such column: arrival_gate"));
    }

    #[test]
    fn test_corrective_prompt_for_missing_fence() {
        let error = AttemptError::Extraction(ExtractionError::NoSqlBlock);
        let text = build_corrective_prompt(None, &error);

        assert!(text.contains(&error.to_string()));
        assert!(text.contains("model output did not contain a ```sql fenced block"));
        assert!(text.contains("reply again with the query in a ```sql fenced block"));
    }

    #[test]
    fn test_abridge_sample() {
        let long = "x".repeat(500);
        let sample = json!({"items": [1, 2, 3, 4, 5], "note": long});
        let abridged = abridge_sample(&sample);

        assert_eq!(abridged["items"], json!([1, 2, 3]));
        assert!(abridged["note"].as_str().unwrap().ends_with("..."));
    }

    #[test]
    fn test_build_layout_prompt() {
        let payload = json!({
            "traveller": "ada",
            "created_at": "2023-01-01",
            "flights": [{"to": "Paris"}]
        });

        let spec = infer_type_spec(&payload);
        let hints = derive_field_hints(&spec);
        let prompt = build_layout_prompt(&to_json_schema(&spec, None), &hints, &payload);

        assert!(prompt.contains("type specification:"));
        assert!(prompt.contains("timestamp candidates: created_at"));
        assert!(prompt.contains("child table candidates): flights"));
        assert!(prompt.contains("\"main_table\": \"orders\""));
    }

    #[test]
    fn test_build_mapping_prompt_lists_sources() {
        let prompt = build_mapping_prompt(&travel_schema(), &json!({"ref": "AB12"}));
        assert!(prompt.contains("\"source\": \"row_key\""));
        assert!(prompt.contains("secret_ledger_key"));
    }
}
