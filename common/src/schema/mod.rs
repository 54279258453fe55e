pub mod hints;
pub mod inference;
pub mod json_schema;
pub mod mapping;
pub mod model;

pub use hints::{derive_field_hints, FieldHints};
pub use inference::{infer_type_spec, ScalarType, TypeSpec};
pub use json_schema::to_json_schema;
pub use mapping::{ColumnSource, MappedTable, RowMapping, TableMapping};
pub use model::{quote_ident, ColumnSpec, ForeignKey, Profile, SchemaSet, TableSpec, ValueRange};
