pub mod analyze;
pub mod executor;
pub mod parser;
pub mod prompt;
pub mod type_spec_enhancer;

pub use analyze::{
    analyze, annotate_columns, apply_annotations, design_mapping, design_tables, Analysis,
    AnalysisBundle, AnalyzeOptions, AnnotationSet, ColumnAnnotation,
};
pub use executor::{ask, complete_with_retry, AskOptions, AskState, QueryResult};
pub use parser::{extract_json_block, extract_query, ExtractedQuery};
pub use prompt::{build_corrective_prompt, build_query_prompt, render_schema};
pub use type_spec_enhancer::enhance_type_spec;
