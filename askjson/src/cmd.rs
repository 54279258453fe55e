use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::agent::{analyze, ask, AnalysisBundle, AnalyzeOptions, AskOptions, QueryResult};
use common::llm::{build_client, LlmClient, LlmConfig};
use common::store::{Store, StoreOptions, DEFAULT_ROW_CAP};
use common::tracing::init_tracing;
use common::AskJsonError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

const MAX_CELL_WIDTH: usize = 40;

#[derive(Parser)]
#[command(name = "askjson")]
#[command(about = "ask questions about json documents in plain language", long_about = None)]
pub struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn", env = "ASKJSON_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LlmArgs {
    /// LLM provider: openai, anthropic or ollama
    #[arg(long, env = "ASKJSON_LLM_PROVIDER")]
    provider: Option<String>,

    /// Model name (default depends on the provider)
    #[arg(long, env = "ASKJSON_LLM_MODEL")]
    model: Option<String>,

    /// Provider API base URL
    #[arg(long, env = "ASKJSON_LLM_BASE_URL")]
    base_url: Option<String>,
}

impl LlmArgs {
    fn client(self) -> Result<Arc<dyn LlmClient>> {
        let config = LlmConfig::resolve(self.provider, self.model, self.base_url)?;
        tracing::info!(llm = %config.label(), "using llm");
        Ok(build_client(&config)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Derive a schema bundle (tables + row mapping) from a sample document
    Analyze {
        /// Sample JSON document
        #[arg(short, long)]
        input: PathBuf,

        /// Bundle output path
        #[arg(short, long)]
        output: PathBuf,

        /// Directory for the markdown analysis report
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Add LLM-written descriptions to the inferred type spec
        #[arg(long, default_value = "false")]
        describe_types: bool,

        /// Maximum LLM attempts per analysis step
        #[arg(long, default_value = "2")]
        max_attempts: usize,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Answer a question about a JSON document
    Ask {
        /// Schema bundle written by `analyze`
        #[arg(short, long)]
        bundle: PathBuf,

        /// JSON document to query
        #[arg(short, long)]
        data: PathBuf,

        /// Corrective round-trips after the first attempt
        #[arg(long, default_value = "1")]
        max_retries: usize,

        /// Maximum rows returned
        #[arg(long, default_value_t = DEFAULT_ROW_CAP)]
        row_cap: usize,

        /// Print the full result as JSON
        #[arg(long, default_value = "false")]
        json: bool,

        #[command(flatten)]
        llm: LlmArgs,

        /// The question, in plain language
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let _guard = init_tracing("askjson", &self.log_level)?;

        match self.command {
            Commands::Analyze {
                input,
                output,
                report_dir,
                describe_types,
                max_attempts,
                llm,
            } => {
                let options = AnalyzeOptions {
                    describe_types,
                    max_attempts,
                };
                run_analyze(input, output, report_dir, options, llm).await
            }
            Commands::Ask {
                bundle,
                data,
                max_retries,
                row_cap,
                json,
                llm,
                question,
            } => {
                let question = question.join(" ");
                let options = AskOptions { max_retries };
                run_ask(&bundle, &data, &question, row_cap, json, options, llm).await
            }
        }
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid json", path.display()))
}

async fn run_analyze(
    input: PathBuf,
    output: PathBuf,
    report_dir: Option<PathBuf>,
    options: AnalyzeOptions,
    llm: LlmArgs,
) -> Result<()> {
    let sample = read_json(&input)?;
    let llm = llm.client()?;

    let span = tracing::info_span!("analyze", input = %input.display());
    let analysis = analyze(llm, sample, &options).instrument(span).await?;

    analysis.bundle.write(&output)?;
    println!("wrote schema bundle to {}", output.display());

    if let Some(dir) = report_dir {
        let path = analysis.report.save(&dir)?;
        println!("wrote analysis report to {}", path.display());
    }

    for table in analysis.bundle.schema.tree_order() {
        let rows = analysis.report.row_counts.get(&table.name).copied().unwrap_or(0);
        println!(
            "  {} ({} columns, {} sample rows)",
            table.name,
            table.columns.len(),
            rows
        );
    }

    Ok(())
}

async fn run_ask(
    bundle_path: &Path,
    data_path: &Path,
    question: &str,
    row_cap: usize,
    json: bool,
    options: AskOptions,
    llm: LlmArgs,
) -> Result<()> {
    let bundle = AnalysisBundle::read(bundle_path)
        .with_context(|| format!("failed to load bundle {}", bundle_path.display()))?;
    let data = read_json(data_path)?;

    let mut store = Store::create_with(&bundle.schema, StoreOptions { row_cap })?;
    let counts = store.load(&bundle.mapping, &data)?;
    tracing::info!(tables = counts.len(), "loaded data");

    let schema = store.profile(&bundle.schema)?;
    let llm = llm.client()?;

    match ask(question, &schema, llm.as_ref(), &store, &options).await {
        Ok(result) if json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(AskJsonError::BudgetExceeded {
            attempts,
            last_sql,
            last_error,
        }) => {
            if let Some(sql) = &last_sql {
                eprintln!("last sql:\n{}\n", sql);
            }
            anyhow::bail!("no usable query after {} attempts: {}", attempts, last_error)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_result(result: &QueryResult) {
    if !result.explanation.is_empty() {
        println!("{}\n", result.explanation);
    }
    println!("{}\n", result.sql);
    print!("{}", render_table(&result.columns, &result.rows));

    let noun = if result.rows.len() == 1 { "row" } else { "rows" };
    if result.truncated {
        println!("({} {}, truncated)", result.rows.len(), noun);
    } else {
        println!("({} {})", result.rows.len(), noun);
    }
}

fn display_cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if text.chars().count() > MAX_CELL_WIDTH {
        let cut: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

/// plain aligned text table
fn render_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(display_cell).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .filter_map(|row| row.get(i))
                .map(|c| c.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(columns.iter().map(String::as_str).collect()));
    out.push('\n');
    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&line(dashes.iter().map(String::as_str).collect()));
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }

    out
}
