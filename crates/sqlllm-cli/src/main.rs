//! SQLLLM CLI
//!
//! - `schema`: print the DDL a database contributes to the prompt
//! - `ask`: answer one question against one database
//! - `bench`: sample a benchmark dataset and write predictions + gold SQL

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use sqlllm_core::{
    generate_sql, run_batch, sample_records, BatchOptions, ExecutionPayload, GenerationRequest,
    GenerationResult, DEFAULT_MAX_ATTEMPTS,
};
use sqlllm_db::{parse_sql_ddl, SqliteDatabase};
use tracing_subscriber::EnvFilter;

mod bench_io;
mod llm;
mod progress;

use llm::{BackendArgs, LlmClient};

#[derive(Parser)]
#[command(name = "sqlllm")]
#[command(
    author,
    version,
    about = "SQLLLM: natural-language questions to SQL with an LLM and bounded retries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schema of a SQLite database as rendered into prompts.
    Schema {
        /// Path to the `.sqlite` file.
        db: PathBuf,
        /// Re-parse the rendered DDL and report what was recognised.
        #[arg(long)]
        check: bool,
    },

    /// Generate (and run) SQL for one question.
    Ask {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        question: String,
        /// Domain knowledge / evidence text added to the prompt.
        #[arg(long)]
        evidence: Option<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_try: usize,
        /// Print the result as JSON instead of a table.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        llm: BackendArgs,
    },

    /// Run the benchmark driver over a random sample of a dataset.
    Bench {
        #[arg(long, default_value = "data/dev.json")]
        data: PathBuf,
        #[arg(long, default_value = "data/dev_databases")]
        db_root: PathBuf,
        #[arg(long, default_value_t = 30)]
        num_sample: usize,
        /// Seed for reproducible sampling (default: random).
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_try: usize,
        /// Benchmark tag embedded in each prediction line.
        #[arg(long, default_value = "bird")]
        tag: String,
        #[arg(long, default_value = "data/dev_sample.json")]
        sample_out: PathBuf,
        #[arg(long, default_value = "predicted/predict_dev.json")]
        pred_out: PathBuf,
        #[arg(long, default_value = "data/dev_gold.sql")]
        gold_out: PathBuf,
        #[command(flatten)]
        llm: BackendArgs,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Schema { db, check } => cmd_schema(&db, check),
        Commands::Ask {
            db,
            question,
            evidence,
            max_try,
            json,
            llm,
        } => cmd_ask(&db, &question, evidence.as_deref(), max_try, json, &llm),
        Commands::Bench {
            data,
            db_root,
            num_sample,
            seed,
            max_try,
            tag,
            sample_out,
            pred_out,
            gold_out,
            llm,
        } => cmd_bench(BenchArgs {
            data,
            db_root,
            num_sample,
            seed,
            max_try,
            tag,
            sample_out,
            pred_out,
            gold_out,
            llm,
        }),
    }
}

fn cmd_schema(db: &Path, check: bool) -> Result<()> {
    let schema = SqliteDatabase::new(db).schema()?;
    let ddl = schema.render();
    println!("{ddl}");

    if check {
        let parsed = parse_sql_ddl(&ddl).map_err(|e| anyhow!("rendered schema does not parse: {e}"))?;
        if parsed.tables.len() != schema.tables.len()
            || parsed.foreign_key_count() != schema.foreign_key_count()
        {
            return Err(anyhow!(
                "rendered schema lost structure: {} tables / {} foreign keys became {} / {}",
                schema.tables.len(),
                schema.foreign_key_count(),
                parsed.tables.len(),
                parsed.foreign_key_count()
            ));
        }
        if parsed != schema {
            eprintln!(
                "{} column details differ after re-parsing (types or defaults are not portable DDL)",
                "warning:".yellow().bold()
            );
        }
        eprintln!(
            "{} {} tables, {} foreign keys",
            "ok".green().bold(),
            parsed.tables.len(),
            parsed.foreign_key_count()
        );
    }
    Ok(())
}

fn cmd_ask(
    db: &Path,
    question: &str,
    evidence: Option<&str>,
    max_try: usize,
    json: bool,
    llm: &BackendArgs,
) -> Result<()> {
    let backend = LlmClient::from_args(llm)?;
    eprintln!("{} {}", "info:".yellow().bold(), backend.status_line());

    let mut request = GenerationRequest::new(db, question).with_max_attempts(max_try);
    if let Some(evidence) = evidence {
        request = request.with_domain_knowledge(evidence);
    }
    let result = generate_sql(&backend, &request)?;

    if json {
        let out = serde_json::json!({
            "sql": result.sql,
            "payload": result.payload,
            "attempts": result.attempt_count(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &GenerationResult) {
    println!("{} {}", "SQL:".green().bold(), result.sql);
    match &result.payload {
        ExecutionPayload::Rows(rows) => {
            for row in rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                println!("  {}", cells.join(" | "));
            }
            println!(
                "  {} {} rows after {} attempt(s)",
                "→".yellow(),
                rows.len(),
                result.attempt_count()
            );
        }
        ExecutionPayload::Empty => {
            println!(
                "  {} query returned no rows after {} attempt(s)",
                "→".yellow(),
                result.attempt_count()
            );
        }
        ExecutionPayload::Fallback(message) => {
            println!("  {} {}", "→".red(), message);
        }
    }
}

struct BenchArgs {
    data: PathBuf,
    db_root: PathBuf,
    num_sample: usize,
    seed: Option<u64>,
    max_try: usize,
    tag: String,
    sample_out: PathBuf,
    pred_out: PathBuf,
    gold_out: PathBuf,
    llm: BackendArgs,
}

fn cmd_bench(args: BenchArgs) -> Result<()> {
    let backend = LlmClient::from_args(&args.llm)?;
    eprintln!("{} {}", "info:".yellow().bold(), backend.status_line());

    let dataset = bench_io::load_dataset(&args.data)?;
    let sample = sample_records(&dataset, args.num_sample, args.seed);
    println!(
        "{} {} of {} records from {}",
        "Sampled".green().bold(),
        sample.len(),
        dataset.len(),
        args.data.display()
    );

    let options = BatchOptions {
        db_root: args.db_root,
        max_attempts: args.max_try,
        tag: args.tag,
    };
    let bar = progress::ProgressBar::new(format!(
        "Generating SQL queries for {} random questions",
        sample.len()
    ));
    println!();
    let report = run_batch(&backend, sample, &options, |done, total| bar.update(done, total));
    bar.finish();
    let report = report?;

    bench_io::save_json(&args.sample_out, &report.records)?;
    bench_io::save_json(&args.pred_out, &report.predictions_json())?;
    bench_io::save_lines(&args.gold_out, &report.gold)?;

    println!(
        "{} {} rows, {} empty, {} fallback ({} LLM calls)",
        "done".green().bold(),
        report.succeeded(),
        report.empty(),
        report.fallback(),
        report.total_attempts()
    );
    for out in [&args.sample_out, &args.pred_out, &args.gold_out] {
        println!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
    }
    Ok(())
}
