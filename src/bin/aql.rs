//! Command-line front end for compiling and running AQL queries.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use aql::backend::sqlite::SqliteProvider;
use aql::backend::{PermissionProvider, StaticPermissions};
use aql::query::profile::profile_snapshot;
use aql::query::Dialect;
use aql::{AqlConfig, AqlService};

#[derive(Parser, Debug)]
#[command(
    name = "aql",
    version,
    about = "Compile and run repository item queries",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, env = "AQL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the SQL and parameters a query compiles to.
    Explain(ExplainCmd),
    /// Create the item schema in a SQLite database.
    Init {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
    /// Run a query against a SQLite database and print one row per line.
    Run(RunCmd),
}

#[derive(Args, Debug)]
struct ExplainCmd {
    #[arg(value_name = "QUERY")]
    query: String,

    #[arg(long, help = "Target dialect (overrides the config file)")]
    dialect: Option<Dialect>,
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(value_name = "QUERY")]
    query: String,

    #[arg(long, help = "Stream rows through a cursor instead of buffering")]
    lazy: bool,

    #[arg(long, help = "Apply restricted-edition capabilities")]
    restricted: bool,

    #[arg(
        long,
        value_name = "repo1,repo2",
        value_delimiter = ',',
        help = "Only return rows from these repositories (lazy mode)"
    )]
    repos: Option<Vec<String>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aql=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AqlConfig::load(path)?,
        None => AqlConfig::default(),
    };
    match cli.command {
        Command::Explain(cmd) => {
            let config = AqlConfig {
                dialect: cmd.dialect.unwrap_or(config.dialect),
                ..config
            };
            let compiled = aql::explain(&cmd.query, &config)?;
            match cli.format {
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "dialect": compiled.dialect,
                        "sql": compiled.sql,
                        "params": compiled.params,
                        "columns": compiled.column_names(),
                    });
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                OutputFormat::Text => {
                    println!("{}", compiled.sql);
                    for (index, param) in compiled.params.iter().enumerate() {
                        println!("  ?{} = {param}", index + 1);
                    }
                }
            }
        }
        Command::Init { db_path } => {
            SqliteProvider::open(&db_path)?.create_schema()?;
            println!("initialized {}", db_path.display());
        }
        Command::Run(cmd) => run_query(cmd, config, cli.format)?,
    }
    if let Some(snapshot) = profile_snapshot(false) {
        eprintln!("{snapshot:?}");
    }
    Ok(())
}

fn run_query(cmd: RunCmd, config: AqlConfig, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(SqliteProvider::open(&cmd.db_path)?);
    let service = AqlService::new(provider, config);
    let mut permissions = StaticPermissions::for_edition(cmd.restricted);
    if let Some(repos) = cmd.repos {
        permissions = permissions.with_readable_repos(repos);
    }
    let print = |row: &aql::query::ResultRow| -> Result<(), Box<dyn Error>> {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(row)?),
            OutputFormat::Text => {
                let cells: Vec<String> = row.values().iter().map(|v| v.to_text()).collect();
                println!("{}", cells.join("\t"));
            }
        }
        Ok(())
    };
    if cmd.lazy {
        let permissions: Arc<dyn PermissionProvider> = Arc::new(permissions);
        let mut stream = service.execute_lazy(&cmd.query, permissions)?;
        for row in stream.by_ref() {
            print(&row?)?;
        }
        stream.close()?;
    } else {
        for row in service.execute_eager(&cmd.query, &permissions)? {
            print(&row)?;
        }
    }
    Ok(())
}
