//! CLI binary entry point for ingest2duck

#[cfg(feature = "cli")]
use clap::{Parser, ValueEnum};
#[cfg(feature = "cli")]
use ingest2duck::cli::commands::{
    MappingOverrides, RunArgs, handle_migrate, handle_new_mapping, handle_run,
};
#[cfg(feature = "cli")]
use ingest2duck::models::{DestinationKind, ReplaceStrategy, WriteDisposition};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "ingest2duck")]
#[command(about = "Ingest XML, JSON, CSV and XLSX sources into DuckDB or DuckLake")]
#[command(version)]
struct Cli {
    /// Mapping YAML with run configuration and inferred collections
    #[arg(long, value_name = "PATH", required_unless_present_any = ["newmapping", "migrate"])]
    mapping: Option<PathBuf>,

    /// Create a new mapping template file and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["mapping", "migrate"])]
    newmapping: Option<PathBuf>,

    /// Convert a v1 single-source mapping to the multi-source layout and exit
    #[arg(long, value_name = "PATH", conflicts_with = "mapping")]
    migrate: Option<PathBuf>,

    /// With --migrate: print the converted document instead of writing it
    #[arg(long, requires = "migrate")]
    dry_run: bool,

    /// Override destination.dataset
    #[arg(long)]
    dataset: Option<String>,

    /// Reprocess every source regardless of checksums
    #[arg(long)]
    force: bool,

    /// Override destination.type
    #[arg(long, value_enum)]
    destination_type: Option<DestinationTypeArg>,

    /// Override destination.duckdb_file
    #[arg(long)]
    duckdb_file: Option<String>,

    /// Override destination.ducklake.ducklake_name
    #[arg(long)]
    ducklake_name: Option<String>,

    /// Override destination.ducklake.catalog
    #[arg(long)]
    ducklake_catalog: Option<String>,

    /// Override destination.ducklake.storage
    #[arg(long)]
    ducklake_storage: Option<String>,

    /// Override destination.ducklake.replace_strategy
    #[arg(long, value_enum)]
    ducklake_replace_strategy: Option<ReplaceStrategyArg>,

    /// Infer collections for sources without a mapping
    #[arg(long, overrides_with = "no_infer_if_missing")]
    infer_if_missing: bool,

    /// Fail sources without a mapping instead of inferring one
    #[arg(long, overrides_with = "infer_if_missing")]
    no_infer_if_missing: bool,

    /// Global write disposition
    #[arg(long, value_enum)]
    write_disposition: Option<WriteDispositionArg>,

    /// Override outputs.raw.table
    #[arg(long)]
    raw_table: Option<String>,

    /// Size of the fetch/parse worker pool
    #[arg(long)]
    workers: Option<usize>,

    /// Debug logging (RUST_LOG takes precedence when set)
    #[arg(short, long)]
    verbose: bool,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum DestinationTypeArg {
    Duckdb,
    Ducklake,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum ReplaceStrategyArg {
    TruncateAndInsert,
    InsertFromStaging,
    StagingOptimized,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum WriteDispositionArg {
    Append,
    Replace,
    Merge,
    Skip,
}

#[cfg(feature = "cli")]
fn convert_destination_type(arg: DestinationTypeArg) -> DestinationKind {
    match arg {
        DestinationTypeArg::Duckdb => DestinationKind::Duckdb,
        DestinationTypeArg::Ducklake => DestinationKind::Ducklake,
    }
}

#[cfg(feature = "cli")]
fn convert_replace_strategy(arg: ReplaceStrategyArg) -> ReplaceStrategy {
    match arg {
        ReplaceStrategyArg::TruncateAndInsert => ReplaceStrategy::TruncateAndInsert,
        ReplaceStrategyArg::InsertFromStaging => ReplaceStrategy::InsertFromStaging,
        ReplaceStrategyArg::StagingOptimized => ReplaceStrategy::StagingOptimized,
    }
}

#[cfg(feature = "cli")]
fn convert_write_disposition(arg: WriteDispositionArg) -> WriteDisposition {
    match arg {
        WriteDispositionArg::Append => WriteDisposition::Append,
        WriteDispositionArg::Replace => WriteDisposition::Replace,
        WriteDispositionArg::Merge => WriteDisposition::Merge,
        WriteDispositionArg::Skip => WriteDisposition::Skip,
    }
}

#[cfg(feature = "cli")]
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = if let Some(path) = cli.newmapping {
        handle_new_mapping(&path)
    } else if let Some(path) = cli.migrate {
        handle_migrate(&path, cli.dry_run)
    } else if let Some(mapping) = cli.mapping {
        let infer_if_missing = if cli.infer_if_missing {
            Some(true)
        } else if cli.no_infer_if_missing {
            Some(false)
        } else {
            None
        };
        let args = RunArgs {
            mapping,
            force: cli.force,
            overrides: MappingOverrides {
                dataset: cli.dataset,
                destination_type: cli.destination_type.map(convert_destination_type),
                duckdb_file: cli.duckdb_file,
                ducklake_name: cli.ducklake_name,
                ducklake_catalog: cli.ducklake_catalog,
                ducklake_storage: cli.ducklake_storage,
                ducklake_replace_strategy: cli.ducklake_replace_strategy.map(convert_replace_strategy),
                infer_if_missing,
                write_disposition: cli.write_disposition.map(convert_write_disposition),
                raw_table: cli.raw_table,
                workers: cli.workers,
            },
        };
        handle_run(&args).map(|_| ())
    } else {
        Err(ingest2duck::cli::CliError::InvalidArgument(
            "--mapping is required (use --newmapping <file> to create a new template)".to_string(),
        ))
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
