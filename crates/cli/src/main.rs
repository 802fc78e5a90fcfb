use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use semdiff::commands::{
    build_command, compare_command, config_command, patterns_command, runs_command, BuildArgs,
    CompareArgs,
};
use semdiff::{log_filter, settings_for};
use semdiff_core::source::TreeKind;
use tracing_subscriber::EnvFilter;

/// Semantic difference checking of C functions across two source revisions.
///
/// This CLI is a thin wrapper around `semdiff-core`. All substantive logic
/// lives in the library so it can be tested without a process boundary.
#[derive(Parser, Debug)]
#[command(
    name = "semdiff",
    version,
    about = "Check whether C functions changed behavior between two revisions",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file. Defaults to `.semdiff/config.json` in the current directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a snapshot of a project with a compilation database or plain C sources.
    ///
    /// Without a symbol list or `--symbol`, every function defined in the
    /// project is included.
    Build {
        /// Source tree root.
        source: PathBuf,
        /// Snapshot directory to write.
        output: PathBuf,
        /// File with one symbol per line.
        list: Option<PathBuf>,
        /// Additional symbol to include (repeatable).
        #[arg(long = "symbol")]
        symbols: Vec<String>,
        /// Replace an existing snapshot at the output directory.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Build a snapshot of a Linux kernel tree.
    ///
    /// List entries are function names, `sysctl:<name>`, or
    /// `param:<module-dir>/<module>:<param>`.
    BuildKernel {
        /// Kernel source root.
        source: PathBuf,
        /// Snapshot directory to write.
        output: PathBuf,
        /// File with one symbol per line.
        list: PathBuf,
        /// Replace an existing snapshot at the output directory.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Compare two snapshots symbol by symbol.
    Compare {
        /// Snapshot of the old revision.
        old: PathBuf,
        /// Snapshot of the new revision.
        new: PathBuf,
        /// YAML pattern configuration file.
        #[arg(long)]
        pattern_config: Option<PathBuf>,
        /// Enable a pattern (or `all`); repeatable.
        #[arg(long = "enable-pattern")]
        enable_patterns: Vec<String>,
        /// Disable a pattern (or `all`); repeatable. Disables win over enables.
        #[arg(long = "disable-pattern")]
        disable_patterns: Vec<String>,
        /// Compare control flow only.
        #[arg(long, default_value_t = false)]
        control_flow_only: bool,
        /// Compare only this symbol.
        #[arg(long)]
        function: Option<String>,
        /// Compare only symbols whose whole name matches this regex.
        #[arg(long)]
        regex_filter: Option<String>,
        /// Per-symbol checker timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Worker threads (0 = one per CPU).
        #[arg(long)]
        jobs: Option<usize>,
        /// Preload modules shared by several comparisons.
        #[arg(long, default_value_t = false)]
        enable_module_cache: bool,
        /// Equivalence checker to use (`ir-text` or `simpll`).
        #[arg(long)]
        checker: Option<String>,
        /// Write simplified IR of each compared pair into this directory.
        #[arg(long)]
        emit_ir: Option<PathBuf>,
        /// Record the run in this SQLite database.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Print summary statistics.
        #[arg(long, default_value_t = false)]
        report_stat: bool,
        /// Also list symbols that compared equal.
        #[arg(long, default_value_t = false)]
        show_equal: bool,
    },

    /// List the built-in patterns.
    Patterns {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List runs recorded in a result database, or one run's results.
    Runs {
        /// SQLite database written by `compare --db`.
        #[arg(long)]
        db: PathBuf,
        /// Show the results of this run.
        #[arg(long)]
        run: Option<i64>,
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the effective settings, or save them with `--write`.
    Config {
        /// Directory whose `.semdiff/config.json` is written.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Write the effective settings.
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

fn init_logging(verbose: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let settings = settings_for(cli.config.as_deref())?;

    match cli.command {
        Command::Build { source, output, list, symbols, force } => build_command(
            &BuildArgs { kind: TreeKind::GenericBuild, source, output, list, symbols, force },
            &settings,
        )?,
        Command::BuildKernel { source, output, list, force } => build_command(
            &BuildArgs {
                kind: TreeKind::KernelBuild,
                source,
                output,
                list: Some(list),
                symbols: Vec::new(),
                force,
            },
            &settings,
        )?,
        Command::Compare {
            old,
            new,
            pattern_config,
            enable_patterns,
            disable_patterns,
            control_flow_only,
            function,
            regex_filter,
            timeout,
            jobs,
            enable_module_cache,
            checker,
            emit_ir,
            db,
            json,
            report_stat,
            show_equal,
        } => compare_command(
            &CompareArgs {
                old,
                new,
                pattern_config,
                enable_patterns,
                disable_patterns,
                control_flow_only,
                function,
                regex_filter,
                timeout,
                jobs,
                enable_module_cache,
                checker,
                emit_ir,
                db,
                json,
                report_stat,
                show_equal,
            },
            &settings,
        )?,
        Command::Patterns { json } => patterns_command(json)?,
        Command::Runs { db, run, json } => runs_command(&db, run, json)?,
        Command::Config { root, write } => config_command(&settings, &root, write)?,
    }

    Ok(())
}
