mod commands;
mod logging;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::Context;
use galley_core::{install_signal_handler, with_friendly_errors, CoreError, RunAction};
use galley_schema::{DestroyMode, PROJECT_FILE};
use galley_store::ProjectLayout;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "galley",
    version,
    about = "Run test suites across platforms through create, converge, setup, verify and destroy"
)]
struct Cli {
    /// Project root holding the project file and the .galley/ directory.
    #[arg(long, default_value = ".", global = true)]
    project_dir: PathBuf,

    /// Project file, relative to the project root.
    #[arg(long, default_value = PROJECT_FILE, global = true)]
    config: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List instances and their last action.
    List {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
    },
    /// Create instances.
    Create {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
        /// Run up to N instances at once (all at once when N is omitted).
        #[arg(short = 'c', long, value_name = "N")]
        concurrency: Option<Option<usize>>,
    },
    /// Create and converge instances.
    Converge {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
        /// Run up to N instances at once (all at once when N is omitted).
        #[arg(short = 'c', long, value_name = "N")]
        concurrency: Option<Option<usize>>,
    },
    /// Bring instances up to the point where they can be verified.
    Setup {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
        /// Run up to N instances at once (all at once when N is omitted).
        #[arg(short = 'c', long, value_name = "N")]
        concurrency: Option<Option<usize>>,
    },
    /// Run the verifier against instances, creating and converging them as needed.
    Verify {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
        /// Run up to N instances at once (all at once when N is omitted).
        #[arg(short = 'c', long, value_name = "N")]
        concurrency: Option<Option<usize>>,
    },
    /// Destroy instances.
    Destroy {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
        /// Run up to N instances at once (all at once when N is omitted).
        #[arg(short = 'c', long, value_name = "N")]
        concurrency: Option<Option<usize>>,
    },
    /// Destroy, verify from scratch, then destroy according to --destroy.
    Test {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
        /// Run up to N instances at once (all at once when N is omitted).
        #[arg(short = 'c', long, value_name = "N")]
        concurrency: Option<Option<usize>>,
        /// When to destroy instances after verifying: passing, always or never.
        #[arg(long, default_value = "passing")]
        destroy: DestroyMode,
    },
    /// Open an interactive session on one instance.
    Login {
        /// Instance name or a regular expression matching exactly one instance.
        pattern: String,
    },
    /// Execute a command on instances.
    Exec {
        /// Instance name, regular expression, or `all`.
        pattern: String,
        /// Command to run.
        #[arg(short = 'c', long)]
        command: String,
    },
    /// Dump resolved configuration and state (always JSON).
    Diagnose {
        /// Instance name, regular expression, or `all`.
        pattern: Option<String>,
    },
    /// Write a starter project file.
    Init {
        /// Overwrite an existing project file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Commands {
    /// Whether the command reads the project file and so gets a project log.
    fn loads_project(&self) -> bool {
        !matches!(self, Commands::Init { .. } | Commands::Completions { .. })
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let layout = ProjectLayout::new(&cli.project_dir);
    let log_file = (cli.command.loads_project()
        && cli.project_dir.join(&cli.config).is_file()
        && layout.initialize().is_ok())
    .then(|| layout.log_file());
    logging::init(log_file.as_deref(), cli.verbose, cli.trace);

    install_signal_handler();

    with_friendly_errors(|| run(cli))
}

fn run(cli: Cli) -> Result<(), CoreError> {
    let ctx = Context {
        project_dir: cli.project_dir,
        config: cli.config,
        json: cli.json,
    };

    match cli.command {
        Commands::List { pattern } => commands::list::run(&ctx, pattern.as_deref()),
        Commands::Create {
            pattern,
            concurrency,
        } => commands::action::run(&ctx, RunAction::Create, pattern.as_deref(), concurrency),
        Commands::Converge {
            pattern,
            concurrency,
        } => commands::action::run(&ctx, RunAction::Converge, pattern.as_deref(), concurrency),
        Commands::Setup {
            pattern,
            concurrency,
        } => commands::action::run(&ctx, RunAction::Setup, pattern.as_deref(), concurrency),
        Commands::Verify {
            pattern,
            concurrency,
        } => commands::action::run(&ctx, RunAction::Verify, pattern.as_deref(), concurrency),
        Commands::Destroy {
            pattern,
            concurrency,
        } => commands::action::run(&ctx, RunAction::Destroy, pattern.as_deref(), concurrency),
        Commands::Test {
            pattern,
            concurrency,
            destroy,
        } => commands::action::run(
            &ctx,
            RunAction::Test(destroy),
            pattern.as_deref(),
            concurrency,
        ),
        Commands::Login { pattern } => commands::login::run(&ctx, &pattern),
        Commands::Exec { pattern, command } => commands::exec::run(&ctx, &pattern, &command),
        Commands::Diagnose { pattern } => commands::diagnose::run(&ctx, pattern.as_deref()),
        Commands::Init { force } => commands::init::run(&ctx, force),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}
