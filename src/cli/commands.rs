use crate::cli::app::{
    self, AppError, BundleOptions, Destination, EXIT_PARTIAL, GlobalOptions, Session, VERSION,
};
use crate::core::selector::is_modifier;
use crate::domain::models::CancelFlag;
use crate::infra::logger::setup_logger;
use crate::infra::output::{FileCounter, OutputTarget, SystemClock, output_dir};
use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use crossterm::{
    ExecutableCommand,
    style::{Color, ResetColor, SetForegroundColor},
};
use log::{debug, info};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "snip", version)]
#[command(about = "Deterministic, budgeted markdown snapshots of a repository", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: .snip.yaml in the working directory)
    #[arg(long, global = true, env = "SNIP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repository root, overriding the configured one
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a bundle: `snip run [profile] [+slice|-slice ...]`
    Run(RunArgs),
    /// Dry run: list what a bundle would contain
    Ls(LsArgs),
    /// Show how one path is classified and which slices claim it
    Explain(ExplainArgs),
    /// Print the effective configuration and environment
    Doctor(DoctorArgs),
    /// Print the version
    Version,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Output path; `-` writes to stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    #[arg(long, conflicts_with = "clipboard")]
    pub stdout: bool,

    #[arg(long)]
    pub clipboard: bool,

    #[arg(long)]
    pub max_chars: Option<usize>,

    #[arg(long, default_value = "md")]
    pub format: String,

    #[arg(long)]
    pub no_tree: bool,

    #[arg(long)]
    pub no_manifest: bool,

    #[arg(long)]
    pub tree_depth: Option<usize>,

    #[arg(long)]
    pub include_hidden: bool,

    /// Do not print the output path
    #[arg(short, long)]
    pub quiet: bool,

    /// Optional profile, then slice modifiers
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct LsArgs {
    #[arg(long)]
    pub max_chars: Option<usize>,

    #[arg(long)]
    pub include_hidden: bool,

    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct ExplainArgs {
    pub path: String,

    #[arg(long)]
    pub profile: Option<String>,

    #[arg(long)]
    pub include_hidden: bool,

    #[arg(allow_hyphen_values = true)]
    pub modifiers: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    #[arg(long)]
    pub profile: Option<String>,

    #[arg(long)]
    pub include_hidden: bool,

    #[arg(allow_hyphen_values = true)]
    pub modifiers: Vec<String>,
}

/// Leading positional is the profile unless it is a `+`/`-` modifier.
pub fn split_profile(args: &[String]) -> (Option<String>, Vec<String>) {
    match args.split_first() {
        Some((first, rest)) if !is_modifier(first) => (Some(first.clone()), rest.to_vec()),
        _ => (None, args.to_vec()),
    }
}

pub fn run() -> Result<ExitCode, AppError> {
    let cli = Cli::parse();

    setup_logger(cli.verbose).map_err(|e| AppError::Io(e.into()))?;

    let global = GlobalOptions {
        config: cli.config.clone(),
        root: cli.root.clone(),
    };
    let cancel = CancelFlag::new();

    match cli.command {
        Commands::Run(args) => {
            info!("Starting run command");
            debug!("Run arguments: {:?}", args);
            run_command(&global, &args, &cancel)
        }
        Commands::Ls(args) => {
            info!("Starting ls command");
            let (profile, modifiers) = split_profile(&args.args);
            let session = Session::open(&global, profile.as_deref(), &modifiers)?;
            let opts = BundleOptions {
                max_chars: args.max_chars,
                include_hidden: args.include_hidden,
                ..BundleOptions::default()
            };
            let (text, partial) = app::list(&session, &opts, cli.verbose > 0, &SystemClock, &cancel)?;
            print_text(&text)?;
            Ok(exit_for(partial))
        }
        Commands::Explain(args) => {
            info!("Starting explain command for {}", args.path);
            let session = Session::open(&global, args.profile.as_deref(), &args.modifiers)?;
            print_text(&app::explain(&session, &args.path, args.include_hidden)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor(args) => {
            info!("Starting doctor command");
            let session = Session::open(&global, args.profile.as_deref(), &args.modifiers)?;
            print_text(&app::doctor(&session, args.include_hidden)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            print_text(&format!("snip {}\n", VERSION))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_command(global: &GlobalOptions, args: &RunArgs, cancel: &CancelFlag) -> Result<ExitCode, AppError> {
    if args.format != "md" {
        return Err(AppError::Usage(anyhow!(
            "unsupported format {:?} (only \"md\" is available)",
            args.format
        )));
    }

    let (profile, modifiers) = split_profile(&args.args);
    let session = Session::open(global, profile.as_deref(), &modifiers)?;
    let destination = destination_for(args, session.cfg.output.stdout_default);
    let opts = BundleOptions {
        max_chars: args.max_chars,
        include_hidden: args.include_hidden,
        no_tree: args.no_tree,
        no_manifest: args.no_manifest,
        tree_depth: args.tree_depth,
    };

    let mut counter = FileCounter::new(output_dir(&session.root, &session.cfg.output));
    let result = app::run_bundle(
        &session,
        &opts,
        &destination,
        &SystemClock,
        &mut counter,
        cancel,
    )?;

    if !args.quiet && !matches!(destination, Destination::Explicit(OutputTarget::Stdout)) {
        report_written(&result.output, result.partial).map_err(|e| AppError::Io(e.into()))?;
    }
    Ok(exit_for(result.partial))
}

pub fn destination_for(args: &RunArgs, stdout_default: bool) -> Destination {
    if args.clipboard {
        return Destination::Explicit(OutputTarget::Clipboard);
    }
    match &args.out {
        Some(path) if path.as_os_str() == "-" => Destination::Explicit(OutputTarget::Stdout),
        Some(path) => Destination::Explicit(OutputTarget::File(path.clone())),
        None if args.stdout || stdout_default => Destination::Explicit(OutputTarget::Stdout),
        None => Destination::Default,
    }
}

fn exit_for(partial: bool) -> ExitCode {
    if partial {
        ExitCode::from(EXIT_PARTIAL)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_text(text: &str) -> Result<(), AppError> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.flush())
        .map_err(|e| AppError::Io(e.into()))
}

fn report_written(output: &str, partial: bool) -> io::Result<()> {
    let mut stdout = io::stdout();
    let color = if partial { Color::Yellow } else { Color::Green };
    let tty = stdout.is_terminal();

    if tty {
        stdout.execute(SetForegroundColor(color))?;
    }
    write!(stdout, "{}", output)?;
    if partial {
        write!(stdout, " (partial)")?;
    }
    if tty {
        stdout.execute(ResetColor)?;
    }
    writeln!(stdout)
}
