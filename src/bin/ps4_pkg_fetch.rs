use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ps4_pkg_fetch::app::{App, DownloadOptions, DownloadResult};
use ps4_pkg_fetch::catalog::OrbisPatchesClient;
use ps4_pkg_fetch::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use ps4_pkg_fetch::domain::{Catalog, TitleId};
use ps4_pkg_fetch::error::PkgError;
use ps4_pkg_fetch::fetcher::HttpPieceSource;
use ps4_pkg_fetch::fingerprint::extract_title_id;
use ps4_pkg_fetch::http::build_client;
use ps4_pkg_fetch::merge::MergeOutcome;
use ps4_pkg_fetch::output::{JsonOutput, OutputMode};
use ps4_pkg_fetch::staging::StagingStore;
use ps4_pkg_fetch::tui::Tui;

type HttpApp = App<OrbisPatchesClient, HttpPieceSource>;

#[derive(Parser)]
#[command(name = "ps4-pkg-fetch")]
#[command(about = "Download multi-part PS4 update packages and merge them into one pkg")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch an update package (default)")]
    Fetch(FetchArgs),
    #[command(about = "List the updates available for a title")]
    List(ListArgs),
    #[command(about = "Remove incomplete pieces from the output directory")]
    Clean(CleanArgs),
}

#[derive(Args, Clone, Default)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    output_dir: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct FetchArgs {
    /// Title id such as CUSA12345.
    target: Option<String>,

    /// Game directory or app_param.sfo to read the title id from.
    #[arg(long, conflicts_with = "target")]
    sfo: Option<Utf8PathBuf>,

    /// Catalog entry id to download without asking.
    #[arg(long)]
    pick: Option<u32>,

    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long)]
    no_merge: bool,

    #[arg(long, conflicts_with = "keep_pieces")]
    delete_pieces: bool,

    #[arg(long)]
    keep_pieces: bool,
}

#[derive(Args)]
struct ListArgs {
    target: String,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct CleanArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        let error = report.downcast_ref::<PkgError>();
        if matches!(error, Some(PkgError::UserCancelled)) {
            return ExitCode::from(130);
        }
        eprintln!("{report:?}");
        return ExitCode::from(error.map(map_exit_code).unwrap_or(1));
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PkgError) -> u8 {
    match error {
        PkgError::UserCancelled => 130,
        PkgError::InvalidTitleId(_)
        | PkgError::TitleIdNotFound(_)
        | PkgError::ConfigRead(_)
        | PkgError::ConfigParse(_)
        | PkgError::LookupNotFound(_)
        | PkgError::InvalidChoice(_) => 2,
        PkgError::CatalogHttp(_)
        | PkgError::CatalogStatus { .. }
        | PkgError::Transfer { .. }
        | PkgError::TransferStatus { .. }
        | PkgError::ShortRead { .. } => 3,
        PkgError::PieceFailed { source, .. } => map_exit_code(source),
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command.unwrap_or(Commands::Fetch(FetchArgs::default())) {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::List(args) => run_list(args, output_mode),
        Commands::Clean(args) => run_clean(args, output_mode),
    }
}

fn build_app(config: &ResolvedConfig) -> miette::Result<HttpApp> {
    let client = build_client()?;
    let catalog = OrbisPatchesClient::new(client.clone(), config.catalog_url.as_str());
    Ok(App::new(
        StagingStore::new(config.output_dir.clone()),
        catalog,
        HttpPieceSource::new(client),
    ))
}

fn resolve_config(args: &ConfigArgs, overrides: ConfigOverrides) -> miette::Result<ResolvedConfig> {
    let overrides = ConfigOverrides {
        output_dir: args.output_dir.clone(),
        ..overrides
    };
    Ok(ConfigLoader::resolve(args.config.as_deref(), &overrides)?)
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        output_dir: None,
        merge: args.no_merge.then_some(false),
        delete_pieces: if args.delete_pieces {
            Some(true)
        } else if args.keep_pieces {
            Some(false)
        } else {
            None
        },
    };
    let config = resolve_config(&args.config, overrides)?;
    let app = build_app(&config)?;

    // Leftovers from an interrupted run go before anything else touches the
    // output directory.
    app.run_startup_recovery(&JsonOutput)?;

    let title_id = match (&args.target, &args.sfo) {
        (Some(target), _) => target.parse::<TitleId>()?,
        (None, Some(sfo)) => extract_title_id(sfo)?,
        (None, None) => match output_mode {
            OutputMode::Interactive => prompt_title_id()?,
            OutputMode::NonInteractive => {
                return Err(miette::Report::msg(
                    "a title id or --sfo is required with --non-interactive",
                ));
            }
        },
    };

    let catalog = app.lookup(&title_id, &JsonOutput)?;
    let pick = match (args.pick, output_mode) {
        (Some(pick), _) => pick,
        (None, OutputMode::Interactive) => Tui::new().select_patch(&catalog)?,
        (None, OutputMode::NonInteractive) => {
            return Err(miette::Report::msg(
                "--pick is required with --non-interactive",
            ));
        }
    };
    let entry = catalog.entry(pick)?.clone();
    let options = DownloadOptions {
        merge: config.merge,
        delete_pieces: config.delete_pieces,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.download(&title_id, &entry, options, &JsonOutput)?;
            JsonOutput::print_download(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new();
            tui.set_title(&format!("{} ({title_id}) v{}", catalog.title, entry.update_version));
            let result = tui.run(move |sink| app.download(&title_id, &entry, options, sink))?;
            print_download_summary(&catalog, &result);
        }
    }
    Ok(())
}

fn run_list(args: ListArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = resolve_config(&args.config, ConfigOverrides::default())?;
    let app = build_app(&config)?;
    let title_id = args.target.parse::<TitleId>()?;
    let catalog = app.lookup(&title_id, &JsonOutput)?;
    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_catalog(&catalog).into_diagnostic()
        }
        OutputMode::Interactive => {
            print_catalog(&catalog);
            Ok(())
        }
    }
}

fn run_clean(args: CleanArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = resolve_config(&args.config, ConfigOverrides::default())?;
    let app = build_app(&config)?;
    let result = app.run_startup_recovery(&JsonOutput)?;
    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_recovery(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            println!(
                "Removed {} incomplete piece(s) from {}",
                result.purged, result.output_dir
            );
            Ok(())
        }
    }
}

/// Asks on stdin until a valid title id is entered. End of input cancels.
fn prompt_title_id() -> Result<TitleId, PkgError> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        eprint!("Enter the game's title id (e.g. CUSA12345): ");
        io::stderr().flush().ok();
        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .map_err(|err| PkgError::Filesystem(format!("read stdin: {err}")))?;
        if read == 0 {
            return Err(PkgError::UserCancelled);
        }
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<TitleId>() {
            Ok(title_id) => return Ok(title_id),
            Err(err) => eprintln!("{err}"),
        }
    }
}

fn print_catalog(catalog: &Catalog) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    println!("{cyan}--{}--{reset}", catalog.title);
    println!(
        "{:<4}{:<16}{:<20}{}",
        "ID", "Update version", "Required firmware", "Size"
    );
    for (id, entry) in &catalog.entries {
        println!(
            "{:<4}{:<16}{:<20}{}",
            id, entry.update_version, entry.required_firmware, entry.size
        );
    }
}

fn print_download_summary(catalog: &Catalog, result: &DownloadResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}{} ({}) update {}{reset}",
        catalog.title, result.title_id, result.update_version
    );
    println!(
        "{green}Pieces fetched: {}{reset}",
        result.retrieval.pieces_fetched
    );
    println!(
        "{yellow}Pieces already present: {}{reset}",
        result.retrieval.pieces_skipped
    );
    match &result.merge {
        Some(MergeOutcome::Merged {
            path,
            pieces,
            sources_deleted,
            ..
        }) => {
            println!("{green}Merged {pieces} pieces into {path}{reset}");
            if *sources_deleted {
                println!("{yellow}Pieces deleted after merge{reset}");
            }
        }
        Some(MergeOutcome::Skipped { path }) => {
            println!("{green}Single piece, nothing to merge: {path}{reset}");
        }
        None => println!("{yellow}Merge disabled, pieces left in {}{reset}", result.output_dir),
    }
}
