use clap::{Parser, Subcommand, ValueEnum};
use pdflapse::run::{self, RunPlan};
use pdflapse::types::Layout;
use pdflapse::walk::StopSignal;
use pdflapse::{config, output};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "pdflapse")]
#[command(about = "Turn the history of a PDF-building repository into an animated GIF")]
#[command(long_about = "\
Turn the history of a PDF-building repository into an animated GIF

Every revision in the range is checked out, built with your build command,
and each page of the resulting PDF becomes a frame. Revisions that fail to
check out, build or rasterize are skipped and reported.

WARNING: the repository is force-checked-out and cleaned (git clean -ffdx)
at every revision. Uncommitted changes, untracked and ignored files in it
are destroyed. Use a dedicated clone.

Example:

  git clone ~/papers/thesis /tmp/thesis
  pdflapse render --repository /tmp/thesis --subdirectory tex \\
      --command 'latexmk -pdf thesis.tex' --pdfpath thesis.pdf

Requires git, and pdfinfo/pdftoppm from poppler-utils.

Settings can also live in pdflapse.toml; flags override the file.
Run 'pdflapse gen-config' to generate a documented pdflapse.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: pdflapse.toml in the current directory, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output (overridden by PDFLAPSE_LOG / RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the history and write the animated GIF
    Render(RenderArgs),
    /// List the revisions a render would visit
    List(RangeArgs),
    /// Print a stock pdflapse.toml with all options documented
    GenConfig,
}

/// Which repository and which slice of its history.
#[derive(clap::Args, Clone, Serialize)]
struct RangeArgs {
    /// Git checkout to walk (it is reset at every revision)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<PathBuf>,

    /// First revision, inclusive (default: the first commit)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    starthash: Option<String>,

    /// Last revision, inclusive (default: HEAD)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    endhash: Option<String>,

    /// Follow only the first parent of merge commits
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    first_parent: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutChoice {
    /// One frame per page
    Pages,
    /// All pages of a revision tiled onto one frame
    Sheet,
}

impl From<LayoutChoice> for Layout {
    fn from(choice: LayoutChoice) -> Self {
        match choice {
            LayoutChoice::Pages => Layout::Pages,
            LayoutChoice::Sheet => Layout::Sheet,
        }
    }
}

/// Render cache flags.
#[derive(clap::Args, Clone)]
struct CacheArgs {
    /// Disable the render cache: rebuild every revision
    #[arg(long)]
    no_cache: bool,

    /// Render cache directory (must be outside the repository)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[derive(clap::Args, Clone)]
struct RenderArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Directory inside the repository to build in
    #[arg(long)]
    subdirectory: Option<PathBuf>,

    /// Build command, run through the shell in the build directory
    #[arg(long)]
    command: Option<String>,

    /// PDF produced by the build, relative to the build directory
    #[arg(long)]
    pdfpath: Option<PathBuf>,

    /// Output GIF [default: history.gif]
    #[arg(long)]
    gifpath: Option<PathBuf>,

    #[arg(long)]
    frame_width: Option<u32>,
    #[arg(long)]
    frame_height: Option<u32>,
    /// Page cell width in the sheet layout
    #[arg(long)]
    page_width: Option<u32>,
    /// Page cell height in the sheet layout
    #[arg(long)]
    page_height: Option<u32>,

    #[arg(long, value_enum)]
    layout: Option<LayoutChoice>,

    /// First page to render (1-based)
    #[arg(long)]
    first_page: Option<usize>,
    /// Last page to render (1-based, inclusive)
    #[arg(long)]
    last_page: Option<usize>,

    /// Colour around letterboxed pages, #rrggbb
    #[arg(long)]
    background: Option<String>,

    /// Milliseconds each frame is shown
    #[arg(long)]
    delay_ms: Option<u32>,
    /// Times to play the animation, 0 = forever
    #[arg(long)]
    loop_count: Option<u16>,

    /// Kill builds running longer than this many seconds
    #[arg(long, value_name = "SECS")]
    build_timeout: Option<u64>,

    /// Also write every frame as PNG into this directory
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    #[command(flatten)]
    cache: CacheArgs,

    /// Start even if the repository has local changes (they will be lost)
    #[arg(long)]
    force: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Sparse TOML tables mirroring `pdflapse.toml`, holding only the flags given.
#[derive(Serialize)]
struct Overlay {
    #[serde(flatten)]
    range: RangeArgs,
    #[serde(skip_serializing_if = "Option::is_none")]
    subdirectory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdfpath: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gifpath: Option<PathBuf>,
    render: RenderOverlay,
    animation: AnimationOverlay,
    build: BuildOverlay,
    cache: CacheOverlay,
}

#[derive(Serialize)]
struct RenderOverlay {
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    layout: Option<Layout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<String>,
}

#[derive(Serialize)]
struct AnimationOverlay {
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loop_count: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct BuildOverlay {
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct CacheOverlay {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dir: Option<PathBuf>,
}

impl RangeArgs {
    fn overlay(&self) -> Result<toml::Value, toml::ser::Error> {
        toml::Value::try_from(self)
    }
}

impl RenderArgs {
    fn overlay(&self) -> Result<toml::Value, toml::ser::Error> {
        let args = self.clone();
        toml::Value::try_from(Overlay {
            range: args.range,
            subdirectory: args.subdirectory,
            command: args.command,
            pdfpath: args.pdfpath,
            gifpath: args.gifpath,
            render: RenderOverlay {
                frame_width: args.frame_width,
                frame_height: args.frame_height,
                page_width: args.page_width,
                page_height: args.page_height,
                layout: args.layout.map(Layout::from),
                first_page: args.first_page,
                last_page: args.last_page,
                background: args.background,
            },
            animation: AnimationOverlay {
                delay_ms: args.delay_ms,
                loop_count: args.loop_count,
                frames_dir: args.frames_dir,
            },
            build: BuildOverlay {
                timeout_secs: args.build_timeout,
            },
            cache: CacheOverlay {
                enabled: args.cache.no_cache.then_some(false),
                dir: args.cache.cache_dir,
            },
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Render(args) => {
            let config = config::load_config(cli.config.as_deref(), Some(args.overlay()?))?;
            init_thread_pool(&config.processing);
            let mut plan = RunPlan::from_config(&config)?;
            plan.allow_dirty = args.force;

            let stop = StopSignal::new();
            let handler_stop = stop.clone();
            ctrlc::set_handler(move || {
                if handler_stop.is_stopped() {
                    pdflapse::build::kill_active_build();
                    std::process::exit(130);
                }
                eprintln!("Stopping after the current revision (Ctrl-C again to abort)");
                handler_stop.stop();
            })?;

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_walk_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = run::render(&plan, stop, Some(tx));
            printer.join().map_err(|_| "progress printer panicked")?;
            let summary = result?;

            output::print_run_summary(&summary, &plan.gifpath);
            if plan.cache_dir.is_some() {
                println!("Cache: {}", summary.cache_stats);
            }
        }
        Command::List(args) => {
            let config = config::load_config(cli.config.as_deref(), Some(args.overlay()?))?;
            let repository = run::repository(&config)?;
            let revisions = run::list(&repository, &run::revision_range(&config))?;
            output::print_revision_list(&revisions);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr so stdout stays the progress display.
///
/// Filter from `PDFLAPSE_LOG`, then `RUST_LOG`, then `pdflapse=info`
/// (`pdflapse=debug` with `--verbose`).
fn init_tracing(verbose: bool) {
    let default = if verbose { "pdflapse=debug" } else { "pdflapse=info" };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("PDFLAPSE_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| default.into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the config can only lower it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
