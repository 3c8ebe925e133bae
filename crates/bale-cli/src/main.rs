mod commands;

use bale_core::{install_signal_handler, shutdown_requested};
use bale_store::CancelToken;
use clap::{Parser, Subcommand};
use commands::create::CreateFlags;
use commands::resolve::Target;
use commands::{GlobalOpts, EXIT_FAILURE, EXIT_INTERRUPTED};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bale",
    version,
    about = "Build, publish and fetch integrity-verified deployment packages"
)]
struct Cli {
    /// Build defaults file (default: bale-config.toml next to the package).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry URL replacing the host of every oci:// reference.
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Talk to registries over plain HTTP.
    #[arg(long, default_value_t = false, global = true)]
    plain_http: bool,

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
    /// Build a package tarball from a package directory.
    Create {
        /// Directory holding bale.yaml.
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Directory the tarball is written to.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Target architecture (default: package, then host).
        #[arg(short, long)]
        arch: Option<String>,
        /// Only include components matching this flavor.
        #[arg(long)]
        flavor: Option<String>,
        /// Build a skeleton package for reuse through oci:// imports.
        #[arg(long, default_value_t = false)]
        skeleton: bool,
        /// Component archive compression: zstd, gzip or none.
        #[arg(long)]
        compression: Option<String>,
        /// OCI image layout to copy component images from.
        #[arg(long)]
        images: Option<PathBuf>,
        /// Reference package; images and repos it ships are left out.
        #[arg(long)]
        differential: Option<String>,
        /// Cache for components fetched from skeleton packages.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Publish a package tarball or directory into an OCI image layout.
    Publish {
        /// Package tarball or unpacked package directory.
        package: PathBuf,
        /// OCI image-layout directory to publish into.
        layout: PathBuf,
    },
    /// Fetch a package, optionally only some of its components.
    Pull {
        /// oci:// reference, OCI layout directory or package tarball.
        source: String,
        /// Directory the package is written to.
        #[arg(short, long, default_value = "bale-package")]
        dest: PathBuf,
        /// Comma-separated component patterns; `name-` excludes.
        #[arg(long)]
        components: Option<String>,
        /// Also write a package tarball to this directory (complete pulls only).
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    /// Show a package's definition and layers without fetching components.
    Inspect {
        /// oci:// reference, OCI layout directory or package tarball.
        source: String,
    },
    /// Generate or verify package checksums.
    Checksums {
        #[command(subcommand)]
        action: ChecksumsAction,
    },
    /// Print the package definition with all imports resolved.
    Resolve {
        /// Directory holding bale.yaml.
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show what a differential build against a reference package drops.
    Diff {
        /// Reference package: oci:// reference, OCI layout directory or tarball.
        reference: String,
        /// Directory holding bale.yaml.
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Debug, Subcommand)]
enum ChecksumsAction {
    /// Write checksums.txt and record the aggregate in bale.yaml.
    Generate {
        /// Package directory.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Verify a package directory against its checksums.
    Verify {
        /// Package directory.
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Only verify these package-relative files.
        #[arg(long, value_delimiter = ',')]
        paths: Vec<String>,
    },
}

#[derive(Debug, clap::Args)]
struct TargetArgs {
    /// Target architecture.
    #[arg(short, long)]
    arch: Option<String>,
    /// Only include components matching this flavor.
    #[arg(long)]
    flavor: Option<String>,
    /// Resolve as for a skeleton build.
    #[arg(long, default_value_t = false)]
    skeleton: bool,
}

impl From<TargetArgs> for Target {
    fn from(args: TargetArgs) -> Self {
        Self {
            architecture: args.arch,
            flavor: args.flavor,
            skeleton: args.skeleton,
        }
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

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BALE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cancel = install_signal_handler(&CancelToken::new());
    let global = GlobalOpts {
        config: cli.config.as_deref(),
        remote: cli.remote.as_deref(),
        plain_http: cli.plain_http,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Create {
            dir,
            output,
            arch,
            flavor,
            skeleton,
            compression,
            images,
            differential,
            cache_dir,
        } => commands::create::run(
            &dir,
            CreateFlags {
                output,
                architecture: arch,
                flavor,
                skeleton,
                compression,
                images,
                differential,
                cache_dir,
            },
            &global,
            &cancel,
        ),
        Commands::Publish { package, layout } => {
            commands::publish::run(&package, &layout, &global, &cancel)
        }
        Commands::Pull {
            source,
            dest,
            components,
            archive,
        } => commands::pull::run(
            &source,
            &dest,
            components.as_deref(),
            archive,
            &global,
            &cancel,
        ),
        Commands::Inspect { source } => commands::inspect::run(&source, &global, &cancel),
        Commands::Checksums { action } => match action {
            ChecksumsAction::Generate { dir } => {
                commands::checksums::generate(&dir, &global, &cancel)
            }
            ChecksumsAction::Verify { dir, paths } => {
                commands::checksums::verify(&dir, &paths, &global, &cancel)
            }
        },
        Commands::Resolve { dir, target } => {
            commands::resolve::run(&dir, &target.into(), &global, &cancel)
        }
        Commands::Diff {
            reference,
            dir,
            target,
        } => commands::diff::run(&reference, &dir, &target.into(), &global, &cancel),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            if shutdown_requested() || cancel.is_cancelled() {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}
