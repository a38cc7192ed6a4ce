#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "weld")]
#[command(author, version, about = "Resolve, link and plan JavaScript/TypeScript bundles", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v INFO, -vv DEBUG, -vvv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the module graph and print the chunk plan
    Bundle {
        /// Entry points (override `entryPoints` from the config file)
        entries: Vec<String>,

        /// Output directory
        #[arg(long)]
        outdir: Option<PathBuf>,

        /// Output file (single entry point)
        #[arg(long, conflicts_with = "outdir")]
        outfile: Option<PathBuf>,

        /// Output format: esm, cjs, or iife
        #[arg(long)]
        format: Option<String>,

        /// Target platform: browser, node, bun, neutral, or cloudflare
        #[arg(long)]
        platform: Option<String>,

        /// Split dynamic imports and shared modules into their own chunks
        #[arg(long)]
        splitting: bool,

        /// Packages to leave as imports (repeatable, `*` globs allowed)
        #[arg(long, value_delimiter = ',')]
        external: Vec<String>,

        /// Extra export conditions, tried before the platform's
        #[arg(long, value_delimiter = ',')]
        conditions: Vec<String>,

        /// package.json fields to try for the package entry, in order
        #[arg(long, value_delimiter = ',')]
        main_fields: Option<Vec<String>>,

        /// Replace a global identifier (e.g. process.env.NODE_ENV="production")
        #[arg(long, value_name = "K=V")]
        define: Vec<String>,

        /// Loader for an extension (e.g. .txt=text)
        #[arg(long, value_name = ".EXT=LOADER")]
        loader: Vec<String>,

        /// Write build metadata JSON to this path
        #[arg(long)]
        metafile: Option<PathBuf>,

        /// Disable tree shaking
        #[arg(long)]
        no_treeshake: bool,

        /// Rewrite a bare specifier before resolution (e.g. @=./src)
        #[arg(long, value_name = "FROM=TO")]
        alias: Vec<String>,

        /// Config file (defaults to weld.json in the working directory, if present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Resolve a single specifier and print where it lands
    Resolve {
        /// The specifier as it would appear in an import
        specifier: String,

        /// Importing file; resolution starts from its directory
        #[arg(long)]
        from: Option<PathBuf>,

        /// Target platform
        #[arg(long, default_value = "browser")]
        platform: String,

        /// Import kind: import or require
        #[arg(long, default_value = "import")]
        kind: String,

        /// Extra export conditions
        #[arg(long, value_delimiter = ',')]
        conditions: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Version => commands::version::run(cli.json),
        Commands::Bundle {
            entries,
            outdir,
            outfile,
            format,
            platform,
            splitting,
            external,
            conditions,
            main_fields,
            define,
            loader,
            metafile,
            no_treeshake,
            alias,
            config,
        } => commands::bundle::run(
            commands::bundle::BundleAction {
                cwd,
                entries,
                outdir,
                outfile,
                format,
                platform,
                splitting,
                external,
                conditions,
                main_fields,
                define,
                loader,
                metafile,
                treeshake: !no_treeshake,
                alias,
                config,
            },
            cli.json,
        ),
        Commands::Resolve {
            specifier,
            from,
            platform,
            kind,
            conditions,
        } => commands::resolve::run(
            commands::resolve::ResolveAction {
                cwd,
                specifier,
                from,
                platform,
                kind,
                conditions,
            },
            cli.json,
        ),
    }
}
