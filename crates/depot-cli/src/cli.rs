use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}",
    arg_required_else_help = true
)]
pub struct Args {
    /// Set output verbosity
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress outputs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as json
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Provide custom config file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Work from cached metadata only
    #[arg(long, global = true)]
    pub offline: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the configuration
    Config {
        /// Write a documented default configuration file
        #[arg(long)]
        init: bool,
    },

    /// Show the versions of a package
    #[command(arg_required_else_help = true)]
    Show {
        /// Package name, optionally with an exact version (vendor/name:1.2.3)
        package: String,

        /// Collect versions from every repository instead of the first one
        /// hosting the package
        #[arg(long)]
        all: bool,

        /// Ignore the minimum stability
        #[arg(long)]
        any_stability: bool,
    },

    /// Report security advisories affecting packages
    #[command(arg_required_else_help = true)]
    Audit {
        /// Packages as vendor/name or vendor/name:version
        #[arg(required = true)]
        packages: Vec<String>,

        /// Accept advisories with incomplete data
        #[arg(long)]
        allow_partial: bool,
    },

    /// List packages providing a virtual package
    #[command(arg_required_else_help = true)]
    Providers {
        /// Virtual package name
        name: String,
    },

    /// Load a package and its requirements into a pool
    #[command(arg_required_else_help = true)]
    Resolve {
        /// Root requirements as vendor/name or vendor/name:version
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Run commands concurrently through the process scheduler
    #[command(arg_required_else_help = true)]
    Exec {
        /// Commands to run, one argument each ("git --version")
        #[arg(required = true)]
        commands: Vec<String>,
    },
}
