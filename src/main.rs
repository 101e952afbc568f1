use clap::Parser;
use rmake::{Error, Make, Options};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// rmake - build targets from a Makefile
#[derive(Parser)]
#[command(name = "rmake")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Read FILE as the rule file
    #[arg(short, long, default_value = "Makefile")]
    file: String,

    /// Run up to N recipes at the same time
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Do not echo recipe lines
    #[arg(short, long)]
    silent: bool,

    /// Keep going after errors
    #[arg(short, long)]
    keep_going: bool,

    /// Print recipe lines instead of running them
    #[arg(short = 'n', long)]
    just_print: bool,

    /// Change to DIRECTORY before doing anything
    #[arg(short = 'C', long)]
    directory: Option<PathBuf>,

    /// Treat references to undefined macros as errors
    #[arg(long)]
    undefined_error: bool,

    /// Do not read macros from the environment
    #[arg(long)]
    no_environment: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Targets to build, and NAME=VALUE overrides
    args: Vec<String>,
}

impl Cli {
    /// Split the positional arguments into options and targets
    fn into_options(self) -> (Options, Vec<String>) {
        let mut options = Options {
            jobs: self.jobs,
            silent: self.silent,
            stop_on_error: !self.keep_going,
            just_print: self.just_print,
            environment: !self.no_environment,
            file: self.file,
            ..Default::default()
        };
        if let Some(directory) = self.directory {
            options.directory = directory;
        }
        if self.undefined_error {
            options.undefined_expansion = None;
        }

        let mut targets = Vec::new();
        for arg in self.args {
            match arg.split_once('=') {
                Some((name, value)) => {
                    options
                        .overrides
                        .insert(name.trim().to_string(), value.to_string());
                }
                None => targets.push(arg),
            }
        }
        (options, targets)
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let (options, targets) = cli.into_options();
    let make = Make::load(options)?;
    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
    make.build(&targets)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if let Err(e) = run(cli) {
        match e {
            Error::Explicit { .. } => eprintln!("{}", e),
            _ => eprintln!("{}: *** {}", env!("CARGO_PKG_NAME"), e),
        }
        std::process::exit(e.exit_code());
    }
}
