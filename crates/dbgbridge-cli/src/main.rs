//! Command-line harness for the runtime-hosting bridge.
//!
//! Drives the same bridge the debugger extension exposes, without a debugger:
//! no client is bound and teardown always runs synchronously.

mod drive;

use clap::{Parser, Subcommand};
use dbgbridge_shared::{Error, ImageBitness, logging, probe_assembly};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dbgbridge")]
#[command(about = "Probe and drive managed debugger-extension assemblies")]
struct Cli {
    /// Log at debug level (DBGBRIDGE_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect an extension assembly and the runtime it would run on
    Probe {
        /// Path to the extension assembly
        assembly: PathBuf,
    },
    /// Execute a script file with arguments
    Run {
        #[command(flatten)]
        target: Target,
        /// Script path handed to the entry object
        script: String,
        /// Arguments passed to the script
        args: Vec<String>,
    },
    /// Forward raw text to the single-string script call
    Exec {
        #[command(flatten)]
        target: Target,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Interpret a line of script code
    Interpret {
        #[command(flatten)]
        target: Target,
        #[arg(required = true)]
        code: Vec<String>,
    },
}

/// Where the managed entry object comes from.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Target {
    /// Extension assembly (default: DBGBRIDGE_ASSEMBLY or CsDebugScript.UI.dll)
    #[arg(short, long)]
    pub assembly: Option<PathBuf>,
    /// Fully qualified entry type
    #[arg(short, long)]
    pub entry_type: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(if cli.verbose { "debug" } else { "warn" });

    let result = match cli.command {
        Commands::Probe { assembly } => probe(&assembly),
        Commands::Run {
            target,
            script,
            args,
        } => {
            let mut text = script;
            for arg in &args {
                text.push(' ');
                text.push_str(arg);
            }
            drive::run(&target, drive::Command::Execute, &text)
        }
        Commands::Exec { target, text } => {
            drive::run(&target, drive::Command::ExecuteText, &text.join(" "))
        }
        Commands::Interpret { target, code } => {
            drive::run(&target, drive::Command::Interpret, &code.join(" "))
        }
    };

    if let Err(e) = result {
        eprintln!("{}", failure_message(&e));
        std::process::exit(1);
    }
}

/// The exit code is always 1, so the status travels in the message.
/// Boundary failures already name theirs.
fn failure_message(error: &Error) -> String {
    match error.failure() {
        Some(_) => format!("Error: {}", error),
        None => format!("Error: {} (status {})", error, error.status()),
    }
}

fn probe(assembly: &std::path::Path) -> dbgbridge_shared::Result<()> {
    let probe = probe_assembly(assembly)?;

    println!("Assembly: {}", probe.path.display());
    println!("  Name:    {}", probe.name);
    let bitness = match probe.bitness {
        Some(ImageBitness::Pe32) => "PE32",
        Some(ImageBitness::Pe64) => "PE32+",
        None => "unknown",
    };
    println!("  Image:   {}", bitness);
    println!("  Managed: {}", if probe.managed { "yes" } else { "no" });

    match drive::resolve_runtime(&probe.path) {
        Ok(version) => println!("  Runtime: {}", version),
        Err(e) => println!("  Runtime: unavailable ({})", e),
    }
    Ok(())
}
