use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the offline streams workspace",
    long_about = "A unified CLI for running the local stream emulator against a service\n\
                  definition and for running the workspace CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the emulator against a service definition
    Run {
        /// Service definition to read
        #[arg(long, default_value = "serverless.yml")]
        service_file: String,
        /// Command that starts the local broker, e.g. "kinesalite --port {port}"
        #[arg(long, env = "OFFLINE_STREAMS_BROKER_COMMAND")]
        broker_command: Option<String>,
        /// Emit JSON log lines
        #[arg(long)]
        json_logs: bool,
    },
    /// Run the test suite of one crate, or of the whole workspace
    Test {
        #[arg(value_enum)]
        krate: Option<Crate>,
    },
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Crate {
    Core,
    Runtime,
}

impl Crate {
    fn package(self) -> &'static str {
        match self {
            Self::Core => "offline_streams_core",
            Self::Runtime => "offline_streams_runtime",
        }
    }
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Tests without the in-memory test helpers compiled in
    Minimal,
    /// Run check + minimal
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .unwrap_or_else(|error| {
            eprintln!("failed to execute cargo: {error}");
            exit(1)
        })
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    for krate in [Crate::Core, Crate::Runtime] {
        step(&format!("Test {}", krate.package()));
        run_cargo(&["test", "-p", krate.package()]);
    }
}

fn ci_minimal() {
    step("Build without test helpers");
    run_cargo(&[
        "build",
        "-p",
        "offline_streams_runtime",
        "--no-default-features",
    ]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            service_file,
            broker_command,
            json_logs,
        } => {
            let mut args = vec![
                "run",
                "-p",
                "offline_streams_runtime",
                "--bin",
                "offline_streams",
                "--",
                "--service-file",
                &service_file,
            ];
            if let Some(command) = broker_command.as_deref() {
                args.extend(["--broker-command", command]);
            }
            if json_logs {
                args.extend(["--log-format", "json"]);
            }
            run_cargo(&args);
        }
        Commands::Test { krate } => match krate {
            Some(krate) => run_cargo(&["test", "-p", krate.package()]),
            None => run_cargo(&["test", "--workspace"]),
        },
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Minimal => ci_minimal(),
                CiJob::All => {
                    ci_check();
                    ci_minimal();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
