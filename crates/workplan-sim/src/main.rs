use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use tracing_subscriber::EnvFilter;
use workplan_core::simulator::{run, run_stress, SimulatorConfig, StressConfig};

fn cli() -> Command {
    Command::new("workplan-sim")
        .version(workplan_core::VERSION)
        .about("Invariant simulator for the workplan planning core")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run seeded random operations and check invariants after each")
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("2000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("staff")
                        .long("staff")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Staff members in the simulated team"),
                )
                .arg(
                    Arg::new("periods")
                        .long("periods")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Planning periods"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("stress")
                .about("Create tasks on one period staff from many threads at once")
                .arg(
                    Arg::new("threads")
                        .long("threads")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent writers"),
                )
                .arg(
                    Arg::new("attempts")
                        .long("attempts")
                        .default_value("20")
                        .value_parser(value_parser!(usize))
                        .help("Task creations per writer"),
                )
                .arg(
                    Arg::new("hours")
                        .long("hours")
                        .default_value("5")
                        .value_parser(value_parser!(u32))
                        .help("Hours per task"),
                )
                .arg(
                    Arg::new("capacity")
                        .long("capacity")
                        .default_value("400")
                        .value_parser(value_parser!(u32))
                        .help("Staff capacity for the period"),
                )
                .arg(
                    Arg::new("no-retry")
                        .long("no-retry")
                        .action(ArgAction::SetTrue)
                        .help("Count conflicts instead of retrying them"),
                ),
        )
}

fn arg<T: Clone + Send + Sync + 'static>(args: &clap::ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let json = matches.get_flag("json");

    let passed = match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                seed: arg(args, "seed")?,
                operations: arg(args, "operations")?,
                staff: arg(args, "staff")?,
                periods: arg(args, "periods")?,
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                ..SimulatorConfig::default()
            };
            tracing::info!(
                seed = config.seed,
                operations = config.operations,
                "starting simulation"
            );

            let report = run(config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }
            report.passed()
        }
        Some(("stress", args)) => {
            let config = StressConfig {
                threads: arg(args, "threads")?,
                attempts: arg(args, "attempts")?,
                hours: arg(args, "hours")?,
                capacity: arg(args, "capacity")?,
                retry_conflicts: !args.get_flag("no-retry"),
            };

            let report = run_stress(config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Stress Test Report:");
                println!("  Threads: {}", report.threads);
                println!("  Attempts: {}", report.attempts);
                println!("  Accepted: {}", report.accepted);
                println!("  Conflicts: {}", report.conflicts);
                println!("  Capacity rejections: {}", report.capacity_rejections);
                println!("  Final hours: {}", report.final_hours);
                for v in &report.violations {
                    println!("  VIOLATION: {v}");
                }
                println!("  Success: {}", report.success());
            }
            report.success()
        }
        _ => anyhow::bail!("unknown subcommand"),
    };

    std::process::exit(if passed { 0 } else { 1 });
}
