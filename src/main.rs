use anyhow::Result;
use clap::ArgAction;
use clap::Parser;
use log::info;
use log::warn;
use schload::workloads::plan::RunPlan;
use schload::workloads::spec::WorkloadSpec;

/// Command line arguments for the schload binary.
#[derive(Parser, Debug)]
#[command(
    name = "schload",
    about = "Periodic CPU workload generator",
    long_about = "This program generates periodic CPU load for exercising a scheduler. Every \
                 workload forks one process per replica; each wakes once per period and burns \
                 the requested amount of CPU time, measured with the thread CPU clock.\n\n\
                 Workloads are given as period:exec:cpu:policy:num. Period and exec are in \
                 milliseconds, policy is one of other, batch, idle, fifo or rr, and any of the \
                 last three fields may be '-' to keep the default."
)]
struct Args {
    /// Total run time in seconds.
    #[arg(short, long, default_value_t = 0)]
    duration: u32,

    /// Workload spec (period:exec:cpu:policy:num); may be repeated.
    #[arg(short = 't', long = "thread", value_name = "P:E:C:S:N")]
    threads: Vec<String>,

    /// Enable debug logging, including per-replica statistics.
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

/// Build the run plan, dropping malformed specs and any beyond the capacity.
fn build_plan(args: &Args) -> RunPlan {
    let mut plan = RunPlan::new(args.duration);
    for s in &args.threads {
        let spec = match s.parse::<WorkloadSpec>() {
            Ok(spec) => spec,
            Err(e) => {
                warn!("ignoring workload {s:?}: {e:#}");
                continue;
            }
        };
        if let Err(e) = plan.push(spec) {
            warn!("{e:#}, ignoring the rest");
            break;
        }
    }
    plan
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let plan = build_plan(&args);
    if plan.specs().is_empty() {
        warn!("no workloads given");
    }

    let outcome = plan.run()?;
    info!(
        "run complete: {} launched, {} failed",
        outcome.launched, outcome.failed
    );
    Ok(())
}
