use clap::{Args, Parser, Subcommand};

mod audit;
mod orders;

use audit::{print_audit, run_audit_worker};
use orders::print_order;

#[derive(Parser, Debug)]
#[command(version = "0.1.0", about = "Operator tools for the CoursePay engine")]
pub struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one transaction audit over a recent window and print the report as JSON. Exits non-zero when the
    /// anomaly threshold is exceeded.
    #[clap(name = "audit")]
    Audit(AuditParams),
    /// Run the transaction audit on a schedule, forever.
    #[clap(name = "audit-worker")]
    AuditWorker(AuditWorkerParams),
    /// Look up an order by its order number and print it, with its payment events, as JSON.
    #[clap(name = "order")]
    Order(OrderParams),
}

#[derive(Debug, Args, Clone, Copy)]
pub struct AuditParams {
    /// Minutes before now where the audit window starts
    #[arg(short = 's', long = "start-delta", default_value = "240")]
    start_delta: i64,
    /// Minutes before now where the audit window ends. The default leaves asynchronous fulfillment time to settle.
    #[arg(short = 'e', long = "end-delta", default_value = "40")]
    end_delta: i64,
    /// In [0, 1): the tolerated anomaly rate. At 1 or above, or exactly 0: the tolerated anomaly count.
    #[arg(short = 't', long = "threshold", default_value = "0.0")]
    threshold: f64,
    /// Support-team mode: report only mismatched totals, with the signed refund amount, and fail on any hit.
    #[arg(long = "support")]
    support: bool,
}

#[derive(Debug, Args, Clone, Copy)]
pub struct AuditWorkerParams {
    #[command(flatten)]
    audit: AuditParams,
    /// Minutes between audit runs
    #[arg(short = 'i', long = "interval", default_value = "30")]
    interval: u64,
}

#[derive(Debug, Args)]
pub struct OrderParams {
    /// The order number, e.g. EDX-100042
    #[arg(short = 'o', long = "order")]
    order_number: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    let cli = Arguments::parse();
    let result = match cli.command {
        Command::Audit(params) => print_audit(params).await,
        Command::AuditWorker(params) => run_audit_worker(params).await,
        Command::Order(params) => print_order(params).await,
    };
    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
