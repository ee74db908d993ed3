//! Command implementations for the WML CLI.
//!
//! Provides a publisher that streams a reservoir CSV export onto the MQTT
//! bus, and a subscriber that aggregates every reservoir feed into daily
//! summary reports.

use clap::Subcommand;
use std::{path::PathBuf, time::Duration};

pub mod bus;
pub mod publish;
pub mod signal;
pub mod subscribe;

use bus::BusArgs;

fn parse_delay(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{}", e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{}", e))
}

#[derive(Subcommand)]
pub enum Command {
    /// Publish a reservoir CSV export (Date,TAF) to <RESERVOIR>/WML
    Publish {
        #[command(flatten)]
        bus: BusArgs,

        /// Path to the CSV export
        #[arg(short = 'f', long)]
        file: PathBuf,

        /// Reservoir id the rows belong to (e.g. SHASTA)
        #[arg(short = 'r', long)]
        reservoir: String,

        /// Seconds to wait between messages
        #[arg(long, default_value = "0.01", value_parser = parse_delay)]
        delay: Duration,
    },

    /// Aggregate all reservoir feeds and write daily reports on shutdown
    Subscribe {
        #[command(flatten)]
        bus: BusArgs,

        /// Directory for report_<date>.json / report_<date>.csv
        #[arg(short = 'o', long, default_value = "../reports")]
        outdir: PathBuf,

        /// Also rewrite reports every N seconds while running
        #[arg(long)]
        report_interval: Option<u64>,
    },
}

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Publish {
            bus,
            file,
            reservoir,
            delay,
        } => {
            let delay = (!delay.is_zero()).then_some(delay);
            publish::run_publish(&bus, &file, &reservoir, delay).await?;
            Ok(())
        }
        Command::Subscribe {
            bus,
            outdir,
            report_interval,
        } => {
            let report_interval = report_interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs);
            let outcomes =
                subscribe::run_subscribe(&bus, &outdir, report_interval, signal::shutdown_signal())
                    .await?;
            let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
            if failed > 0 {
                log::warn!("{} of {} daily reports were incomplete", failed, outcomes.len());
            }
            Ok(())
        }
    }
}
