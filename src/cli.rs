use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/security-updater/config.env";

#[derive(Parser, Debug)]
#[command(
    name = "security-updater",
    version,
    about = "Unattended security patching with monthly PDF reporting"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Update(UpdateArgs),
    Report(ReportArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[arg(requires = "month", value_parser = clap::value_parser!(i32).range(1970..=9999))]
    pub year: Option<i32>,

    #[arg(value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,

    #[arg(long, default_value_t = false)]
    pub no_send: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
