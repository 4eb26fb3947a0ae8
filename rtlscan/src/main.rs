mod cli;

use clap::Parser;
use log::LevelFilter;
use std::io::Write;

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .format(|buf, record| {
            writeln!(
                buf,
                "{:<5} - mod path |{}| - {}",
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .filter_level(LevelFilter::Warn)
        .filter_module("rtlscan_engine", LevelFilter::Info)
        .filter_module("rtlscan", LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = cli::Args::parse();
    cli::run(&args)
}
