use anyhow::{Context, Result};
use clap::Parser;
use confique::Config;
use crossbeam_channel::bounded;
use log::{info, LevelFilter};
use rwaved::{AcquisitionConfig, Conf, Server, Session, SimDigitizer};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use std::path::PathBuf;
use time::macros::format_description;

#[derive(Parser, Debug)]
#[command(name = "rwaved", about = "Remote acquisition server for waveform digitizers")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose)?;

    let mut builder = Conf::builder().env();
    if let Some(path) = &args.config {
        builder = builder.file(path);
    }
    let mut conf = builder.load().context("loading configuration")?;
    if let Some(port) = args.port {
        conf.server.port = port;
    }
    let acq = AcquisitionConfig::from_settings(&conf.acquisition)?;

    // interrupts go through a channel the serve loop polls; no I/O happens
    // in signal context
    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("installing interrupt handler")?;

    let mut session =
        Session::open(SimDigitizer::new(), acq).context("opening digitizer")?;
    info!("model name: {}", session.model());

    let server = Server::bind(&conf.server, shutdown_rx)?;
    let exit = server.run(&mut session)?;
    info!("serve loop ended: {exit:?}");

    session.close().context("closing digitizer")?;
    info!("server is shutting down, have a good day");
    Ok(())
}

fn init_logger(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let config = ConfigBuilder::new()
        .set_time_format_custom(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .build();
    TermLogger::init(level, config, TerminalMode::Mixed, ColorChoice::Auto)?;
    Ok(())
}
