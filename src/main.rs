//! usbip-bridge
//!
//! Exports the USB devices plugged into this machine to remote `usbip`
//! clients.
use clap::Parser;
use log::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::signal;
use usbip_bridge::host::{host_event_channel, list_exportable_devices, LibusbHost};
use usbip_bridge::server::UsbIpServer;
use usbip_bridge::{Error, Result, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "usbip-bridge")]
#[command(author, version, about = "Export local USB devices over USB/IP")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// List exportable USB devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn setup_logging(level: &str) {
    // RUST_LOG still takes precedence
    env_logger::Builder::new()
        .parse_filters(level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    setup_logging(&config.log_level);
    info!("usbip-bridge v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        let filters = config.usb.device_filters()?;
        let devices = tokio::task::spawn_blocking(move || list_exportable_devices(&filters))
            .await
            .map_err(|err| Error::Io(err.into()))??;
        if devices.is_empty() {
            println!("No exportable USB devices found");
        }
        for device in devices {
            println!("{}", device);
        }
        return Ok(());
    }

    let (sink, events) = host_event_channel();
    let host = LibusbHost::new(&config.usb, config.max_devices, sink, Handle::current())?;
    let addr = config.bind_addr;
    let server = UsbIpServer::new(config, Arc::new(host.clone()));

    tokio::spawn(server.clone().process_host_events(events));
    tokio::spawn(host.clone().rescan_loop());
    let listener = tokio::spawn(server.clone().serve(addr));

    let result = tokio::select! {
        res = listener => match res {
            Ok(res) => res,
            Err(err) => Err(Error::Io(err.into())),
        },
        res = signal::ctrl_c() => {
            info!("Shutting down");
            res.map_err(Error::from)
        }
    };
    if let Err(err) = &result {
        error!("Server failed: {}", err);
    }

    server.shutdown();
    host.close();
    result
}
