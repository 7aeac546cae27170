//! Binary entrypoint for the trackerconf CLI.
//!
//! Commands:
//! - `init` - write a starter `trackerconf.toml`
//! - `fetch` - read settings from the tracker into the local cache
//! - `push <file>` - send a settings document to the tracker
//! - `set <path=value>... [--push]` - edit cached settings, optionally saving them to the tracker
//! - `show` - list every field of the cached settings with validation marks
//! - `validate <file>` - check a settings or backup document
//! - `defaults` - print default settings
//! - `backup [--out <file>]` / `restore <file>` - export or import the cached settings
//! - `reboot`, `send-beacon` - device actions (HTTP only)
//! - `packets [--once]` - watch packets received by the tracker (HTTP only)
//!
//! See the library crate docs for module-level details: `trackerconf::`.
use std::io::Write;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use trackerconf::codec::form;
use trackerconf::config::{Config, DEFAULT_CONFIG_PATH};
use trackerconf::settings::Settings;
use trackerconf::store::{cache::FileCache, SettingsStore};
use trackerconf::sync::{Notice, NoticeLevel, SyncController};
use trackerconf::transport::Transport;

const DEFAULT_BACKUP_FILE: &str = "TrackerConfigurationBackup.json";

#[derive(Parser)]
#[command(name = "trackerconf")]
#[command(about = "Configure a LoRa APRS tracker over serial or Wi-Fi")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Link used to reach the tracker
    #[arg(long, value_enum, default_value_t = Via::Serial, global = true)]
    via: Via,

    /// Serial port, overrides [device] port
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Admin page base URL, overrides [device] url
    #[arg(short, long, global = true)]
    url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Via {
    Serial,
    Http,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Read settings from the tracker
    Fetch,
    /// Send a settings document to the tracker
    Push {
        /// Settings JSON file
        file: String,
    },
    /// Edit cached settings, e.g. `set lora.power=17 beacons.0.callsign=EA1ABC-7`
    Set {
        /// Field assignments as path=value
        #[arg(required = true)]
        assignments: Vec<String>,
        /// Also save the result to the tracker
        #[arg(long)]
        push: bool,
    },
    /// List cached settings with validation marks
    Show,
    /// Validate a settings or backup document
    Validate {
        file: String,
    },
    /// Print default settings
    Defaults,
    /// Export cached settings to a backup file
    Backup {
        #[arg(short, long, default_value = DEFAULT_BACKUP_FILE)]
        out: String,
    },
    /// Import a backup file into the cache
    Restore {
        file: String,
    },
    /// Reboot the tracker (HTTP)
    Reboot,
    /// Transmit a beacon now (HTTP)
    SendBeacon,
    /// Watch packets received by the tracker (HTTP)
    Packets {
        /// Print the current list once and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        if std::path::Path::new(&cli.config).exists() {
            return Err(anyhow!("{} already exists; not overwriting", cli.config));
        }
        Config::create_default(&cli.config).await?;
        info!("Wrote default configuration to {}", cli.config);
        return Ok(());
    }

    let mut config = Config::load_or_default(&cli.config).await?;
    if let Some(port) = &cli.port {
        config.device.port = port.clone();
    }
    if let Some(url) = &cli.url {
        config.device.url = url.clone();
    }
    init_logging(&Some(config.clone()), cli.verbose);
    debug!("Using configuration {}", cli.config);

    match cli.command {
        Commands::Init => {}
        Commands::Fetch => {
            let mut session = Session::open(&config, cli.via)?;
            let result = async {
                let sync = &mut session.sync;
                sync.connect().await?;
                let store = sync.store_mut();
                store.flush_pending()?;
                println!("{}", store.export_backup()?);
                sync.disconnect().await?;
                Ok::<(), anyhow::Error>(())
            }
            .await;
            session.finish(result).await?;
        }
        Commands::Push { file } => {
            let settings = read_settings(&file).await?;
            let mut session = Session::open(&config, cli.via)?;
            let result = async {
                let sync = &mut session.sync;
                sync.connect().await?;
                sync.save(settings).await?;
                sync.store_mut().flush_pending()?;
                sync.disconnect().await?;
                Ok::<(), anyhow::Error>(())
            }
            .await;
            session.finish(result).await?;
        }
        Commands::Set { assignments, push } => {
            if push {
                let mut session = Session::open(&config, cli.via)?;
                let result = async {
                    let sync = &mut session.sync;
                    sync.connect().await?;
                    apply_assignments(sync.store_mut(), &assignments)?;
                    sync.save_current().await?;
                    sync.store_mut().flush_pending()?;
                    sync.disconnect().await?;
                    Ok::<(), anyhow::Error>(())
                }
                .await;
                session.finish(result).await?;
            } else {
                let mut store = open_store(&config);
                apply_assignments(&mut store, &assignments)?;
                if !store.is_valid() {
                    warn!("Settings are invalid and were not cached: {}", store.report());
                }
                store.flush_pending()?;
            }
        }
        Commands::Show => {
            let store = open_store(&config);
            if !store.restored_from_cache() {
                println!("(no cached settings; showing defaults)");
            }
            print_fields(&store)?;
        }
        Commands::Validate { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", file))?;
            let report = config.schema().validate_value(&value);
            if report.is_valid() {
                println!("{}: valid", file);
            } else {
                for field in report.violations() {
                    if let Some(violation) = &field.violation {
                        println!("{}: {}", field.path, violation);
                    }
                }
                return Err(anyhow!("{} is not a valid settings document", file));
            }
        }
        Commands::Defaults => {
            let defaults = config.schema().default_value();
            println!("{}", serde_json::to_string_pretty(&defaults)?);
        }
        Commands::Backup { out } => {
            let store = open_store(&config);
            tokio::fs::write(&out, store.export_backup()?)
                .await
                .with_context(|| format!("Failed to write {}", out))?;
            info!("Backup written to {}", out);
        }
        Commands::Restore { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            let mut store = open_store(&config);
            store.import_backup(&raw)?;
            if !store.is_valid() {
                warn!("Restored settings fail validation: {}", store.report());
            }
            store.flush_pending()?;
            info!("Restored {} into the local cache", file);
        }
        Commands::Reboot => device_action(&config, DeviceAction::Reboot).await?,
        Commands::SendBeacon => device_action(&config, DeviceAction::SendBeacon).await?,
        Commands::Packets { once } => watch_packets(&config, once).await?,
    }

    Ok(())
}

fn open_store(config: &Config) -> SettingsStore {
    SettingsStore::open(
        config.schema(),
        Box::new(FileCache::new(&config.cache.dir)),
        config.debounce(),
    )
}

/// A controller plus the task printing its notices.
struct Session {
    sync: SyncController,
    printer: JoinHandle<()>,
}

impl Session {
    fn open(config: &Config, via: Via) -> Result<Self> {
        let transport = build_transport(config, via)?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Notice>();
        let printer = spawn_printer(rx, std::io::stderr());
        let sync = SyncController::new(transport, open_store(config), config.sync_options())
            .with_notices(tx);
        Ok(Self { sync, printer })
    }

    /// Drop the controller so the channel closes, then let the printer drain.
    async fn finish<T>(self, result: Result<T>) -> Result<T> {
        drop(self.sync);
        if let Err(e) = self.printer.await {
            debug!("Notice printer ended abnormally: {}", e);
        }
        result
    }
}

fn spawn_printer<W>(mut rx: UnboundedReceiver<Notice>, mut out: W) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            let mark = match notice.level {
                NoticeLevel::Success => "ok",
                NoticeLevel::Info => "--",
                NoticeLevel::Error => "!!",
            };
            let _ = writeln!(out, "[{}] {}", mark, notice.message);
        }
    })
}

fn build_transport(config: &Config, via: Via) -> Result<Box<dyn Transport>> {
    match via {
        #[cfg(feature = "serial")]
        Via::Serial => Ok(Box::new(trackerconf::transport::serial::SerialTransport::new(
            &config.device.port,
            config.device.baud_rate,
        ))),
        #[cfg(feature = "http")]
        Via::Http => Ok(Box::new(
            trackerconf::transport::http::HttpTransport::with_write_path(
                &config.device.url,
                &config.device.write_path,
            ),
        )),
        #[allow(unreachable_patterns)]
        other => Err(anyhow!("{:?} support was not compiled in", other)),
    }
}

#[derive(Debug, Clone, Copy)]
enum DeviceAction {
    Reboot,
    SendBeacon,
}

#[cfg(feature = "http")]
fn http_device(config: &Config) -> trackerconf::transport::http::HttpTransport {
    trackerconf::transport::http::HttpTransport::with_write_path(
        &config.device.url,
        &config.device.write_path,
    )
}

#[cfg(feature = "http")]
async fn device_action(config: &Config, action: DeviceAction) -> Result<()> {
    let device = http_device(config);
    match action {
        DeviceAction::Reboot => {
            device.reboot().await?;
            println!("Your device will be rebooted in a while");
        }
        DeviceAction::SendBeacon => {
            device.send_beacon().await?;
            println!("Beacon requested");
        }
    }
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn device_action(_config: &Config, action: DeviceAction) -> Result<()> {
    Err(anyhow!("{:?} needs HTTP support, which was not compiled in", action))
}

async fn read_settings(file: &str) -> Result<Settings> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a settings document", file))
}

fn apply_assignments(store: &mut SettingsStore, assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        let (path, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("expected path=value, got '{}'", assignment))?;
        if path.trim() == "beacons" {
            resize_beacons(store, value)?;
            continue;
        }
        store.set_field(path.trim(), value)?;
        if let Some(result) = store.report().get(path.trim()) {
            if let Some(violation) = &result.violation {
                warn!("{}: {}", result.path, violation);
            }
        }
    }
    Ok(())
}

/// `beacons=N` grows or shrinks the beacon list within the schema bounds.
fn resize_beacons(store: &mut SettingsStore, value: &str) -> Result<()> {
    let target: usize = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("beacons expects a count, got '{}'", value))?;
    while store.settings().beacons.len() < target {
        if !store.add_beacon() {
            return Err(anyhow!(
                "at most {} beacons are allowed",
                store.schema().max_beacons
            ));
        }
    }
    while store.settings().beacons.len() > target {
        let last = store.settings().beacons.len() - 1;
        store.remove_beacon(last);
    }
    Ok(())
}

fn print_fields(store: &SettingsStore) -> Result<()> {
    let report = store.report();
    if let Some(count) = report.get("beacons") {
        let mark = if count.is_ok() { " " } else { "x" };
        println!("[{}] beacons = {}", mark, store.settings().beacons.len());
    }
    for binding in form::bindings(store.settings())? {
        let problem = report
            .get(&binding.name)
            .and_then(|r| r.violation.as_ref())
            .map(|v| format!("  <- {}", v))
            .unwrap_or_default();
        let mark = if problem.is_empty() { " " } else { "x" };
        println!("[{}] {} = {}{}", mark, binding.name, binding.display_value(), problem);
    }
    Ok(())
}

#[cfg(feature = "http")]
async fn watch_packets(config: &Config, once: bool) -> Result<()> {
    let device = http_device(config);
    let mut last_seen: Option<u64> = None;
    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping packet monitor");
                return Ok(());
            }
        }
        match device.received_packets().await {
            Ok(packets) => {
                for packet in packets
                    .iter()
                    .filter(|p| last_seen.map_or(true, |seen| p.millis > seen))
                {
                    println!(
                        "{:>10} ms  RSSI {:>4}  SNR {:>5.1}  {}",
                        packet.millis, packet.rssi, packet.snr, packet.packet
                    );
                }
                if let Some(newest) = packets.iter().map(|p| p.millis).max() {
                    last_seen = Some(last_seen.map_or(newest, |seen| seen.max(newest)));
                }
            }
            Err(e) if !once => warn!("Failed to fetch received packets: {}", e),
            Err(e) => return Err(e.into()),
        }
        if once {
            return Ok(());
        }
    }
}

#[cfg(not(feature = "http"))]
async fn watch_packets(_config: &Config, _once: bool) -> Result<()> {
    Err(anyhow!("HTTP support was not compiled in"))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Only echo to the console when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use trackerconf::settings::schema::Schema;
    use trackerconf::store::cache::MemoryCache;
    use trackerconf::sync::SyncOptions;
    use trackerconf::transport::mock::MockTransport;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn finishing_a_session_prints_every_notice() {
        let (transport, _handle) = MockTransport::serial(Settings::default());
        let store = SettingsStore::new(
            Schema::default(),
            Box::new(MemoryCache::new()),
            Duration::from_millis(1000),
        );
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let captured = Captured::default();
        let printer = spawn_printer(rx, captured.clone());
        let sync = SyncController::new(Box::new(transport), store, SyncOptions::default())
            .with_notices(tx);
        let mut session = Session { sync, printer };

        session.sync.connect().await.unwrap();
        session.sync.disconnect().await.unwrap();
        session.finish(Ok(())).await.unwrap();

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "[ok] Connected\n[--] Disconnected\n");
    }
}
