mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use birb_core::controller::StreamProxyController;
use birb_core::probe::HealthProbe;
use birb_core::process::ProcessHandle;
use birb_core::refresh::RefreshCoordinator;
use birb_core::resolver::StreamlinkResolver;
use birb_core::sources::SourceList;
use birb_core::{CoreEvent, Engine};
use birb_proto::config::Config;
use birb_proto::protocol::Notification;
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "birbwatch", about = "Browse, validate and proxy live bird cams")]
struct Args {
    /// Config file (default: <config dir>/birbwatch/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the refresh on startup even if the config asks for it
    #[arg(long)]
    no_refresh: bool,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,
}

/// Tracing layer that surfaces warnings and errors to the front end.
struct ForwardLayer {
    sender: broadcast::Sender<Notification>,
}

impl<S> tracing_subscriber::Layer<S> for ForwardLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // No receivers is OK
        let _ = self.sender.send(Notification::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(
    config: &Config,
    to_stderr: bool,
    notify: broadcast::Sender<Notification>,
) -> anyhow::Result<()> {
    let writer = if to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        if let Some(dir) = config.logging.file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        BoxMakeWriter::new(Arc::new(file))
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(to_stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(ForwardLayer { sender: notify })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;

    // Created first so the log layer can forward into it
    let (notify_tx, notify_rx) = broadcast::channel::<Notification>(256);
    init_logging(&config, args.log_stderr, notify_tx.clone())?;

    if !args.log_stderr {
        info!("Log file: {:?}", config.logging.file);
    }
    info!("Config loaded from: {:?}", config_path);
    info!(
        "streamlink: {:?}, quality {}",
        config.streamlink.binary,
        config.quality_arg()
    );
    if config.streamlink.quality.is_empty() {
        warn!("no quality preference configured; every stream will fail validation");
    }

    // Every input into the engine funnels through this channel
    let (event_tx, event_rx) = mpsc::unbounded_channel::<CoreEvent>();

    let probe_timeout = Duration::from_secs(config.streamlink.probe_timeout_secs);
    let catalog = Arc::new(SourceList::new(
        &config.behavior.stream_db_source,
        probe_timeout,
    ));
    let resolver = Arc::new(StreamlinkResolver::new(
        config.streamlink.binary.clone(),
        probe_timeout,
    ));
    let probe = Arc::new(HealthProbe::new(
        resolver,
        config.streamlink.quality.clone(),
    ));
    let refresh = RefreshCoordinator::new(
        catalog,
        probe,
        config.behavior.validate_concurrency,
        event_tx.clone(),
    );

    let process = ProcessHandle::new(
        config.streamlink.binary.clone(),
        config.streamserver.ready_marker(),
        Duration::from_secs(config.streamserver.stop_timeout_secs),
        event_tx.clone(),
    );
    let controller = StreamProxyController::new(
        process,
        config.streamserver.port,
        config.streamlink.quality.clone(),
    );

    let engine = Engine::new(
        refresh,
        controller,
        notify_tx.clone(),
        config.behavior.refresh_on_start && !args.no_refresh,
    );

    let ctrl_c_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = ctrl_c_tx.send(CoreEvent::Shutdown);
        }
    });

    tokio::spawn(console::run(
        event_tx,
        notify_rx,
        config.behavior.show_statusbar_streaming,
    ));

    info!("birbwatch initialised, running event loop");
    engine.run(event_rx).await?;
    Ok(())
}
