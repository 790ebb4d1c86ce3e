use clap::Parser;
use edgeipc::app::{self, Settings};
use edgeipc::ipc::{Config, IpcClientFactory, DEFAULT_CLIENT_NAME};
use edgeipc::logger::LogLogger;
use edgeipc::{PUB_TOPIC, SAMPLE_MESSAGE, SUB_TOPIC};
use log::{info, trace};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[clap(version, about = "Edge runtime IPC pub/sub sample")]
struct Opts {
    #[clap(
        short = 'B',
        long = "path",
        help = "Broker socket path or host:port (default: runtime socket or /tmp/busrt.sock)"
    )]
    path: Option<String>,
    #[clap(short = 'n', long = "name", default_value = DEFAULT_CLIENT_NAME)]
    name: String,
    #[clap(long = "timeout", default_value = "5", help = "IPC timeout (seconds)")]
    timeout: f32,
    #[clap(long = "pub-topic", default_value = PUB_TOPIC)]
    pub_topic: String,
    #[clap(long = "sub-topic", default_value = SUB_TOPIC)]
    sub_topic: String,
    #[clap(long = "message", default_value = SAMPLE_MESSAGE)]
    message: String,
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,
    #[clap(short = 's', long = "silent", help = "suppress logging")]
    silent: bool,
}

macro_rules! handle_term_signal {
    ($kind: expr, $cancel: expr) => {{
        let cancel = $cancel.clone();
        tokio::spawn(async move {
            trace!("starting handler for {:?}", $kind);
            match tokio::signal::unix::signal($kind) {
                Ok(mut v) => {
                    v.recv().await;
                    trace!("got termination signal");
                    cancel.cancel();
                }
                Err(e) => {
                    log::error!("Unable to bind to signal {:?}: {}", $kind, e);
                }
            }
        });
    }};
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    if !opts.silent {
        env_logger::Builder::new()
            .target(env_logger::Target::Stdout)
            .filter_level(if opts.verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            })
            .init();
    }
    let cancel = CancellationToken::new();
    #[cfg(not(target_os = "windows"))]
    {
        use tokio::signal::unix::SignalKind;
        handle_term_signal!(SignalKind::interrupt(), cancel);
        handle_term_signal!(SignalKind::terminate(), cancel);
    }
    #[cfg(target_os = "windows")]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
    let config = match opts.path {
        Some(ref path) => Config::new(path, &opts.name),
        None => Config::from_env(&opts.name),
    }
    .timeout(Duration::from_secs_f32(opts.timeout));
    info!(
        "Connecting to {}, using client name {}",
        config.path(),
        config.name()
    );
    let settings = Settings::default()
        .pub_topic(&opts.pub_topic)
        .sub_topic(&opts.sub_topic)
        .message(&opts.message);
    let factory = IpcClientFactory::new(config);
    let code = app::run(&factory, &settings, &cancel, &LogLogger).await;
    std::process::exit(code);
}
