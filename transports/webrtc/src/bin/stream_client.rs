//! Stream client loopback binary
//!
//! Negotiates two in-process sessions against each other over real webrtc-rs
//! peer connections, routing their signaling messages through channels, and
//! logs the aggregated statistics of the offering side.
//!
//! # Usage
//!
//! ```bash
//! # Plain loopback, stats every second
//! cargo run --bin stream_client
//!
//! # Relay-only ICE through a TURN server, microphone on the offering side
//! cargo run --bin stream_client -- \
//!   --force-turn \
//!   --turn-servers turn:turn.example.com:3478:user:pass \
//!   --use-mic
//! ```

use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamclient_webrtc::{
    ChannelObserver, ControllerEvent, MediaCapture, NoCapture, PageContext,
    PeerConnectionOptions, SampleTrackCapture, SessionConfig, SharedConfig, SignalMessage,
    SignallingEndpoint, StreamSession, TurnServerConfig,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stream client loopback
///
/// Runs the negotiation core end to end without a signaling server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "STREAM_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "STREAM_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Restrict ICE to TURN relay candidates
    #[arg(long, default_value_t = false, env = "STREAM_FORCE_TURN")]
    force_turn: bool,

    /// Capture and send microphone audio from the offering side
    #[arg(long, default_value_t = false, env = "STREAM_USE_MIC")]
    use_mic: bool,

    /// Send mono instead of stereo Opus
    #[arg(long, default_value_t = false, env = "STREAM_FORCE_MONO_AUDIO")]
    force_mono_audio: bool,

    /// Forward aggregated stats over signaling
    #[arg(long, default_value_t = false, env = "STREAM_SEND_STATS")]
    send_stats_to_server: bool,

    /// Start bitrate hint in kbps
    #[arg(long, default_value_t = 10_000, env = "STREAM_START_BITRATE")]
    start_bitrate_kbps: u32,

    /// Max bitrate hint in kbps
    #[arg(long, default_value_t = 100_000, env = "STREAM_MAX_BITRATE")]
    max_bitrate_kbps: u32,

    /// Stats polling interval in milliseconds
    #[arg(
        long,
        default_value_t = 1000,
        env = "STREAM_STATS_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    stats_interval_ms: u64,

    /// Stop after this many seconds (0 = until Ctrl+C)
    #[arg(long, default_value_t = 10, env = "STREAM_DURATION")]
    duration_secs: u64,

    /// Origin of the hosting page (microphone needs a secure context)
    #[arg(long, default_value = "http://localhost/", env = "STREAM_PAGE_ORIGIN")]
    page_origin: String,

    /// Signalling URL to report (ws:// or wss://)
    #[arg(long, env = "STREAM_SIGNALLING_URL")]
    signalling_url: Option<String>,
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let scheme = parts[0];
    if scheme != "turn" && scheme != "turns" {
        return Err(format!(
            "Invalid TURN scheme: '{}'. Expected 'turn' or 'turns'",
            scheme
        ));
    }

    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", scheme, parts[1], parts[2]),
        username: parts[3].to_string(),
        // credential may contain colons
        credential: parts[4..].join(":"),
    })
}

fn build_options(args: &Args) -> Result<PeerConnectionOptions, Box<dyn std::error::Error>> {
    let mut turn_servers = Vec::new();
    for turn in &args.turn_servers {
        let turn = parse_turn_server(turn)?;
        info!("Adding TURN server: {} (user: {})", turn.url, turn.username);
        turn_servers.push(turn);
    }

    let options = PeerConnectionOptions::default()
        .with_stun_servers(args.stun_servers.clone())
        .with_turn_servers(turn_servers)
        .with_bitrates(args.start_bitrate_kbps, args.max_bitrate_kbps);
    options.validate()?;
    Ok(options)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("Ctrl+C received, shutting down");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("stream-client-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = streamclient_webrtc::version(),
        force_turn = args.force_turn,
        use_mic = args.use_mic,
        "Stream client loopback starting"
    );

    let options = build_options(&args)?;
    let page = PageContext::parse(&args.page_origin)?;
    let config = SharedConfig::new(
        SessionConfig::default()
            .with_force_turn(args.force_turn)
            .with_use_mic(args.use_mic)
            .with_force_mono_audio(args.force_mono_audio)
            .with_send_stats_to_server(args.send_stats_to_server),
    );

    let (offer_tx, mut offer_rx) = mpsc::unbounded_channel::<SignalMessage>();
    let (answer_tx, mut answer_rx) = mpsc::unbounded_channel::<SignalMessage>();
    let (observer, mut events) = ChannelObserver::new();

    let capture: Arc<dyn MediaCapture> = if args.use_mic {
        Arc::new(SampleTrackCapture::default())
    } else {
        Arc::new(NoCapture)
    };

    let mut offerer_builder = StreamSession::builder(Arc::new(offer_tx))
        .options(options.clone())
        .config(config.clone())
        .observer(Arc::new(observer))
        .capture(capture)
        .page_context(page);
    if let Some(url) = &args.signalling_url {
        offerer_builder = offerer_builder.endpoint(SignallingEndpoint::parse(url)?);
    }
    let offerer = Arc::new(offerer_builder.build().await?);

    let answerer = Arc::new(
        StreamSession::builder(Arc::new(answer_tx))
            .options(options)
            .config(SharedConfig::new(
                SessionConfig::default().with_force_turn(args.force_turn),
            ))
            .build()
            .await?,
    );

    if let Some(url) = offerer.signalling_url() {
        info!(url = %url, "Signalling endpoint (not connected in loopback mode)");
    }

    // offerer -> answerer
    let to_answerer = Arc::clone(&answerer);
    let offer_router = tokio::spawn(async move {
        while let Some(message) = offer_rx.recv().await {
            if let SignalMessage::Stats { data } = &message {
                info!(
                    rtt_ms = ?data.round_trip_time_ms(),
                    inbound_kbps = data.inbound_bitrate_kbps(),
                    "Stats sent to server"
                );
                continue;
            }
            if let Err(e) = to_answerer.handle_message(message).await {
                warn!(error = %e, "Answerer rejected signaling message");
            }
        }
    });

    // answerer -> offerer
    let to_offerer = Arc::clone(&offerer);
    let answer_router = tokio::spawn(async move {
        while let Some(message) = answer_rx.recv().await {
            if let Err(e) = to_offerer.handle_message(message).await {
                warn!(error = %e, "Offerer rejected signaling message");
            }
        }
    });

    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ControllerEvent::Stats(stats) => info!(
                    packet_loss = stats.packet_loss_rate(),
                    rtt_ms = ?stats.round_trip_time_ms(),
                    pair = ?stats.candidate_pair.as_ref().map(|p| p.state.clone()),
                    "Connection stats"
                ),
                ControllerEvent::SetupFailed => error!("Session setup failed"),
                other => debug!(event = ?other, "Controller event"),
            }
        }
    });

    offerer.start().await?;
    let poller = offerer.spawn_stats_poller(Duration::from_millis(args.stats_interval_ms))?;

    let deadline = (args.duration_secs > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_secs(args.duration_secs));
    while !shutdown_flag.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            info!("Run duration elapsed");
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!(
        dropped_candidates = offerer.controller().dropped_candidates(),
        "Shutting down"
    );
    offerer.close().await?;
    answerer.close().await?;
    poller.abort();
    offer_router.abort();
    answer_router.abort();
    event_logger.abort();

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
