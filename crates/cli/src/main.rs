//! Thin launcher around the gateway: `start`, `status`, `pair approve`, `health`.
//!
//! Exit codes: `0` success, `2` bad arguments (handled by clap itself),
//! `3` configuration error, `4` bind failure, `5` another instance already
//! running.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conduit_protocol::{scopes, GatewayFrame, HelloFrame, RequestFrame};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ADMIN_DEVICE_ID: &str = "cli-admin";
const ADMIN_TOKEN_KEY: &str = "gateway.admin_token";

#[derive(Parser)]
#[command(name = "conduit", about = "Conduit — personal AI assistant gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is given).
    Start {
        /// Port to listen on (overrides config value).
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind to (overrides config value).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Report whether a gateway is reachable and how many clients are connected.
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
    /// Approve a pending channel pairing code.
    Pair {
        #[command(subcommand)]
        action: PairAction,
    },
    /// Probe `/health` on a running gateway.
    Health {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
}

#[derive(Subcommand)]
enum PairAction {
    /// `pair approve <channel> <code>`
    Approve {
        channel: String,
        code: String,
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true)).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "conduit starting");

    let result = match cli.command {
        None | Some(Commands::Start { port: None, bind: None }) => run_start(None, None).await,
        Some(Commands::Start { port, bind }) => run_start(bind, port).await,
        Some(Commands::Status { json, bind, port }) => run_status(&bind, port, json).await,
        Some(Commands::Pair { action: PairAction::Approve { channel, code, bind, port } }) => {
            run_pair_approve(&bind, port, &channel, &code).await
        }
        Some(Commands::Health { bind, port }) => run_health(&bind, port).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "conduit exited with an error");
            ExitCode::from(3)
        }
    }
}

async fn run_start(bind_override: Option<String>, port_override: Option<u16>) -> anyhow::Result<ExitCode> {
    let config = conduit_config::discover_and_load();
    let bind = bind_override.unwrap_or_else(|| config.gateway.bind.clone());
    let port = port_override.unwrap_or(config.gateway.port);

    if tokio::net::TcpStream::connect((bind.as_str(), port)).await.is_ok() {
        error!(%bind, port, "a gateway already appears to be listening on this address");
        return Ok(ExitCode::from(5));
    }

    let hooks_config = config.hooks.clone();
    let voice_config = config.voice.clone();
    let channels_config = config.channels.clone();

    let store = Arc::new(conduit_config::ConfigStore::new(config));
    let state = conduit_gateway::GatewayState::new(store);

    let secrets_path = conduit_config::config_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join("secrets.json");
    let secrets = conduit_config::FileSecretBackend::new(secrets_path)?;
    ensure_admin_token(&secrets).await?;
    state.devices.write().await.bootstrap(
        ADMIN_DEVICE_ID,
        "conduit CLI",
        vec![scopes::ADMIN.to_string()],
    );

    conduit_gateway::hook_dispatch::register_from_config(&state.hooks, &hooks_config).await;

    let thinker = build_thinker(&state);
    *state.thinker.write().await = Some(thinker);

    start_voice_pipeline(&state, voice_config).await;
    start_channel_manager(&state, channels_config, &secrets).await;

    match conduit_gateway::server::serve(state, &bind, port).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            error!(%err, "failed to bind gateway");
            Ok(ExitCode::from(4))
        }
    }
}

/// Builds the shared LLM port used by both voice and channel messages,
/// wrapped so its pre-flight/complete events always publish on the bus
/// regardless of which caller drives it. No real `LlmProvider` is wired up
/// yet, so this always resolves to the null stand-in; swapping in a
/// configured provider only touches this function.
fn build_thinker(state: &Arc<conduit_gateway::GatewayState>) -> Arc<dyn conduit_thinker::Thinker> {
    let sink = Arc::new(conduit_gateway::voice_bridge::GatewayThinkerEventSink { state: Arc::downgrade(state) });
    Arc::new(conduit_thinker::ThinkerWrapper::new(Arc::new(conduit_thinker::NullLlmProvider), sink))
}

/// Builds a `VoicePipeline` from configured STT/TTS providers (falling back
/// to the null stand-ins for whichever are absent) and `state.thinker`, and
/// registers it on `state.voice` so `voice.mode.set`/`speak`/`interrupt`
/// have something to act on. Always constructs one, even with every
/// provider unconfigured: the state machine stays live and reports
/// `provider-unavailable` honestly instead of leaving `voice.*` permanently
/// `unavailable`.
async fn start_voice_pipeline(state: &Arc<conduit_gateway::GatewayState>, voice_config: conduit_config::VoiceConfig) {
    use conduit_gateway::voice_bridge::{GatewayVoiceEventSink, ThinkerAdapter};

    let pipeline_config = conduit_voice::PipelineConfig {
        mode: voice_config.conversation.mode,
        vad: voice_config.vad.clone(),
        wake_phrases: voice_config.wake_word.clone().into_iter().collect(),
        wake_sensitivity: 0.5,
        voice_id: voice_config.tts.voice.clone(),
        listen_timeout: std::time::Duration::from_millis(voice_config.conversation.listen_timeout_ms),
    };

    let Some(thinker) = state.thinker.read().await.clone() else {
        warn!("voice pipeline not started: no thinker configured");
        return;
    };
    let thinker_adapter: Arc<dyn conduit_voice::Thinker> = Arc::new(ThinkerAdapter { inner: thinker });

    let cancel = tokio_util::sync::CancellationToken::new();
    let pipeline = conduit_voice::VoicePipeline::with_sink(
        pipeline_config,
        Box::new(conduit_voice::ThresholdWakeWordDetector::new(
            voice_config.wake_word.into_iter().collect(),
            0.5,
        )),
        Box::new(conduit_voice::NullRecorder),
        Box::new(conduit_voice::NullPlayer),
        Arc::new(conduit_voice::NullSttProvider),
        thinker_adapter,
        Arc::new(conduit_voice::NullTtsProvider),
        cancel,
        Arc::new(GatewayVoiceEventSink { state: Arc::downgrade(state) }),
    );

    let shared: conduit_voice::SharedPipeline = Arc::new(tokio::sync::Mutex::new(pipeline));
    *state.voice.write().await = Some(Arc::clone(&shared));

    tokio::spawn(async move {
        if let Err(err) = shared.lock().await.run().await {
            warn!(%err, "voice pipeline exited");
        }
    });
}

/// Registers an adapter per enabled entry in `channels_config`, resolving
/// each one's credential through `secrets` by its `credentials_ref`, then
/// spawns `ChannelManager::run_channel` per registered name. Entries
/// missing a resolvable credential (iMessage excepted, which needs none)
/// are skipped with a warning rather than failing startup.
async fn start_channel_manager(
    state: &Arc<conduit_gateway::GatewayState>,
    channels_config: std::collections::HashMap<String, conduit_config::ChannelConfig>,
    secrets: &conduit_config::FileSecretBackend,
) {
    use conduit_channels::adapters::{discord::DiscordAdapter, imessage::IMessageAdapter, signal::SignalAdapter, slack::SlackAdapter, telegram::TelegramAdapter, whatsapp::WhatsAppAdapter};
    use conduit_channels::ChannelAdapter;
    use conduit_config::SecretBackend;
    use conduit_gateway::channel_bridge::GatewayChannelBusSink;
    use conduit_gateway::pairing::GatewayPairingGateway;

    let pairing = Arc::new(GatewayPairingGateway { store: Arc::clone(&state.pairing) });
    let bus = Arc::new(GatewayChannelBusSink { state: Arc::downgrade(state) });
    let manager = Arc::new(conduit_channels::ChannelManager::new(pairing, bus));

    let mut started = Vec::new();
    for (name, cfg) in channels_config {
        if !cfg.enabled {
            continue;
        }

        let credential = match &cfg.credentials_ref {
            Some(key) => match secrets.get(key).await {
                Ok(Some(secret)) => Some(secret.expose_secret().to_string()),
                Ok(None) => {
                    warn!(channel = %name, %key, "channel credential not found in secret store, skipping");
                    continue;
                },
                Err(err) => {
                    warn!(channel = %name, %key, %err, "failed to read channel credential, skipping");
                    continue;
                },
            },
            None => None,
        };

        let adapter: Box<dyn ChannelAdapter> = match name.as_str() {
            "telegram" => {
                let Some(token) = credential else {
                    warn!(channel = %name, "missing bot_token credential, skipping");
                    continue;
                };
                Box::new(TelegramAdapter::new(name.clone(), token))
            },
            "whatsapp" => {
                let Some(session_path) = credential else {
                    warn!(channel = %name, "missing session_path credential, skipping");
                    continue;
                };
                Box::new(WhatsAppAdapter::new(name.clone(), session_path))
            },
            "discord" => {
                let Some(token) = credential else {
                    warn!(channel = %name, "missing bot_token credential, skipping");
                    continue;
                };
                Box::new(DiscordAdapter::new(name.clone(), token))
            },
            "slack" => {
                let Some(token) = credential else {
                    warn!(channel = %name, "missing app_token credential, skipping");
                    continue;
                };
                Box::new(SlackAdapter::new(name.clone(), token))
            },
            "imessage" => Box::new(IMessageAdapter::new(name.clone())),
            "signal" => {
                let Some(phone_number) = credential else {
                    warn!(channel = %name, "missing phone_number credential, skipping");
                    continue;
                };
                Box::new(SignalAdapter::new(name.clone(), phone_number))
            },
            other => {
                warn!(channel = %other, "unrecognized channel name, skipping");
                continue;
            },
        };

        manager.register(adapter, cfg).await;
        started.push(name);
    }

    if started.is_empty() {
        return;
    }

    for name in started {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_channel(&name).await });
    }
    *state.channels.write().await = Some(manager);
}

/// Returns the admin bearer token, generating and persisting one on first run.
async fn ensure_admin_token(secrets: &conduit_config::FileSecretBackend) -> anyhow::Result<SecretString> {
    use conduit_config::SecretBackend;
    if let Some(existing) = secrets.get(ADMIN_TOKEN_KEY).await? {
        return Ok(existing);
    }
    let token = SecretString::from(uuid::Uuid::new_v4().to_string());
    secrets.set(ADMIN_TOKEN_KEY, SecretString::from(token.expose_secret().to_string())).await?;
    Ok(token)
}

async fn run_health(bind: &str, port: u16) -> anyhow::Result<ExitCode> {
    let url = format!("http://{bind}:{port}/health");
    match reqwest::get(&url).await {
        Ok(resp) => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            warn!(%err, %url, "health check failed");
            Ok(ExitCode::from(4))
        }
    }
}

async fn run_status(bind: &str, port: u16, json: bool) -> anyhow::Result<ExitCode> {
    let url = format!("http://{bind}:{port}/health");
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            if json {
                println!("{}", serde_json::to_string(&body)?);
            } else {
                println!(
                    "gateway reachable at {bind}:{port} — {} connection(s), protocol v{}",
                    body.get("connections").and_then(|v| v.as_u64()).unwrap_or(0),
                    body.get("protocol").and_then(|v| v.as_u64()).unwrap_or(0),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            if json {
                println!("{}", serde_json::json!({ "status": "unreachable" }));
            } else {
                println!("no gateway reachable at {bind}:{port}");
            }
            Ok(ExitCode::from(4))
        }
    }
}

async fn run_pair_approve(bind: &str, port: u16, channel: &str, code: &str) -> anyhow::Result<ExitCode> {
    let secrets_path = conduit_config::config_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join("secrets.json");
    let secrets = conduit_config::FileSecretBackend::new(secrets_path)?;
    use conduit_config::SecretBackend;
    let Some(token) = secrets.get(ADMIN_TOKEN_KEY).await? else {
        error!("no admin token found; start the gateway at least once before pairing");
        return Ok(ExitCode::from(3));
    };

    let url = format!("ws://{bind}:{port}/ws");
    let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
        Ok(pair) => pair,
        Err(err) => {
            error!(%err, %url, "failed to reach gateway");
            return Ok(ExitCode::from(4));
        }
    };
    let (mut tx, mut rx) = ws_stream.split();

    // Wait for the challenge, then reply with `hello` as the bootstrapped admin device.
    loop {
        let Some(msg) = rx.next().await else {
            anyhow::bail!("connection closed before challenge");
        };
        let Message::Text(text) = msg? else { continue };
        let frame: GatewayFrame = serde_json::from_str(&text)?;
        if matches!(frame, GatewayFrame::Challenge(_)) {
            break;
        }
    }

    let hello = HelloFrame {
        r#type: "hello".into(),
        device_id: ADMIN_DEVICE_ID.into(),
        token: token.expose_secret().to_string(),
        scopes: vec![scopes::ADMIN.to_string()],
    };
    tx.send(Message::Text(serde_json::to_string(&hello)?.into())).await?;

    loop {
        let Some(msg) = rx.next().await else {
            anyhow::bail!("connection closed during handshake");
        };
        let Message::Text(text) = msg? else { continue };
        match serde_json::from_str::<GatewayFrame>(&text)? {
            GatewayFrame::HelloOk(_) => break,
            GatewayFrame::HelloErr(err) => anyhow::bail!("handshake rejected: {}", err.reason),
            _ => continue,
        }
    }

    let request = RequestFrame {
        id: serde_json::json!(1),
        method: conduit_protocol::methods::PAIRING_APPROVE.into(),
        params: Some(serde_json::json!({ "channel": channel, "code": code })),
    };
    tx.send(Message::Text(serde_json::to_string(&request)?.into())).await?;

    loop {
        let Some(msg) = rx.next().await else {
            anyhow::bail!("connection closed before response");
        };
        let Message::Text(text) = msg? else { continue };
        match serde_json::from_str::<GatewayFrame>(&text)? {
            GatewayFrame::Response(resp) => {
                if let Some(err) = resp.error {
                    println!("pairing.approve failed: {} ({})", err.message, err.code);
                    return Ok(ExitCode::from(3));
                }
                println!("paired: {}", resp.result.unwrap_or_default());
                return Ok(ExitCode::SUCCESS);
            }
            _ => continue,
        }
    }
}
