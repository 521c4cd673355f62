use clap::{App, Arg};
use rigbus::config::CoordinatorConfig;
use rigbus::coordinator::{Coordinator, CoordinatorHandle, OperatorCommand};
use rigbus::interlock::SafetyState;
use rigbus::subsystems::{
    ActuatorCommand, AudioAdapter, ServoAdapter, ServoRail, SharedSink, SubsystemAdapter,
    VisionAdapter,
};
use rigbus::telemetry::TelemetryEvent;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Stop,
    Reset,
    Status,
    Watch,
    Actuate { channel: u8, target: f32 },
}

#[derive(Debug, Serialize)]
struct Reply {
    ok: bool,
    safety_state: SafetyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_event: Option<TelemetryEvent>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("rigbusd")
        .version("0.1.0")
        .about("Animatronic rig safety coordinator daemon")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("PATH")
                .help("Path to JSON config file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("Override the configured bind address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Override the configured port")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => CoordinatorConfig::load(Path::new(path))?,
        None => CoordinatorConfig::default(),
    };
    if let Some(host) = matches.value_of("host") {
        config.bind_addr = host.to_string();
    }
    if let Some(port) = matches.value_of("port") {
        config.port = port.parse()?;
    }

    let rail = ServoRail::new();
    let adapters: Vec<Box<dyn SubsystemAdapter>> = vec![
        Box::new(ServoAdapter::new(rail.clone())),
        Box::new(AudioAdapter::new()),
        Box::new(VisionAdapter::new()),
    ];
    let sinks: Vec<SharedSink> = vec![rail];
    let bind = format!("{}:{}", config.bind_addr, config.port);
    let (mut coordinator, handle) = Coordinator::new(config, adapters, sinks)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Cache of the most recent telemetry event for status queries.
    let latest_event: Arc<RwLock<Option<TelemetryEvent>>> = Arc::new(RwLock::new(None));
    {
        let latest_event = Arc::clone(&latest_event);
        let mut rx = handle.telemetry.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        *latest_event.write().await = Some(event);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
    }

    let server_handle = handle.clone();
    let server_latest = Arc::clone(&latest_event);
    let server = tokio::spawn(async move {
        if let Err(e) = serve(&bind, server_handle, server_latest).await {
            error!("operator server error: {e}");
        }
    });

    let control_loop = tokio::spawn(async move {
        coordinator.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = control_loop.await;
    server.abort();
    Ok(())
}

async fn serve(
    bind: &str,
    handle: CoordinatorHandle,
    latest_event: Arc<RwLock<Option<TelemetryEvent>>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(bind).await?;
    info!("operator server listening on {bind}");

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("client connected: {addr}");
        let client_handle = handle.clone();
        let client_latest = Arc::clone(&latest_event);
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, client_handle, client_latest).await {
                warn!("client {addr} error: {e}");
            }
            info!("client {addr} disconnected");
        });
    }
}

async fn handle_client(
    stream: TcpStream,
    handle: CoordinatorHandle,
    latest_event: Arc<RwLock<Option<TelemetryEvent>>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let writer = Arc::new(Mutex::new(writer));

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                let reply = Reply {
                    ok: false,
                    safety_state: handle.safety.get(),
                    message: Some(format!("bad request: {e}")),
                    last_event: None,
                };
                write_reply(&writer, &reply).await?;
                continue;
            }
        };

        match request {
            Request::Stop => {
                handle.manual_stop().await;
                let reply = Reply {
                    ok: true,
                    safety_state: handle.safety.get(),
                    message: Some("stop latched".to_string()),
                    last_event: None,
                };
                write_reply(&writer, &reply).await?;
            }
            Request::Reset => {
                handle.reset_from_stop().await;
                let reply = Reply {
                    ok: true,
                    safety_state: handle.safety.get(),
                    message: Some("reset requested; takes effect once faults clear".to_string()),
                    last_event: None,
                };
                write_reply(&writer, &reply).await?;
            }
            Request::Status => {
                let reply = Reply {
                    ok: true,
                    safety_state: handle.safety.get(),
                    message: None,
                    last_event: latest_event.read().await.clone(),
                };
                write_reply(&writer, &reply).await?;
            }
            Request::Actuate { channel, target } => {
                let accepted = handle
                    .commands
                    .send(OperatorCommand::Actuate(ActuatorCommand::Position {
                        channel,
                        target,
                    }))
                    .await
                    .is_ok();
                let reply = Reply {
                    ok: accepted,
                    safety_state: handle.safety.get(),
                    message: Some(if accepted {
                        "actuation queued".to_string()
                    } else {
                        "command queue closed".to_string()
                    }),
                    last_event: None,
                };
                write_reply(&writer, &reply).await?;
            }
            Request::Watch => {
                // Stream telemetry until the client goes away. Lag is
                // expected for slow readers; they just miss events.
                let mut rx = handle.telemetry.subscribe();
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            let json = serde_json::to_string(&event)?;
                            let mut guard = writer.lock().await;
                            if guard.write_all(json.as_bytes()).await.is_err()
                                || guard.write_all(b"\n").await.is_err()
                            {
                                return Ok(());
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("watch client lagged, missed {missed} events");
                        }
                        Err(_) => return Ok(()),
                    }
                }
            }
        }
    }
    Ok(())
}

async fn write_reply(
    writer: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    reply: &Reply,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let json = serde_json::to_string(reply)?;
    let mut guard = writer.lock().await;
    guard.write_all(json.as_bytes()).await?;
    guard.write_all(b"\n").await?;
    Ok(())
}
