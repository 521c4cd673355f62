use clap::{App, Arg, SubCommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7030";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("rigbus")
        .version("0.1.0")
        .about("Animatronic rig safety coordinator - operator console")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Coordinator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Coordinator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("Show safety state and the latest telemetry snapshot"),
        )
        .subcommand(
            SubCommand::with_name("stop")
                .about("Latch a manual emergency stop (takes effect immediately)"),
        )
        .subcommand(
            SubCommand::with_name("reset")
                .about("Request recovery from an emergency stop (honored once faults clear)"),
        )
        .subcommand(
            SubCommand::with_name("pose")
                .about("Command a servo channel to a position target")
                .arg(
                    Arg::with_name("channel")
                        .help("Servo channel (0-11)")
                        .required(true),
                )
                .arg(
                    Arg::with_name("target")
                        .help("Normalized position target (-1.0 to 1.0)")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("Stream live telemetry (Press Ctrl+C to stop)"),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("status", _) => {
            let reply = send_request(host, port, r#"{"op":"status"}"#).await?;
            print_status(&reply, format);
        }
        ("stop", _) => {
            let reply = send_request(host, port, r#"{"op":"stop"}"#).await?;
            print_ack("Emergency stop", &reply, format);
        }
        ("reset", _) => {
            let reply = send_request(host, port, r#"{"op":"reset"}"#).await?;
            print_ack("Reset", &reply, format);
        }
        ("pose", Some(sub)) => {
            let channel: u8 = sub.value_of("channel").unwrap_or("0").parse()?;
            let target: f32 = sub.value_of("target").unwrap_or("0").parse()?;
            let request = serde_json::json!({
                "op": "actuate",
                "channel": channel,
                "target": target,
            });
            let reply = send_request(host, port, &request.to_string()).await?;
            print_ack(
                &format!("Pose channel {channel} -> {target:.2}"),
                &reply,
                format,
            );
        }
        ("watch", _) => {
            watch_telemetry(host, port, format).await?;
        }
        _ => {
            println!(
                "{}",
                "No command specified. Use --help for usage information.".yellow()
            );
            println!("{}", "Quick start:".bright_green());
            println!("  {} Show safety state", "rigbus status".bright_cyan());
            println!("  {} Latch an emergency stop", "rigbus stop".bright_cyan());
            println!("  {} Stream telemetry", "rigbus watch".bright_cyan());
        }
    }

    Ok(())
}

async fn send_request(
    host: &str,
    port: u16,
    request: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let stream = TcpStream::connect((host, port)).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(request.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut lines = BufReader::new(reader).lines();
    match lines.next_line().await? {
        Some(line) => Ok(line),
        None => Err("connection closed before reply".into()),
    }
}

fn print_ack(action: &str, reply: &str, format: &str) {
    match format {
        "json" => println!("{reply}"),
        "compact" => println!("{}", "OK".bright_green()),
        _ => {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(reply) {
                let ok = parsed["ok"].as_bool().unwrap_or(false);
                let state = parsed["safety_state"].as_str().unwrap_or("Unknown");
                let message = parsed["message"].as_str().unwrap_or("");
                if ok {
                    println!(
                        "{} {} ({})",
                        "✅".green(),
                        action.bright_white(),
                        message.dimmed()
                    );
                } else {
                    println!(
                        "{} {} failed: {}",
                        "❌".red(),
                        action.bright_white(),
                        message.bright_red()
                    );
                }
                println!(
                    "{} {}",
                    "Safety state:".bright_white(),
                    colorize_state(state)
                );
            } else {
                println!("{} {}", "❓".blue(), reply);
            }
        }
    }
}

fn print_status(reply: &str, format: &str) {
    match format {
        "json" => println!("{reply}"),
        _ => {
            let parsed = match serde_json::from_str::<serde_json::Value>(reply) {
                Ok(parsed) => parsed,
                Err(_) => {
                    println!("{} {}", "❓".blue(), reply);
                    return;
                }
            };
            let state = parsed["safety_state"].as_str().unwrap_or("Unknown");
            println!("{}", "Rig Status".bright_blue().bold());
            println!(
                "{} {}",
                "Safety state:".bright_white(),
                colorize_state(state)
            );
            if let Some(event) = parsed.get("last_event").filter(|e| !e.is_null()) {
                let throttle = event["throttle_level"].as_str().unwrap_or("Unknown");
                let cycle = event["cycle_id"].as_u64().unwrap_or(0);
                let overruns = event["overruns"].as_u64().unwrap_or(0);
                println!("{} {}", "Throttle:".bright_white(), throttle);
                println!(
                    "{} {} ({} overruns)",
                    "Cycle:".bright_white(),
                    cycle,
                    overruns
                );
                if let Some(samples) = event["samples"].as_array() {
                    for sample in samples {
                        print_sample_line(sample);
                    }
                }
            } else {
                println!("{}", "No telemetry received yet".dimmed());
            }
        }
    }
}

fn print_sample_line(sample: &serde_json::Value) {
    let name = sample["subsystem"].as_str().unwrap_or("?");
    let temp = sample["temperature_c"].as_f64().unwrap_or(0.0);
    let cpu = sample["cpu_percent"].as_u64().unwrap_or(0);
    let latency = sample["latency_ms"].as_f64().unwrap_or(0.0);
    let fault = sample["fault"].as_bool().unwrap_or(false);
    let temp_str = if temp >= 78.0 {
        format!("{temp:>5.1}°C").red()
    } else if temp >= 65.0 {
        format!("{temp:>5.1}°C").yellow()
    } else {
        format!("{temp:>5.1}°C").white()
    };
    let fault_str = if fault {
        "FAULT".bright_red()
    } else {
        "ok".green()
    };
    println!("  {name:>6} │ {temp_str} │ cpu {cpu:>3}% │ {latency:>5.1}ms │ {fault_str}");
}

async fn watch_telemetry(
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "{}",
        "Streaming rig telemetry (Press Ctrl+C to stop)..."
            .bright_blue()
            .bold()
    );
    let stream = TcpStream::connect((host, port)).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(b"{\"op\":\"watch\"}\n").await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        match format {
            "json" => println!("{line}"),
            _ => {
                if let Ok(event) = serde_json::from_str::<serde_json::Value>(&line) {
                    let cycle = event["cycle_id"].as_u64().unwrap_or(0);
                    let state = event["safety_state"].as_str().unwrap_or("?");
                    let throttle = event["throttle_level"].as_str().unwrap_or("?");
                    let hottest = event["samples"]
                        .as_array()
                        .and_then(|samples| {
                            samples
                                .iter()
                                .filter_map(|s| s["temperature_c"].as_f64())
                                .fold(None, |acc: Option<f64>, t| {
                                    Some(acc.map_or(t, |a| a.max(t)))
                                })
                        })
                        .unwrap_or(0.0);
                    println!(
                        "[{cycle:>6}] {} │ throttle {throttle:<8} │ hottest {hottest:>5.1}°C",
                        colorize_state(state)
                    );
                }
            }
        }
    }
    Ok(())
}

fn colorize_state(state: &str) -> ColoredString {
    match state {
        "Normal" => state.bright_green(),
        "Warning" => state.yellow(),
        "Throttled" => state.bright_yellow(),
        "EmergencyStop" => state.bright_red().bold(),
        "Recovering" => state.bright_cyan(),
        _ => state.normal(),
    }
}
