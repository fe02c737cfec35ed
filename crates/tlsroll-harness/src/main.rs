//! `tlsroll` command line

use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tlsroll_core::telemetry::{self, LogFormat};
use tlsroll_core::{ConnectivityProbe, Handshake, HarnessConfig, TcpProbe, TlsClient, Transport};
use tlsroll_harness::{run_simulation, Fault, SimulatorSettings};

fn cli() -> Command {
    Command::new("tlsroll")
        .version(tlsroll_core::VERSION)
        .about("Availability verification for staged TLS rollouts")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter used when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the TLS upgrade scenario against a simulated replica set")
                .arg(
                    Arg::new("replicas")
                        .long("replicas")
                        .value_parser(value_parser!(usize))
                        .help("Replica count (overrides the config file)"),
                )
                .arg(
                    Arg::new("restart-ms")
                        .long("restart-ms")
                        .default_value("2000")
                        .value_parser(value_parser!(u64))
                        .help("Time one replica takes to restart"),
                )
                .arg(
                    Arg::new("interval-ms")
                        .long("interval-ms")
                        .value_parser(value_parser!(u64))
                        .help("Background probe interval (overrides the config file)"),
                )
                .arg(
                    Arg::new("fault")
                        .long("fault")
                        .action(ArgAction::Append)
                        .value_parser(|s: &str| s.parse::<Fault>())
                        .help("Inject a fault: plaintext-gap, stuck-rollout, no-keyfile, setup-failure"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("probe")
                .about("Attempt one connection to an address")
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .required(true)
                        .value_parser(value_parser!(SocketAddr))
                        .help("Address to dial"),
                )
                .arg(
                    Arg::new("transport")
                        .long("transport")
                        .default_value("plaintext")
                        .value_parser(|s: &str| s.parse::<Transport>())
                        .help("Connect in plaintext or complete a TLS handshake first"),
                )
                .arg(
                    Arg::new("ca-file")
                        .long("ca-file")
                        .value_parser(value_parser!(PathBuf))
                        .help("PEM bundle of trusted roots (required for --transport tls)"),
                )
                .arg(
                    Arg::new("server-name")
                        .long("server-name")
                        .default_value("localhost")
                        .help("Name the server certificate must match"),
                )
                .arg(
                    Arg::new("timeout-ms")
                        .long("timeout-ms")
                        .value_parser(value_parser!(u64))
                        .help("Per-attempt timeout (overrides the config file)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("request")
                        .long("request")
                        .default_value("ping\n")
                        .help("Payload written after connecting"),
                )
                .arg(
                    Arg::new("expect")
                        .long("expect")
                        .default_value("pong")
                        .help("Reply prefix that proves a round-trip"),
                ),
        )
        .subcommand(Command::new("config").about("Print the default configuration as TOML"))
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

fn load_config(args: &ArgMatches) -> anyhow::Result<HarnessConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => HarnessConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let mut config = load_config(args)?;
    if let Some(replicas) = args.get_one::<usize>("replicas") {
        config = config.with_replicas(*replicas);
    }
    if let Some(interval) = args.get_one::<u64>("interval-ms") {
        config = config.with_background_interval(Duration::from_millis(*interval));
    }
    config.validate()?;

    let mut settings = SimulatorSettings::default()
        .with_replicas(config.replicas)
        .with_restart(Duration::from_millis(arg::<u64>(args, "restart-ms")?));
    for fault in args.get_many::<Fault>("fault").into_iter().flatten() {
        settings = settings.with_fault(*fault);
    }

    tracing::info!(replicas = settings.replicas, faults = ?settings.faults, "starting simulation");
    let report = run_simulation(&config, settings).await;

    if args.get_flag("json") {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

async fn probe(args: &ArgMatches) -> anyhow::Result<bool> {
    let addr = arg::<SocketAddr>(args, "addr")?;
    let transport = arg::<Transport>(args, "transport")?;
    let config = load_config(args)?;
    let timeout = args
        .get_one::<u64>("timeout-ms")
        .map_or_else(|| config.probe_timeout(), |ms| Duration::from_millis(*ms));
    let handshake = Handshake::new(
        arg::<String>(args, "request")?.into_bytes(),
        arg::<String>(args, "expect")?.into_bytes(),
    );

    let mut probe = TcpProbe::new()
        .with_endpoint(transport, addr)
        .with_handshake(handshake)
        .with_timeout(timeout);
    if transport == Transport::Tls {
        let ca_file = arg::<PathBuf>(args, "ca-file")?;
        let server_name = arg::<String>(args, "server-name")?;
        let client = TlsClient::from_pem_file(&ca_file, &server_name)
            .with_context(|| format!("loading trust roots from {}", ca_file.display()))?;
        probe = probe.with_tls(client);
    }
    let result = probe.attempt(transport).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let format = if matches.get_flag("log-json") {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    telemetry::init(&arg::<String>(&matches, "log-level")?, format);

    let passed = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await?,
        Some(("probe", args)) => probe(args).await?,
        Some(("config", _)) => {
            print!("{}", HarnessConfig::default().to_toml_string()?);
            true
        }
        _ => true,
    };

    std::process::exit(if passed { 0 } else { 1 });
}
