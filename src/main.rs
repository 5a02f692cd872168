use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry_agent::actuator::SharedActuator;
use telemetry_agent::channel::TopicScheme;
use telemetry_agent::command::CommandDispatcher;
use telemetry_agent::config::{Config, load_dotenv};
use telemetry_agent::error::Result;
use telemetry_agent::instance_lock::InstanceLock;
use telemetry_agent::publisher::TelemetryPublisher;
use telemetry_agent::sensors::build_groups;
use telemetry_agent::session::{HostLink, MqttTransport, SessionManager, SessionTiming};
use telemetry_agent::telemetry::{Pacing, TelemetryLoop};
use tokio::signal;

#[derive(Parser)]
#[command(name = "telemetry-agent")]
#[command(about = "Publishes averaged sensor readings to an MQTT broker and applies actuator commands")]
struct Cli {
    /// Broker host name (overrides MQTT_BROKER_HOST)
    #[arg(long)]
    broker_host: Option<String>,

    /// PEM trust bundle for the broker certificate (overrides MQTT_CA_BUNDLE)
    #[arg(long)]
    ca_bundle: Option<PathBuf>,

    /// Only consider this network interface when checking the link (overrides NETWORK_INTERFACE)
    #[arg(long)]
    interface: Option<String>,

    /// Run a single loop iteration and exit
    #[arg(long)]
    once: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting telemetry agent");

    let mut config = Config::from_env();
    if let Some(host) = cli.broker_host {
        config.mqtt.broker_host = host;
    }
    if let Some(path) = cli.ca_bundle {
        config.mqtt.ca_bundle = path;
    }
    if cli.interface.is_some() {
        config.session.interface = cli.interface;
    }
    config.validate()?;

    info!("Configuration loaded:");
    info!(
        "  Broker: {}:{} as {}",
        config.mqtt.broker_host, config.mqtt.broker_port, config.mqtt.client_id
    );
    info!("  Trust bundle: {}", config.mqtt.ca_bundle.display());
    info!("  Sites: {} / {}", config.sites.site1, config.sites.site2);
    info!("  Samples per average: {}", config.sampling.samples);

    let _lock = InstanceLock::acquire(&config.mqtt.client_id)?;

    let topics = TopicScheme::new(config.sites.site1.clone(), config.sites.site2.clone());
    let transport = MqttTransport::from_config(&config.mqtt, &config.session)?;
    let link = HostLink::new(config.session.interface.clone());
    let session = SessionManager::new(
        transport,
        link,
        (&config.mqtt).into(),
        SessionTiming::from(&config.session),
        topics.clone(),
    );

    let actuator = SharedActuator::new();
    actuator.on_change(|state| info!("[Actuator] Output is now {}", state));
    let dispatcher = CommandDispatcher::new(topics.command_topic(), config.command.hold(), actuator);

    let groups = build_groups(&config.sampling, &config.sensors)?;
    let mut telemetry = TelemetryLoop::new(
        session,
        dispatcher,
        TelemetryPublisher::new(topics),
        groups,
        Pacing::from(&config.sampling),
    );

    if cli.once {
        let report = telemetry.run_iteration().await;
        info!(
            "Iteration complete: {} published, {} skipped, {} commands",
            report.published, report.skipped, report.commands
        );
        return Ok(());
    }

    info!("Telemetry agent is running, press Ctrl+C to exit");

    tokio::select! {
        _ = telemetry.run() => {}
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    info!("Telemetry agent stopped");
    Ok(())
}
