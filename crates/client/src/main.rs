use anyhow::{bail, Context};
use beacon_client::{heartbeat_interval, spawn_heartbeat, BeaconClient, Registration, RetryPolicy, Strategy};
use beacon_common::{properties, InstanceStatus, RegisterRequest};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beacon", author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the beacon daemon
    #[arg(long, global = true, env = "BEACON_URL", default_value = beacon_client::DEFAULT_BASE_URL)]
    url: String,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true, env = "BEACON_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct InstanceArgs {
    service_name: String,
    #[arg(long)]
    port: u16,
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Instance id (default: {service}-{host}-{port})
    #[arg(long)]
    id: Option<String>,
    /// Lease in seconds (server default when omitted)
    #[arg(long)]
    lease: Option<u64>,
    /// Metadata entries as key=value
    #[arg(long = "meta", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,
}

impl InstanceArgs {
    fn registration(&self, status: Option<InstanceStatus>) -> Registration {
        let instance_id = self
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}-{}", self.service_name, self.host, self.port));
        Registration {
            service: self.service_name.clone(),
            instance_id,
            request: RegisterRequest {
                host: self.host.clone(),
                port: self.port,
                status,
                lease_seconds: self.lease,
                metadata: self.metadata.iter().cloned().collect::<BTreeMap<_, _>>(),
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register (or replace) an instance
    Register {
        #[command(flatten)]
        instance: InstanceArgs,
        /// Initial status: UP, DOWN or STARTING
        #[arg(long, value_parser = parse_status)]
        status: Option<InstanceStatus>,
    },
    /// Remove an instance
    Deregister {
        service_name: String,
        instance_id: String,
    },
    /// Register an instance and keep its lease alive until interrupted
    Heartbeat {
        #[command(flatten)]
        instance: InstanceArgs,
    },
    /// Change an instance's status
    Status {
        service_name: String,
        instance_id: String,
        #[arg(value_parser = parse_status)]
        status: InstanceStatus,
    },
    /// List the UP instances of a service
    Resolve {
        service_name: String,
        /// Print only one instance, chosen with this strategy (round-robin, random)
        #[arg(long)]
        pick: Option<Strategy>,
    },
    /// List known services
    Services,
    /// Print merged configuration
    Config {
        application: String,
        #[arg(default_value = "default")]
        profile: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Publish a TOML file as a new config version
    Publish {
        application: String,
        profile: String,
        file: PathBuf,
        #[arg(long, default_value = "main")]
        label: String,
    },
    /// Register an instance, run a command while heartbeating, then deregister
    Run {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Environment variable that receives the port (default: PORT)
        #[arg(long, default_value = "PORT")]
        env_name: String,

        /// Command and arguments to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn parse_status(s: &str) -> Result<InstanceStatus, String> {
    match s.to_ascii_uppercase().as_str() {
        "UP" => Ok(InstanceStatus::Up),
        "DOWN" => Ok(InstanceStatus::Down),
        "STARTING" => Ok(InstanceStatus::Starting),
        other => Err(format!("unknown status {:?}", other)),
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = BeaconClient::with_timeout(&cli.url, Duration::from_millis(cli.timeout_ms))?;

    match cli.command {
        Commands::Register { instance, status } => {
            let registration = instance.registration(status);
            let registered = registration.register(&client).await?;
            println!(
                "Registered {}/{} at {}:{} ({})",
                registered.service_name, registered.instance_id, registered.host, registered.port, registered.status
            );
        }
        Commands::Deregister { service_name, instance_id } => {
            client.deregister(&service_name, &instance_id).await?;
            println!("Deregistered {}/{}", service_name, instance_id);
        }
        Commands::Heartbeat { instance } => {
            let registration = instance.registration(None);
            let registered = registration.register(&client).await?;
            let every = heartbeat_interval(&registered);
            println!(
                "Registered {}/{}. Sending heartbeats every {:?}...",
                registration.service, registration.instance_id, every
            );

            let service = registration.service.clone();
            let instance_id = registration.instance_id.clone();
            let task = spawn_heartbeat(client.clone(), registration, every);
            tokio::signal::ctrl_c().await?;
            task.abort();
            client.deregister(&service, &instance_id).await?;
            println!("Deregistered {}/{}", service, instance_id);
        }
        Commands::Status { service_name, instance_id, status } => {
            let updated = client.set_status(&service_name, &instance_id, status).await?;
            println!("{}/{} is now {}", updated.service_name, updated.instance_id, updated.status);
        }
        Commands::Resolve { service_name, pick } => {
            let instances = client.resolve(&service_name).await?;
            if instances.is_empty() {
                eprintln!("No UP instances for service: {}", service_name);
                return Ok(ExitCode::FAILURE);
            }
            match pick {
                Some(strategy) => {
                    if let Some(chosen) = strategy.balancer().pick(&instances) {
                        println!("{}", chosen.base_url());
                    }
                }
                None => {
                    for i in instances {
                        println!("{}\t{}\t{}", i.instance_id, i.base_url(), i.last_heartbeat.to_rfc3339());
                    }
                }
            }
        }
        Commands::Services => {
            let services = client.services().await?;
            println!("Registered services:");
            for s in services {
                println!("{}: {}/{} UP", s.service_name, s.up, s.total);
            }
        }
        Commands::Config { application, profile, label } => {
            let resolved = client
                .fetch_config_with_retry(&application, &profile, label.as_deref(), RetryPolicy::default())
                .await?;
            for source in &resolved.sources {
                println!("# {}/{} v{}", source.application, source.profile, source.version);
            }
            for (k, v) in &resolved.properties {
                println!("{}={}", k, v);
            }
        }
        Commands::Publish { application, profile, file, label } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let props = properties::parse_toml(&text)
                .with_context(|| format!("failed to parse {}", file.display()))?;
            let published = client.publish_config(&application, &profile, &label, &props).await?;
            println!(
                "Published {}/{}@{} version {}",
                published.application, published.profile, published.label, published.version
            );
        }
        Commands::Run { instance, env_name, command } => {
            if command.is_empty() {
                bail!("no command specified");
            }
            let registration = instance.registration(None);
            let registered = registration.register(&client).await?;
            let port = registration.request.port;
            println!(
                "Registered {}/{} on port {}",
                registration.service, registration.instance_id, port
            );

            let service = registration.service.clone();
            let instance_id = registration.instance_id.clone();
            let every = heartbeat_interval(&registered);
            let heartbeat = spawn_heartbeat(client.clone(), registration, every);

            let status = Command::new(&command[0])
                .args(&command[1..])
                .env(&env_name, port.to_string())
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await;

            heartbeat.abort();
            // Bounded so a dead daemon can't hold the exit hostage.
            let _ = time::timeout(Duration::from_secs(5), client.deregister(&service, &instance_id)).await;
            println!("Deregistered {}/{}", service, instance_id);

            let status = status.with_context(|| format!("failed to run {}", command[0]))?;
            if !status.success() {
                let code = status.code().unwrap_or(1).clamp(1, 255) as u8;
                return Ok(ExitCode::from(code));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
