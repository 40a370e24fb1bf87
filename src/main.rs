use std::{path::Path, sync::Arc, time::Duration};

use bulwark::{
    Gateway, GatewayConfig, GatewayRequest, HttpMethod, RequestBody, ReqwestTransport,
    StaticToken,
    config::{GatewayConfigValidator, load_config, load_config_from_env},
    metrics, tracing_setup,
    utils::{log_health_summary, spawn_health_monitor, summarize_metrics},
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Emit JSON logs instead of console output
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "bulwark.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "bulwark.yaml")]
        config: String,
    },
    /// Probe the upstream once and print the health verdict
    Probe {
        /// Configuration file; `BULWARK_*` environment variables when omitted
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Send one request through the gateway and print the response and metrics
    Request {
        #[clap(short, long)]
        config: Option<String>,
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Endpoint relative to the base URL, e.g. /api/v1/flows
        path: String,
        /// JSON request body
        #[clap(short, long)]
        data: Option<String>,
        /// Bearer token to attach
        #[clap(short, long)]
        token: Option<String>,
    },
    /// Run the health monitor until interrupted
    Watch {
        #[clap(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    if args.json_logs {
        tracing_setup::init_tracing()?;
    } else {
        tracing_setup::init_console_tracing()?;
    }
    metrics::init_metrics()?;

    match args.command {
        Commands::Validate { config } => validate_config_command(&config).await,
        Commands::Init { config } => init_config_command(&config).await,
        Commands::Probe { config } => probe_command(config.as_deref()).await,
        Commands::Request {
            config,
            method,
            path,
            data,
            token,
        } => request_command(config.as_deref(), &method, &path, data, token).await,
        Commands::Watch { config } => watch_command(config.as_deref()).await,
    }
}

async fn resolve_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    match config_path {
        Some(path) => load_config(path).await,
        None => load_config_from_env(),
    }
}

fn build_gateway(config: GatewayConfig, token: Option<String>) -> Result<Gateway> {
    let transport = Arc::new(ReqwestTransport::new()?);
    let mut builder = Gateway::builder(config, transport);
    if let Some(token) = token {
        builder = builder.token_source(Arc::new(StaticToken::new(token)));
    }
    builder.build().context("Failed to build gateway")
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    use bulwark::config::loader::load_config_unchecked;

    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Upstream: {}", config.base_url);
            println!(
                "   • Attempts: {} (base delay {}ms, timeout {}ms)",
                config.retry_attempts, config.retry_base_delay_ms, config.timeout_ms
            );
            println!(
                "   • Circuit Breaker: opens after {} failures for {}ms",
                config.circuit_breaker.failure_threshold, config.circuit_breaker.open_duration_ms
            );
            println!(
                "   • Health Checks: {} ({} every {}s)",
                config.health_check.enabled,
                config.health_check.path,
                config.health_check.interval_secs
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure base_url starts with http:// or https://");
            println!("   • Timeouts, attempts and thresholds must be greater than 0");
            println!("   • Health check path must start with '/'");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Bulwark gateway configuration
# Every key can be overridden with BULWARK_<KEY>, nested keys with `__`,
# e.g. BULWARK_CIRCUIT_BREAKER__FAILURE_THRESHOLD=10

# The single upstream service
base_url: "http://127.0.0.1:7860"

# Per-attempt timeout and retry budget (total attempts)
timeout_ms: 30000
retry_attempts: 3
retry_base_delay_ms: 1000
retry_jitter: false

enable_logging: true
enable_metrics: true
metrics_capacity: 1000

# Extra headers sent with every request (replaces the default User-Agent)
# default_headers:
#   user-agent: "my-app/1.0"
#   accept: "application/json"

circuit_breaker:
  failure_threshold: 5
  open_duration_ms: 30000

health_check:
  enabled: true
  interval_secs: 30
  timeout_secs: 5
  path: "/health"
  window_secs: 300
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'bulwark probe --config {config_path}' to check the upstream");
    Ok(())
}

async fn probe_command(config_path: Option<&str>) -> Result<()> {
    let config = resolve_config(config_path).await?;
    let gateway = build_gateway(config, None)?;

    let status = gateway.health_monitor().probe_now().await;
    log_health_summary(&status, "probe");
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn request_command(
    config_path: Option<&str>,
    method: &str,
    path: &str,
    data: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let config = resolve_config(config_path).await?;
    let gateway = build_gateway(config, token)?;

    let method: HttpMethod = method.parse()?;
    let body = data
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()
        .context("--data is not valid JSON")?
        .map(RequestBody::Json);

    let result = gateway
        .send(GatewayRequest::new(method, path).with_body(body))
        .await;

    let metrics = gateway.metrics();
    let summary = summarize_metrics(&metrics);

    match result {
        Ok(response) => {
            println!("✅ {} {}", response.status.as_u16(), path);
            match response.json::<serde_json::Value>() {
                Ok(value) if !value.is_null() => {
                    println!("{}", serde_json::to_string_pretty(&value)?)
                }
                Ok(_) => {}
                Err(_) => println!("{}", response.text()),
            }
            eprintln!("📊 {}", serde_json::to_string(&summary)?);
            eprintln!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ {}", e.user_message());
            eprintln!("📊 {}", serde_json::to_string(&summary)?);
            eprintln!("{}", serde_json::to_string_pretty(&metrics)?);
            Err(eyre!(e)).context(format!("{method} {path} failed"))
        }
    }
}

async fn watch_command(config_path: Option<&str>) -> Result<()> {
    let config = resolve_config(config_path).await?;
    let interval = Duration::from_secs(config.health_check.interval_secs.max(1));
    let gateway = build_gateway(config, None)?;

    let Some(monitor_handle) = spawn_health_monitor(&gateway, "watch") else {
        return Err(eyre!("Health checking is disabled in the configuration"));
    };

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = gateway.health_status();
                log_health_summary(&status, "watch");
                println!("{}", serde_json::to_string(&status)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping health monitor");
                monitor_handle.abort();
                return Ok(());
            }
        }
    }
}
