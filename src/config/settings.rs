use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed to upgrade. An empty list accepts any origin, which
    /// is only appropriate for trusted or development deployments.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of the intake queue shared by all connection readers
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
    /// Per-connection outbound buffer; a client that lags this many frames
    /// behind is disconnected
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Whether a sender receives its own broadcasts back
    #[serde(default)]
    pub echo_to_sender: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_intake_capacity() -> usize {
    1024
}

fn default_outbound_buffer() -> usize {
    32
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("hub.intake_capacity", 1024)?
            .set_default("hub.outbound_buffer", 32)?
            .set_default("hub.echo_to_sender", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, HUB_INTAKE_CAPACITY, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: vec![],
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: default_intake_capacity(),
            outbound_buffer: default_outbound_buffer(),
            echo_to_sender: false,
        }
    }
}
