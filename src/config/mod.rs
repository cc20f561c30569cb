mod settings;

pub use settings::{HubConfig, ServerConfig, Settings};
