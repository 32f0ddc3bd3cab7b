use std::path::PathBuf;

use crate::error::Result;
pub use clap::Parser;
use livros_app::state::AppConfig;

#[derive(Debug, Clone, clap::Parser)]
pub struct ServerConfig {
    #[arg(
        short,
        long,
        default_value_t = 3000,
        env = "LIVROS_LISTEN_PORT",
        help = "Port to listen on"
    )]
    pub port: u16,
    #[arg(
        short,
        long,
        default_value = "127.0.0.1",
        env = "LIVROS_LISTEN_ADDRESS",
        help = "Address to listen on"
    )]
    pub listen_address: String,

    #[arg(
        long,
        env = "LIVROS_DATABASE_URL",
        help = "Database URL e.g. sqlite://file.db, default is sqlite://[data-dir]/livros.db, where data-dir is set by --data-dir"
    )]
    database_url: Option<String>,

    #[arg(
        long,
        env = "LIVROS_DATA_DIR",
        help = "Data directory (database, secret), default is system default like ~/.local/share/livros",
        default_value_t = default_data_dir()
    )]
    data_dir: String,

    #[arg(
        long,
        env = "LIVROS_DEFAULT_PAGE_SIZE",
        default_value = "5",
        value_parser = clap::value_parser!(u32).range(1..=1000),
        help = "Default page size of book listing"
    )]
    pub default_page_size: u32,

    #[arg(
        long,
        env = "LIVROS_SECURE_COOKIES",
        help = "Mark anti-forgery cookie as Secure, use when served over https"
    )]
    pub secure_cookies: bool,

    #[arg(long, env = "LIVROS_CORS", help = "Enable permissive CORS")]
    pub cors: bool,
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("livros"))
        .unwrap_or_else(|| PathBuf::from("livros"))
        .to_string_lossy()
        .to_string()
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        ServerConfig::try_parse().map_err(|e| e.into())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}/livros.db", self.data_dir))
    }
}

impl From<&ServerConfig> for AppConfig {
    fn from(config: &ServerConfig) -> Self {
        AppConfig {
            default_page_size: config.default_page_size,
            secure_cookies: config.secure_cookies,
        }
    }
}
