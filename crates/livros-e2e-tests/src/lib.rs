use std::{fmt::Display, path::Path, time::Duration};

use anyhow::{Result, anyhow};
use livros_app::state::AppState;
use livros_server::{
    config::{Parser, ServerConfig},
    run::{build_state, run_graceful_with_state},
};
use rand::Rng as _;
use reqwest::Url;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tracing::{debug, error};

pub mod rest;

fn random_port() -> Result<u16> {
    let mut rng = rand::rng();

    let mut retries = 3;
    while retries > 0 {
        let port: u16 = rng.random_range(3030..4030);
        let addr: std::net::SocketAddr = format!("127.0.0.1:{}", port).parse()?;
        match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(100)) {
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(port),
            Err(_) => retries -= 1,
            Ok(_) => retries -= 1,
        }
    }

    Err(anyhow!("Could not find a free port"))
}

/// Keeps test data directory and running server alive
pub struct ConfigGuard {
    #[allow(dead_code)]
    data_dir: TempDir,
    #[allow(dead_code)]
    shutdown: Option<oneshot::Sender<()>>,
}

pub fn test_config(test_name: &str, base_dir: &Path) -> Result<(ServerConfig, ConfigGuard)> {
    let tmp_data_dir = TempDir::with_prefix_in(format!("{}_", test_name), base_dir)?;
    let data_dir = tmp_data_dir.path().to_string_lossy().to_string();
    let port = random_port()?;
    let port = port.to_string();
    let args = &["livros-e2e-tests", "--data-dir", &data_dir, "--port", &port];
    let config = ServerConfig::try_parse_from(args)?;
    Ok((
        config,
        ConfigGuard {
            data_dir: tmp_data_dir,
            shutdown: None,
        },
    ))
}

pub async fn prepare_env(test_name: &str) -> Result<(ServerConfig, ConfigGuard)> {
    let base_dir = std::env::temp_dir();
    test_config(test_name, &base_dir)
}

pub fn base_url(args: &ServerConfig) -> Result<Url> {
    let url = Url::parse(&format!("http://localhost:{}/", args.port))?;
    Ok(url)
}

/// Client keeps cookies and does not follow redirects
pub fn new_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    Ok(client)
}

/// Starts server in background, it stops when `guard` is dropped
pub async fn launch_env(
    args: ServerConfig,
    guard: &mut ConfigGuard,
) -> Result<(reqwest::Client, AppState)> {
    let base_url = base_url(&args)?;
    let state = build_state(&args).await?;
    let (tx, rx) = oneshot::channel::<()>();
    guard.shutdown = Some(tx);

    let server_state = state.clone();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = rx.await;
        };
        if let Err(e) = run_graceful_with_state(args, server_state, shutdown).await {
            error!("Server failed: {e}");
        }
    });

    let client = new_client()?;
    let health_url = base_url.join("health")?;
    let mut retries = 50;
    loop {
        match client.get(health_url.clone()).send().await {
            Ok(response) if response.status().is_success() => break,
            Ok(response) => debug!("Server not ready: {}", response.status()),
            Err(e) => debug!("Server not ready: {e}"),
        }
        retries -= 1;
        if retries == 0 {
            return Err(anyhow!("Server did not start"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok((client, state))
}

pub fn extend_url(url: &Url, segment: impl Display) -> Url {
    let mut url = url.clone();
    url.path_segments_mut()
        .expect("Invalid base URL")
        .pop_if_empty()
        .push(&segment.to_string());
    url
}
