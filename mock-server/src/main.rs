use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "mock DAV server listening");

    match (std::env::var("DAV_USERNAME"), std::env::var("DAV_PASSWORD")) {
        (Ok(username), Ok(password)) => {
            mock_server::run_with_credentials(listener, &username, &password).await
        }
        _ => mock_server::run(listener).await,
    }
}
