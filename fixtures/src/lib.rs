use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod upstream;

pub use upstream::{Upstream, UpstreamState};

/// Common CLI arguments for all fixture servers
#[derive(Parser, Debug, Clone)]
pub struct FixtureArgs {
    /// The port to listen on
    #[arg(short, long, default_value = "0")]
    pub port: u16,

    /// The host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
}

/// Common function to run a fixture server
pub async fn run_server(args: FixtureArgs, app: Router) -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let addr = format!("{}:{}", args.host, args.port).parse::<SocketAddr>()?;

    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Fixture server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve `app` on a random local port in the background
pub async fn spawn(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!("Fixture server failed: {:?}", err);
        }
    });

    Ok(addr)
}

/// Start the upstream fixture, returning its state and base URL
pub async fn spawn_upstream() -> anyhow::Result<(UpstreamState, String)> {
    let state = UpstreamState::default();
    let addr = spawn(upstream::router(state.clone())).await?;

    Ok((state, format!("http://{}", addr)))
}

/// A session token shaped like Nintendo's, signed with a key nobody checks
pub fn session_token(audience: &str, subject: &str, expires_at: i64) -> anyhow::Result<String> {
    let claims = serde_json::json!({
        "iss": "https://accounts.nintendo.com",
        "aud": audience,
        "typ": "session_token",
        "sub": subject,
        "exp": expires_at,
        "iat": expires_at - 3600,
        "jti": uuid::Uuid::new_v4().to_string(),
        "st_scp": [0, 8, 9, 17, 23]
    });

    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"fixture"),
    )?)
}
