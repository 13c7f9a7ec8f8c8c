use std::path::PathBuf;

use clap::Parser;
use reqwest::StatusCode;
use tether_tokens::{AuthenticationProxy, CredentialMaterial, IdentityName, ProxyConfig};

#[derive(Debug, Parser)]
struct Opts {
    /// Base URL of the platform's session authenticator
    #[arg(long, env)]
    session_auth_url: String,

    /// Base URL of the key manager authenticator
    #[arg(long, env)]
    key_manager_url: String,

    /// The identity to authenticate
    #[arg(short, long, env, default_value = "jirawebhook")]
    identity: IdentityName,

    /// PEM bundle holding the identity's client certificate and private key
    #[arg(short = 'c', long, env)]
    certificate: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = ProxyConfig::new(opts.session_auth_url, opts.key_manager_url);
    let proxy = AuthenticationProxy::from_config(&config)?;

    let material = match &opts.certificate {
        Some(path) => CredentialMaterial::from_pem_file(path)?,
        None => CredentialMaterial::none(),
    };
    proxy.register_identity(opts.identity.clone(), &material)?;

    let first = proxy.authenticate(&opts.identity).await?;
    tracing::info!(
        session_token = format_args!("{:#?}", first.session_token()),
        key_manager_token = format_args!("{:#?}", first.key_manager_token()),
        "first handshake"
    );

    // Pretend a call made with the first token was rejected as expired
    let renewed = proxy
        .reauthenticate_or_throw(
            &opts.identity,
            &first,
            StatusCode::UNAUTHORIZED,
            "simulated expiry",
        )
        .await?;
    tracing::info!(
        session_token = format_args!("{:#?}", renewed.token.session_token()),
        "renewed session"
    );

    proxy.invalidate(&opts.identity)?;
    tracing::info!(
        authenticated = proxy.is_authenticated(&opts.identity)?,
        retained = format_args!("{:#?}", proxy.token(&opts.identity)?.session_token()),
        "invalidated identity"
    );

    Ok(())
}
