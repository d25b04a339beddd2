use clap::Parser;
use std::net::SocketAddr;

/// Reverse proxy that authorizes every request via OAuth2 token introspection.
///
/// Requests without an active bearer credential are rejected before they
/// reach the backend.
#[derive(Parser)]
#[command(name = "porter", version, about)]
pub struct Cli {
    /// Base URL of the token introspection authority.
    #[arg(long, env = "ORY_HOST", value_name = "URL")]
    pub authority_url: String,

    /// Service credential sent as `Bearer <TOKEN>` on every introspection call.
    #[arg(long, env = "ORY_API_KEY", value_name = "TOKEN", hide_env_values = true)]
    pub service_token: String,

    /// Introspection endpoint path, relative to the authority URL.
    #[arg(
        long,
        env = "PORTER_INTROSPECTION_PATH",
        value_name = "PATH",
        default_value = porter_auth::auth::introspect::DEFAULT_INTROSPECTION_PATH
    )]
    pub introspection_path: String,

    /// Backend that receives every authorized request.
    #[arg(
        long,
        env = "PORTER_BACKEND_URL",
        value_name = "URL",
        default_value = "http://localhost:9201"
    )]
    pub backend_url: String,

    /// Address to listen on.
    #[arg(long, env = "PORTER_LISTEN", value_name = "ADDR", default_value = "0.0.0.0:9200")]
    pub listen: SocketAddr,

    /// Deadline for a single introspection call, in seconds.
    #[arg(long, env = "PORTER_INTROSPECTION_TIMEOUT_SECS", default_value_t = 10)]
    pub introspection_timeout_secs: u64,

    /// Deadline for a single backend call, in seconds.
    #[arg(long, env = "PORTER_BACKEND_TIMEOUT_SECS", default_value_t = 60)]
    pub backend_timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from([
            "porter",
            "--authority-url",
            "https://auth.example.com",
            "--service-token",
            "svc",
        ])
        .unwrap();
        assert_eq!(cli.backend_url, "http://localhost:9201");
        assert_eq!(cli.listen.port(), 9200);
        assert_eq!(cli.introspection_path, "/admin/oauth2/introspect");
        assert_eq!(cli.introspection_timeout_secs, 10);
        assert_eq!(cli.backend_timeout_secs, 60);
    }

    #[test]
    fn invalid_listen_address() {
        let result = Cli::try_parse_from([
            "porter",
            "--authority-url",
            "https://auth.example.com",
            "--service-token",
            "svc",
            "--listen",
            "not-an-address",
        ]);
        assert!(result.is_err());
    }
}
