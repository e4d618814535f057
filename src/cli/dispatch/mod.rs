//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{token, webauthn};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let token_opts = token::Options::parse(matches)?;
    let webauthn_opts = webauthn::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        token_secret: token_opts.secret,
        token_issuer: token_opts.issuer,
        token_audience: token_opts.audience,
        rp_id: webauthn_opts.rp_id,
        rp_origin: webauthn_opts.rp_origin,
        rp_name: webauthn_opts.rp_name,
        frontend_url: webauthn_opts.frontend_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn server_action_from_args() -> Result<()> {
        temp_env::with_vars(
            [
                ("KONTO_TOKEN_SECRET", None::<&str>),
                ("KONTO_FRONTEND_URL", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "konto",
                    "--token-secret",
                    "super-secret",
                    "--rp-id",
                    "konto.example.com",
                    "--rp-origin",
                    "https://konto.example.com",
                ]);
                let Action::Server(args) = handler(&matches)?;

                assert_eq!(args.port, 8080);
                assert_eq!(args.token_secret.expose_secret(), "super-secret");
                assert_eq!(args.token_issuer, "konto");
                assert_eq!(args.rp_id, "konto.example.com");
                // Frontend URL falls back to the RP origin
                assert_eq!(args.frontend_url, "https://konto.example.com");
                Ok(())
            },
        )
    }
}
