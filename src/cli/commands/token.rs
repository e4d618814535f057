use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TOKEN_AUDIENCE: &str = "token-audience";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign and verify all tokens")
                .env("KONTO_TOKEN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim stamped into every token")
                .env("KONTO_TOKEN_ISSUER")
                .default_value("konto"),
        )
        .arg(
            Arg::new(ARG_TOKEN_AUDIENCE)
                .long(ARG_TOKEN_AUDIENCE)
                .help("Audience claim stamped into every token")
                .env("KONTO_TOKEN_AUDIENCE")
                .default_value("konto-api"),
        )
}

pub struct Options {
    pub secret: SecretString,
    pub issuer: String,
    pub audience: String,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .with_context(|| format!("missing required argument: --{ARG_TOKEN_SECRET}"))?;
        let issuer = matches
            .get_one::<String>(ARG_TOKEN_ISSUER)
            .cloned()
            .unwrap_or_else(|| "konto".to_string());
        let audience = matches
            .get_one::<String>(ARG_TOKEN_AUDIENCE)
            .cloned()
            .unwrap_or_else(|| "konto-api".to_string());

        Ok(Self {
            secret: SecretString::from(secret),
            issuer,
            audience,
        })
    }
}
