use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_RP_ID: &str = "rp-id";
pub const ARG_RP_ORIGIN: &str = "rp-origin";
pub const ARG_RP_NAME: &str = "rp-name";
pub const ARG_FRONTEND_URL: &str = "frontend-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RP_ID)
                .long(ARG_RP_ID)
                .help("WebAuthn relying-party id (the effective domain)")
                .env("KONTO_RP_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_RP_ORIGIN)
                .long(ARG_RP_ORIGIN)
                .help("Origin the browser reports during ceremonies")
                .env("KONTO_RP_ORIGIN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_RP_NAME)
                .long(ARG_RP_NAME)
                .help("Human-readable relying-party name shown by authenticators")
                .env("KONTO_RP_NAME")
                .default_value("Konto"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend base URL, used as the allowed CORS origin (defaults to the RP origin)")
                .env("KONTO_FRONTEND_URL"),
        )
}

pub struct Options {
    pub rp_id: String,
    pub rp_origin: String,
    pub rp_name: String,
    pub frontend_url: String,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let rp_id = matches
            .get_one::<String>(ARG_RP_ID)
            .cloned()
            .with_context(|| format!("missing required argument: --{ARG_RP_ID}"))?;
        let rp_origin = matches
            .get_one::<String>(ARG_RP_ORIGIN)
            .cloned()
            .with_context(|| format!("missing required argument: --{ARG_RP_ORIGIN}"))?;
        let rp_name = matches
            .get_one::<String>(ARG_RP_NAME)
            .cloned()
            .unwrap_or_else(|| "Konto".to_string());
        let frontend_url = matches
            .get_one::<String>(ARG_FRONTEND_URL)
            .cloned()
            .unwrap_or_else(|| rp_origin.clone());

        Ok(Self {
            rp_id,
            rp_origin,
            rp_name,
            frontend_url,
        })
    }
}
