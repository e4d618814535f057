use crate::{
    api,
    auth::{MfaService, Resolver},
    oauth::OauthFlow,
    passkey::{CeremonyEngine, MemoryChallengeCache, PasskeyConfig},
    store::MemoryStore,
    token::{TokenConfig, TokenService},
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub token_audience: String,
    pub rp_id: String,
    pub rp_origin: String,
    pub rp_name: String,
    pub frontend_url: String,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the WebAuthn configuration is invalid or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    // TODO: swap for a persistent store once one lands; everything behind
    // the UserStore/PasskeyStore traits survives the swap unchanged.
    let store = Arc::new(MemoryStore::new());
    warn!("using the in-memory store; all state is lost on restart");

    let tokens = TokenService::new(TokenConfig::new(
        args.token_secret,
        args.token_issuer.clone(),
        args.token_audience,
    ));

    let passkey_config =
        PasskeyConfig::new(args.rp_id, args.rp_origin).with_rp_name(args.rp_name);
    let cache = Arc::new(MemoryChallengeCache::new());
    let ceremonies = Arc::new(CeremonyEngine::new(
        &passkey_config,
        store.clone(),
        store.clone(),
        cache,
        tokens.clone(),
    )?);

    let engine = api::Engine {
        resolver: Arc::new(Resolver::new(tokens.clone(), store.clone())),
        mfa: Arc::new(MfaService::new(
            tokens.clone(),
            store.clone(),
            args.token_issuer,
        )),
        oauth: Arc::new(OauthFlow::new(tokens.clone(), store.clone())),
        ceremonies,
        users: store.clone(),
        passkeys: store,
        tokens,
    };

    api::new(args.port, &args.frontend_url, engine).await
}
