//! Request authentication: principal resolution and the TOTP second factor.

pub mod mfa;
pub mod resolver;

pub use mfa::{LoginOutcome, MfaError, MfaService, TotpProvisioning};
pub use resolver::{AuthKind, MaybePrincipal, Principal, Resolution, Resolver, AUTH_HEADER};
