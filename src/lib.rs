//! # Konto (Account Authentication & Authorization Engine)
//!
//! `konto` is the authentication and authorization core of an account
//! backend. It decides who a request belongs to and what that caller may
//! do.
//!
//! ## Credentials
//!
//! Three ways in, all ending at the same place (a signed login token):
//!
//! - **Password** (Basic credentials), optionally gated by a **TOTP**
//!   second factor: the password step then yields a short first-step token
//!   that must be redeemed together with an authenticator code.
//! - **Passkeys** (`WebAuthn`): registration and login ceremonies with
//!   single-use, short-lived challenges. Anonymous (discoverable) login is
//!   supported.
//! - **OAuth-style delegation**: a user authorizes a registered app for a
//!   set of scopes; the app exchanges an authorization code for an
//!   access/refresh token pair.
//!
//! ## Scopes
//!
//! Capabilities are wire-encoded as a fixed-order bit string (for example
//! `01100`). Direct user credentials always carry `full_access`; delegated
//! app tokens carry exactly what the user granted. Grants are stateful and
//! revocable: revocation stops refreshes immediately, while outstanding
//! access tokens ride out their short lifetime.
//!
//! ## Request authentication
//!
//! Handlers never parse auth headers. The resolver turns the dedicated
//! `Konto-Auth` header (or a compatibility `Bearer` token) into a
//! `Principal` once, distinguishing "anonymous" from "invalid".

pub mod api;
pub mod auth;
pub mod cli;
pub mod oauth;
pub mod passkey;
pub mod scope;
pub mod store;
pub mod token;
