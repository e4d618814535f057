//! Capability scope model.
//!
//! A scope is wire-encoded as a fixed-length string of `'1'`/`'0'`, one
//! character per capability in canonical order. `full_access` implies every
//! other capability. Decoding is total: short or garbled strings never fail,
//! unknown characters simply decode to "absent".

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Account capabilities, in canonical wire order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    FullAccess,
    FileHost,
    UserInfo,
    AppsControl,
    PaymentInfo,
}

impl Scope {
    /// Canonical order; the index of a capability here is its position in
    /// the encoded scope string.
    pub const ALL: [Self; 5] = [
        Self::FullAccess,
        Self::FileHost,
        Self::UserInfo,
        Self::AppsControl,
        Self::PaymentInfo,
    ];

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::FullAccess => "full_access",
            Self::FileHost => "file_host",
            Self::UserInfo => "user_info",
            Self::AppsControl => "apps_control",
            Self::PaymentInfo => "payment_info",
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FullAccess => "Full Account Access",
            Self::FileHost => "File Host",
            Self::UserInfo => "Account Information",
            Self::AppsControl => "Control Of Authorized Applications",
            Self::PaymentInfo => "Payment Information",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::FullAccess => "Allows full access to the account.",
            Self::FileHost => "Allows access to the file host.",
            Self::UserInfo => {
                "Allows access to the account's information (Eg. Username, Email)."
            }
            Self::AppsControl => "Allows control over authorized applications.",
            Self::PaymentInfo => "Allows access to payment information.",
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scope| scope.id() == id)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Scope string carried by direct user credentials: only `full_access` set.
pub const FULL_ACCESS: &str = "10000";

/// Encode a capability set into the canonical scope string.
///
/// Deterministic: the output length always equals the capability count and
/// duplicates in the input are harmless.
#[must_use]
pub fn encode(scopes: &[Scope]) -> String {
    Scope::ALL
        .iter()
        .map(|scope| if scopes.contains(scope) { '1' } else { '0' })
        .collect()
}

/// Decode a scope string into the capability set it grants.
///
/// Tolerant by design: positions beyond the string's length and characters
/// other than `'1'` decode to "absent". Never an error.
#[must_use]
pub fn decode(scope_string: &str) -> Vec<Scope> {
    scope_string
        .chars()
        .take(Scope::ALL.len())
        .enumerate()
        .filter(|&(_, ch)| ch == '1')
        .map(|(index, _)| Scope::ALL[index])
        .collect()
}

/// Whether a scope string grants a capability, either directly or through
/// `full_access`.
#[must_use]
pub fn has(scope_string: &str, scope: Scope) -> bool {
    let bit_set = |index: usize| scope_string.chars().nth(index) == Some('1');
    bit_set(Scope::FullAccess.index()) || bit_set(scope.index())
}
