//! Bearer-token verification for the connection handshake.

use std::collections::HashMap;

use taskshare_proto::ids::UserId;

/// Verifies an opaque bearer token to a user identity.
///
/// Real identity verification (passwords, OAuth) lives outside the hub; an
/// implementation only has to map a presented token to a stable [`UserId`].
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the user bound to `token`, or `None` if it is not valid.
    fn verify(&self, token: &str) -> Option<UserId>;
}

/// Static token → user table, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, UserId>,
}

impl TokenTable {
    /// Creates an empty table that rejects every token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `token` to `user`, replacing any previous binding.
    pub fn insert(&mut self, token: impl Into<String>, user: UserId) {
        self.tokens.insert(token.into(), user);
    }

    /// Number of configured tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<T: Into<String>, U: Into<UserId>> FromIterator<(T, U)> for TokenTable {
    fn from_iter<I: IntoIterator<Item = (T, U)>>(iter: I) -> Self {
        Self {
            tokens: iter
                .into_iter()
                .map(|(token, user)| (token.into(), user.into()))
                .collect(),
        }
    }
}

impl Authenticator for TokenTable {
    fn verify(&self, token: &str) -> Option<UserId> {
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}
