//! Process wide session token store. Both transport channels authenticate
//! against it: the reliable channel on reconnect, the datagram channel on
//! every input packet.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// Number of random bytes in a token (128 bit).
const TOKEN_BYTES: usize = 16;

/// Mapping `player_id -> hex token`. Tokens are registered at login or
/// reconnect, revoked on an orderly quit, and kept across network errors so
/// the player can come back inside the grace window.
#[derive(Default)]
pub struct TokenStore {
    tokens: Mutex<HashMap<u32, String>>,
}

impl TokenStore {
    /// Generates a fresh 128 bit token as 32 hex characters.
    pub fn generate() -> String {
        let raw: [u8; TOKEN_BYTES] = rand::random();
        let mut out = String::with_capacity(TOKEN_BYTES * 2);
        for byte in raw {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub async fn register(&self, player_id: u32, token: String) {
        self.tokens.lock().await.insert(player_id, token);
    }

    /// Plain equality; constant time comparison is not required here.
    pub async fn verify(&self, player_id: u32, token: &str) -> bool {
        let tokens = self.tokens.lock().await;
        tokens.get(&player_id).is_some_and(|stored| stored == token)
    }

    pub async fn revoke(&self, player_id: u32) {
        self.tokens.lock().await.remove(&player_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_verify_revoke_cycle() {
        let store = TokenStore::default();
        let token = TokenStore::generate();
        assert_eq!(token.len(), 32);

        store.register(7, token.clone()).await;
        assert!(store.verify(7, &token).await);
        assert!(!store.verify(7, "deadbeef").await);
        assert!(!store.verify(8, &token).await);

        store.revoke(7).await;
        assert!(!store.verify(7, &token).await);
    }

    #[test]
    fn tokens_are_unique_enough() {
        assert_ne!(TokenStore::generate(), TokenStore::generate());
    }
}
