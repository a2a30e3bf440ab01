//! Wallet → user mapping. Users are created on first authenticated login
//! and never deleted.

use sqlx::FromRow;

use super::{Db, new_id, now_unix};
use crate::error::GatewayError;
use crate::types::EvmAddress;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub wallet_address: String,
}

impl User {
    pub fn wallet(&self) -> Result<EvmAddress, GatewayError> {
        self.wallet_address
            .parse()
            .map_err(|_| GatewayError::Internal("stored wallet address is malformed".to_string()))
    }
}

impl Db {
    /// Find or create the user owning `wallet`.
    pub async fn upsert_user_by_wallet(
        &self,
        wallet: &EvmAddress,
    ) -> Result<User, GatewayError> {
        let wallet = wallet.as_lower();
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, wallet_address, created_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (wallet_address) DO UPDATE SET wallet_address = EXCLUDED.wallet_address
             RETURNING id, wallet_address",
        )
        .bind(new_id())
        .bind(&wallet)
        .bind(now_unix())
        .fetch_one(self.pool())
        .await?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, GatewayError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, wallet_address FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(user)
    }
}
