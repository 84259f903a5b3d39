//! Settings table accessors
//!
//! Plain key-value rows; values are stored as text.

use courier_common::{Error, Result};
use sqlx::{Pool, Sqlite};

const GEOCODER_API_KEY: &str = "geocoder_api_key";

/// Geocoder API key, None if never set
pub async fn get_geocoder_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting(db, GEOCODER_API_KEY).await
}

pub async fn set_geocoder_api_key(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    set_setting(db, GEOCODER_API_KEY, key).await
}

async fn get_setting(db: &Pool<Sqlite>, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    Ok(row.map(|(value,)| value))
}

async fn set_setting(db: &Pool<Sqlite>, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_api_key_absent_then_set_then_replaced() {
        let pool = init_memory_pool().await.unwrap();
        assert_eq!(get_geocoder_api_key(&pool).await.unwrap(), None);

        set_geocoder_api_key(&pool, "first").await.unwrap();
        set_geocoder_api_key(&pool, "second").await.unwrap();
        assert_eq!(
            get_geocoder_api_key(&pool).await.unwrap().as_deref(),
            Some("second")
        );
    }
}
