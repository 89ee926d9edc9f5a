pub mod repository;

use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::info;

/// Opens the pool and brings the schema up to date. Called once at startup;
/// the pool is then handed to each service explicitly.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!("database ready ({} max connections)", max_connections);
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied. Each pooled
/// connection to `:memory:` would see its own empty database, so the pool is
/// pinned to one connection that never expires.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// A write transaction that takes SQLite's writer lock up front
/// (`BEGIN IMMEDIATE`), so reads made inside it cannot be invalidated by a
/// concurrent writer before the transaction commits.
///
/// If dropped without `commit`/`rollback` the connection is closed instead of
/// being returned to the pool, which discards the open transaction.
pub struct WriteTx {
    conn: PoolConnection<Sqlite>,
    finished: bool,
}

impl WriteTx {
    pub async fn begin(db: &SqlitePool) -> Result<Self, sqlx::Error> {
        let mut conn = db.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.close_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let pool = connect_in_memory().await.expect("Failed to create test db");

        let mut tx = WriteTx::begin(&pool).await.expect("Failed to begin");
        sqlx::query("INSERT INTO rooms (name) VALUES ('R1')")
            .execute(tx.conn())
            .await
            .expect("Failed to insert");
        tx.rollback().await.expect("Failed to roll back");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms")
            .fetch_one(&pool)
            .await
            .expect("Failed to count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let pool = connect_in_memory().await.expect("Failed to create test db");

        let mut tx = WriteTx::begin(&pool).await.expect("Failed to begin");
        sqlx::query("INSERT INTO rooms (name) VALUES ('R1')")
            .execute(tx.conn())
            .await
            .expect("Failed to insert");
        tx.commit().await.expect("Failed to commit");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms")
            .fetch_one(&pool)
            .await
            .expect("Failed to count");
        assert_eq!(count, 1);
    }
}
