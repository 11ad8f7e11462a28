//! SQLite entity store for endpoints and analyzer data
//!
//! The pipeline consumes exactly one operation on the hot path:
//! `find_or_create`, an atomic lookup-else-insert keyed on the endpoint IP.
//! Analyzer persistence (packet log, per-endpoint aggregates, authorized
//! server flags) lives here as well so the SQL stays in one place.

use chrono::Utc;
use derive_more::{Display, Error, From};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Display, From, Error)]
pub enum StorageError {
    Sqlx(sqlx::Error),
}

type Result<T> = std::result::Result<T, StorageError>;

/// A persisted endpoint entity. Rows are created on first sighting and
/// never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRow {
    pub id: i64,
    pub ip: String,
}

/// The two endpoint flavors, each with its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Server,
    Client,
}

impl EndpointKind {
    pub fn table(&self) -> &'static str {
        match self {
            EndpointKind::Server => "server",
            EndpointKind::Client => "client",
        }
    }
}

/// One packet log row, written by the `packet::logger` analyzer.
#[derive(Debug, Clone)]
pub struct PacketLogEntry {
    pub ts: i64,
    pub server_id: i64,
    pub client_id: i64,
    pub response: bool,
    pub opcode: u8,
    pub rcode: u8,
    pub qname: Option<String>,
    pub qtype: Option<u16>,
    /// JSON array of answer summaries.
    pub answers: String,
}

pub struct EndpointStore {
    pool: SqlitePool,
}

impl EndpointStore {
    /// Open (creating if missing) the database at `path` and apply the
    /// schema. `:memory:` yields a private in-memory database; it is held
    /// to a single connection so every caller sees the same data.
    pub async fn connect(path: &str) -> Result<EndpointStore> {
        let memory = path == ":memory:" || path == "sqlite::memory:";
        let url = if memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if memory { 1 } else { 5 })
            .connect(&url)
            .await?;

        let store = EndpointStore { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        for kind in [EndpointKind::Server, EndpointKind::Client] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ip TEXT NOT NULL UNIQUE,
                    first_seen INTEGER NOT NULL,
                    last_seen INTEGER NOT NULL
                )
                "#,
                kind.table()
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS packet_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                server_id INTEGER NOT NULL,
                client_id INTEGER NOT NULL,
                qr INTEGER NOT NULL,
                opcode INTEGER NOT NULL,
                rcode INTEGER NOT NULL,
                qname TEXT,
                qtype INTEGER,
                answers TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_packet_log_ts ON packet_log(ts)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS endpoint_stats (
                role TEXT NOT NULL,
                endpoint_id INTEGER NOT NULL,
                queries INTEGER NOT NULL DEFAULT 0,
                answers INTEGER NOT NULL DEFAULT 0,
                updated INTEGER NOT NULL,
                PRIMARY KEY (role, endpoint_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorized_server (
                ip TEXT PRIMARY KEY,
                authorized INTEGER NOT NULL DEFAULT 0,
                first_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomic lookup-else-insert keyed on the IP address. Concurrent callers
    /// racing on the same IP both land on the same row; the losing insert
    /// degrades to an update of `last_seen`.
    pub async fn find_or_create(&self, kind: EndpointKind, ip: &str) -> Result<EndpointRow> {
        let now = Utc::now().timestamp();
        let sql = format!(
            r#"
            INSERT INTO {} (ip, first_seen, last_seen) VALUES (?1, ?2, ?2)
            ON CONFLICT(ip) DO UPDATE SET last_seen = excluded.last_seen
            RETURNING id, ip
            "#,
            kind.table()
        );

        let row = sqlx::query(&sql)
            .bind(ip)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(EndpointRow {
            id: row.get("id"),
            ip: row.get("ip"),
        })
    }

    pub async fn log_packet(&self, entry: &PacketLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO packet_log (ts, server_id, client_id, qr, opcode, rcode, qname, qtype, answers)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(entry.ts)
        .bind(entry.server_id)
        .bind(entry.client_id)
        .bind(entry.response as i64)
        .bind(entry.opcode as i64)
        .bind(entry.rcode as i64)
        .bind(&entry.qname)
        .bind(entry.qtype.map(|q| q as i64))
        .bind(&entry.answers)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete packet log rows older than the cutoff; returns rows removed.
    pub async fn prune_packet_log(&self, older_than: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM packet_log WHERE ts < ?1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn packet_log_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM packet_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Fold an aggregation window into the per-endpoint counters.
    pub async fn bump_endpoint_stats(
        &self,
        role: &str,
        endpoint_id: i64,
        queries: u64,
        answers: u64,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO endpoint_stats (role, endpoint_id, queries, answers, updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(role, endpoint_id) DO UPDATE SET
                queries = queries + excluded.queries,
                answers = answers + excluded.answers,
                updated = excluded.updated
            "#,
        )
        .bind(role)
        .bind(endpoint_id)
        .bind(queries as i64)
        .bind(answers as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn endpoint_stats(&self, role: &str, endpoint_id: i64) -> Result<Option<(i64, i64)>> {
        let row = sqlx::query(
            "SELECT queries, answers FROM endpoint_stats WHERE role = ?1 AND endpoint_id = ?2",
        )
        .bind(role)
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| (r.get("queries"), r.get("answers"))))
    }

    /// Whether a server IP is known, and if so whether it is authorized.
    pub async fn authorized_state(&self, ip: &str) -> Result<Option<bool>> {
        let row = sqlx::query("SELECT authorized FROM authorized_server WHERE ip = ?1")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("authorized") != 0))
    }

    /// Record the first sighting of an unknown server, unauthorized until an
    /// operator marks it otherwise.
    pub async fn record_server_sighting(&self, ip: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO authorized_server (ip, authorized, first_seen) VALUES (?1, 0, ?2)
            ON CONFLICT(ip) DO NOTHING
            "#,
        )
        .bind(ip)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_or_create_stability() {
        let store = EndpointStore::connect(":memory:").await.unwrap();

        let first = store
            .find_or_create(EndpointKind::Server, "10.0.0.1")
            .await
            .unwrap();
        let second = store
            .find_or_create(EndpointKind::Server, "10.0.0.1")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!("10.0.0.1", second.ip);

        let other = store
            .find_or_create(EndpointKind::Server, "10.0.0.2")
            .await
            .unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_server_and_client_tables_are_independent() {
        let store = EndpointStore::connect(":memory:").await.unwrap();

        let server = store
            .find_or_create(EndpointKind::Server, "10.0.0.1")
            .await
            .unwrap();
        let client = store
            .find_or_create(EndpointKind::Client, "10.0.0.1")
            .await
            .unwrap();

        // Same IP, different resultsets.
        assert_eq!(server.ip, client.ip);
    }

    #[tokio::test]
    async fn test_packet_log_roundtrip_and_prune() {
        let store = EndpointStore::connect(":memory:").await.unwrap();

        let entry = PacketLogEntry {
            ts: 1_000,
            server_id: 1,
            client_id: 2,
            response: false,
            opcode: 0,
            rcode: 0,
            qname: Some("example.com".to_string()),
            qtype: Some(1),
            answers: "[]".to_string(),
        };
        store.log_packet(&entry).await.unwrap();
        store
            .log_packet(&PacketLogEntry { ts: 2_000, ..entry })
            .await
            .unwrap();

        assert_eq!(2, store.packet_log_count().await.unwrap());
        assert_eq!(1, store.prune_packet_log(1_500).await.unwrap());
        assert_eq!(1, store.packet_log_count().await.unwrap());
    }

    #[tokio::test]
    async fn test_endpoint_stats_accumulate() {
        let store = EndpointStore::connect(":memory:").await.unwrap();

        store
            .bump_endpoint_stats("server", 7, 3, 1, 1_000)
            .await
            .unwrap();
        store
            .bump_endpoint_stats("server", 7, 2, 4, 2_000)
            .await
            .unwrap();

        let (queries, answers) = store.endpoint_stats("server", 7).await.unwrap().unwrap();
        assert_eq!(5, queries);
        assert_eq!(5, answers);
    }

    #[tokio::test]
    async fn test_authorized_sightings() {
        let store = EndpointStore::connect(":memory:").await.unwrap();

        assert_eq!(None, store.authorized_state("10.0.0.1").await.unwrap());
        store.record_server_sighting("10.0.0.1", 1_000).await.unwrap();
        assert_eq!(
            Some(false),
            store.authorized_state("10.0.0.1").await.unwrap()
        );
    }
}
