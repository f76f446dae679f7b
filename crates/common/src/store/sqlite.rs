use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{Op, Reply, Store};
use crate::db::AsyncDb;
use crate::time::Clock;

const KIND_SCALAR: &str = "scalar";
const KIND_HASH: &str = "hash";
const KIND_ZSET: &str = "zset";
const KIND_SET: &str = "set";
const KIND_LIST: &str = "list";

/// [`Store`] over SQLite. One `execute` call is one transaction: IMMEDIATE when
/// any op writes, DEFERRED when every op is a read.
#[derive(Clone)]
pub struct SqliteStore {
    db: AsyncDb,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn new(db: AsyncDb, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn open(path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = AsyncDb::open(path)
            .await
            .with_context(|| format!("failed to open store at {path}"))?;
        Ok(Self::new(db, clock))
    }

    pub async fn open_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::new(AsyncDb::open_memory().await?, clock))
    }

    pub fn db(&self) -> &AsyncDb {
        &self.db
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}

impl Store for SqliteStore {
    fn execute(&self, ops: Vec<Op>) -> impl Future<Output = Result<Vec<Reply>>> + Send {
        let now = self.now_ms();
        let label = match ops.as_slice() {
            [single] => single.name(),
            _ => "batch",
        };
        let behavior = transaction_behavior(&ops);
        async move {
            self.db
                .call_named(label, move |conn| {
                    let tx = conn.transaction_with_behavior(behavior)?;
                    let mut replies = Vec::with_capacity(ops.len());
                    for op in ops {
                        replies.push(apply(&tx, op, now)?);
                    }
                    tx.commit()?;
                    Ok(replies)
                })
                .await
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send {
        let now = self.now_ms();
        let prefix = prefix.to_string();
        async move {
            self.db
                .call_named("keys", move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT key FROM kv_keys
                         WHERE substr(key, 1, length(?1)) = ?1
                           AND (expires_at IS NULL OR expires_at > ?2)
                         ORDER BY key",
                    )?;
                    let keys = stmt
                        .query_map(params![prefix, now], |row| row.get(0))?
                        .collect::<Result<Vec<String>, _>>()?;
                    Ok(keys)
                })
                .await
        }
    }

    fn purge_expired(&self) -> impl Future<Output = Result<u64>> + Send {
        let now = self.now_ms();
        async move {
            self.db
                .call_named("purge_expired", move |conn| {
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                    let expired = string_rows(
                        &tx,
                        "SELECT key FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                        [now],
                    )?;
                    for key in &expired {
                        delete_key(&tx, key)?;
                    }
                    tx.commit()?;
                    Ok(expired.len() as u64)
                })
                .await
        }
    }
}

/// Reads must not take the write lock the ingest server and read API share.
fn transaction_behavior(ops: &[Op]) -> TransactionBehavior {
    if ops.iter().all(Op::is_read) {
        TransactionBehavior::Deferred
    } else {
        TransactionBehavior::Immediate
    }
}

fn ttl_deadline(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn delete_key(conn: &Connection, key: &str) -> Result<bool> {
    for table in ["kv_scalars", "kv_hashes", "kv_zsets", "kv_sets", "kv_lists"] {
        conn.execute(&format!("DELETE FROM {table} WHERE key = ?1"), [key])?;
    }
    let removed = conn.execute("DELETE FROM kv_keys WHERE key = ?1", [key])?;
    Ok(removed > 0)
}

/// Kind of a live key, dropping it first if its TTL has elapsed.
fn live_kind(conn: &Connection, key: &str, now: i64) -> Result<Option<String>> {
    let row: Option<(String, Option<i64>)> = conn
        .query_row(
            "SELECT kind, expires_at FROM kv_keys WHERE key = ?1",
            [key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((_, Some(expires_at))) if expires_at <= now => {
            delete_key(conn, key)?;
            Ok(None)
        }
        Some((kind, _)) => Ok(Some(kind)),
        None => Ok(None),
    }
}

/// Whether `key` is live and holds `kind`; errors on a type clash.
fn exists_as(conn: &Connection, key: &str, kind: &str, now: i64) -> Result<bool> {
    match live_kind(conn, key, now)? {
        Some(found) if found == kind => Ok(true),
        Some(found) => bail!("WRONGTYPE: {key} holds a {found}, not a {kind}"),
        None => Ok(false),
    }
}

/// Create `key` as `kind` if absent; an existing key keeps its TTL.
fn touch(conn: &Connection, key: &str, kind: &str, now: i64) -> Result<()> {
    if !exists_as(conn, key, kind, now)? {
        conn.execute(
            "INSERT INTO kv_keys (key, kind, expires_at) VALUES (?1, ?2, NULL)",
            params![key, kind],
        )?;
    }
    Ok(())
}

fn hash_value(conn: &Connection, key: &str, field: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM kv_hashes WHERE key = ?1 AND field = ?2",
            params![key, field],
            |row| row.get(0),
        )
        .optional()?)
}

fn put_hash(conn: &Connection, key: &str, field: &str, value: &str) -> Result<usize> {
    Ok(conn.execute(
        "INSERT INTO kv_hashes (key, field, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
        params![key, field, value],
    )?)
}

fn scalar_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM kv_scalars WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn put_scalar(
    conn: &Connection,
    key: &str,
    value: &str,
    ttl: Option<Duration>,
    now: i64,
) -> Result<()> {
    delete_key(conn, key)?;
    conn.execute(
        "INSERT INTO kv_keys (key, kind, expires_at) VALUES (?1, ?2, ?3)",
        params![key, KIND_SCALAR, ttl.map(|t| ttl_deadline(now, t))],
    )?;
    conn.execute(
        "INSERT INTO kv_scalars (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn zset_score(conn: &Connection, key: &str, member: &str) -> Result<Option<f64>> {
    Ok(conn
        .query_row(
            "SELECT score FROM kv_zsets WHERE key = ?1 AND member = ?2",
            params![key, member],
            |row| row.get(0),
        )
        .optional()?)
}

fn scored_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn string_rows(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count(conn: &Connection, sql: &str, key: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [key], |row| row.get(0))?)
}

fn as_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[allow(clippy::too_many_lines)] // one arm per op
fn apply(conn: &Connection, op: Op, now: i64) -> Result<Reply> {
    match op {
        Op::HashIncr { key, field, by } => {
            touch(conn, &key, KIND_HASH, now)?;
            let current = match hash_value(conn, &key, &field)? {
                Some(v) => v
                    .parse::<i64>()
                    .with_context(|| format!("{key}.{field} is not an integer"))?,
                None => 0,
            };
            let next = current + by;
            put_hash(conn, &key, &field, &next.to_string())?;
            Ok(Reply::Int(next))
        }
        Op::HashIncrFloat { key, field, by } => {
            touch(conn, &key, KIND_HASH, now)?;
            let current = match hash_value(conn, &key, &field)? {
                Some(v) => v
                    .parse::<f64>()
                    .with_context(|| format!("{key}.{field} is not a number"))?,
                None => 0.0,
            };
            let next = current + by;
            put_hash(conn, &key, &field, &next.to_string())?;
            Ok(Reply::Float(next))
        }
        Op::HashSet { key, field, value } => {
            touch(conn, &key, KIND_HASH, now)?;
            let is_new = hash_value(conn, &key, &field)?.is_none();
            put_hash(conn, &key, &field, &value)?;
            Ok(Reply::Bool(is_new))
        }
        Op::HashSetIfAbsent { key, field, value } => {
            touch(conn, &key, KIND_HASH, now)?;
            if hash_value(conn, &key, &field)?.is_some() {
                return Ok(Reply::Bool(false));
            }
            put_hash(conn, &key, &field, &value)?;
            Ok(Reply::Bool(true))
        }
        Op::HashGetAll { key } => {
            let mut fields = HashMap::new();
            if exists_as(conn, &key, KIND_HASH, now)? {
                let mut stmt = conn.prepare("SELECT field, value FROM kv_hashes WHERE key = ?1")?;
                let rows = stmt.query_map([&key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (field, value) = row?;
                    fields.insert(field, value);
                }
            }
            Ok(Reply::Fields(fields))
        }
        Op::ZIncr { key, member, by } => {
            touch(conn, &key, KIND_ZSET, now)?;
            conn.execute(
                "INSERT INTO kv_zsets (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = score + excluded.score",
                params![key, member, by],
            )?;
            let score = zset_score(conn, &key, &member)?.unwrap_or(by);
            Ok(Reply::Float(score))
        }
        Op::ZSet { key, member, score } => {
            touch(conn, &key, KIND_ZSET, now)?;
            conn.execute(
                "INSERT INTO kv_zsets (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                params![key, member, score],
            )?;
            Ok(Reply::Ok)
        }
        Op::ZRevRange { key, offset, limit } => {
            if !exists_as(conn, &key, KIND_ZSET, now)? {
                return Ok(Reply::Scored(Vec::new()));
            }
            Ok(Reply::Scored(scored_rows(
                conn,
                "SELECT member, score FROM kv_zsets WHERE key = ?1
                 ORDER BY score DESC, member DESC LIMIT ?2 OFFSET ?3",
                params![key, as_limit(limit), as_limit(offset)],
            )?))
        }
        Op::ZRangeByScore {
            key,
            min,
            max,
            limit,
        } => {
            if !exists_as(conn, &key, KIND_ZSET, now)? {
                return Ok(Reply::Scored(Vec::new()));
            }
            Ok(Reply::Scored(scored_rows(
                conn,
                "SELECT member, score FROM kv_zsets
                 WHERE key = ?1 AND score >= ?2 AND score <= ?3
                 ORDER BY score DESC, member DESC LIMIT ?4",
                params![key, min, max, as_limit(limit)],
            )?))
        }
        Op::ZRevRank { key, member } => {
            if !exists_as(conn, &key, KIND_ZSET, now)? {
                return Ok(Reply::Rank(None));
            }
            let Some(score) = zset_score(conn, &key, &member)? else {
                return Ok(Reply::Rank(None));
            };
            let ahead: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kv_zsets
                 WHERE key = ?1 AND (score > ?2 OR (score = ?2 AND member > ?3))",
                params![key, score, member],
                |row| row.get(0),
            )?;
            Ok(Reply::Rank(Some(u64::try_from(ahead).unwrap_or(0))))
        }
        Op::ZScore { key, member } => {
            if !exists_as(conn, &key, KIND_ZSET, now)? {
                return Ok(Reply::Score(None));
            }
            Ok(Reply::Score(zset_score(conn, &key, &member)?))
        }
        Op::ZCard { key } => {
            if !exists_as(conn, &key, KIND_ZSET, now)? {
                return Ok(Reply::Int(0));
            }
            Ok(Reply::Int(count(
                conn,
                "SELECT COUNT(*) FROM kv_zsets WHERE key = ?1",
                &key,
            )?))
        }
        Op::SetAdd { key, member } => {
            touch(conn, &key, KIND_SET, now)?;
            let added = conn.execute(
                "INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?1, ?2)",
                params![key, member],
            )?;
            Ok(Reply::Bool(added == 1))
        }
        Op::SetRemove { key, member } => {
            if !exists_as(conn, &key, KIND_SET, now)? {
                return Ok(Reply::Bool(false));
            }
            let removed = conn.execute(
                "DELETE FROM kv_sets WHERE key = ?1 AND member = ?2",
                params![key, member],
            )?;
            let left = count(conn, "SELECT COUNT(*) FROM kv_sets WHERE key = ?1", &key)?;
            if left == 0 {
                delete_key(conn, &key)?;
            }
            Ok(Reply::Bool(removed == 1))
        }
        Op::SetCard { key } => {
            if !exists_as(conn, &key, KIND_SET, now)? {
                return Ok(Reply::Int(0));
            }
            Ok(Reply::Int(count(
                conn,
                "SELECT COUNT(*) FROM kv_sets WHERE key = ?1",
                &key,
            )?))
        }
        Op::SetMembers { key } => {
            if !exists_as(conn, &key, KIND_SET, now)? {
                return Ok(Reply::Members(Vec::new()));
            }
            Ok(Reply::Members(string_rows(
                conn,
                "SELECT member FROM kv_sets WHERE key = ?1 ORDER BY member",
                [&key],
            )?))
        }
        Op::ListPush { key, value, cap } => {
            touch(conn, &key, KIND_LIST, now)?;
            conn.execute(
                "INSERT INTO kv_lists (key, seq, value)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM kv_lists WHERE key = ?1), ?2)",
                params![key, value],
            )?;
            if cap > 0 {
                conn.execute(
                    "DELETE FROM kv_lists WHERE key = ?1 AND seq <= (
                        SELECT seq FROM kv_lists WHERE key = ?1
                        ORDER BY seq DESC LIMIT 1 OFFSET ?2
                     )",
                    params![key, as_limit(cap)],
                )?;
            }
            Ok(Reply::Int(count(
                conn,
                "SELECT COUNT(*) FROM kv_lists WHERE key = ?1",
                &key,
            )?))
        }
        Op::ListRange { key, offset, limit } => {
            if !exists_as(conn, &key, KIND_LIST, now)? {
                return Ok(Reply::Members(Vec::new()));
            }
            Ok(Reply::Members(string_rows(
                conn,
                "SELECT value FROM kv_lists WHERE key = ?1
                 ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
                params![key, as_limit(limit), as_limit(offset)],
            )?))
        }
        Op::Get { key } => {
            if !exists_as(conn, &key, KIND_SCALAR, now)? {
                return Ok(Reply::Value(None));
            }
            Ok(Reply::Value(scalar_value(conn, &key)?))
        }
        Op::Set { key, value, ttl } => {
            put_scalar(conn, &key, &value, ttl, now)?;
            Ok(Reply::Ok)
        }
        Op::SetIfAbsent { key, value, ttl } => {
            if live_kind(conn, &key, now)?.is_some() {
                return Ok(Reply::Bool(false));
            }
            put_scalar(conn, &key, &value, ttl, now)?;
            Ok(Reply::Bool(true))
        }
        Op::Incr { key, ttl } => {
            if !exists_as(conn, &key, KIND_SCALAR, now)? {
                conn.execute(
                    "INSERT INTO kv_keys (key, kind, expires_at) VALUES (?1, ?2, ?3)",
                    params![key, KIND_SCALAR, ttl.map(|t| ttl_deadline(now, t))],
                )?;
            }
            let current = match scalar_value(conn, &key)? {
                Some(v) => v
                    .parse::<i64>()
                    .with_context(|| format!("{key} is not an integer"))?,
                None => 0,
            };
            let next = current + 1;
            conn.execute(
                "INSERT INTO kv_scalars (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, next.to_string()],
            )?;
            Ok(Reply::Int(next))
        }
        Op::Expire { key, ttl } => {
            if live_kind(conn, &key, now)?.is_none() {
                return Ok(Reply::Bool(false));
            }
            conn.execute(
                "UPDATE kv_keys SET expires_at = ?2 WHERE key = ?1",
                params![key, ttl_deadline(now, ttl)],
            )?;
            Ok(Reply::Bool(true))
        }
        Op::Delete { key } => {
            let existed = live_kind(conn, &key, now)?.is_some();
            delete_key(conn, &key)?;
            Ok(Reply::Bool(existed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Batch;
    use crate::time::FixedClock;

    async fn store_with_clock() -> (SqliteStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at_date("2025-01-01").unwrap());
        let store = SqliteStore::open_memory(clock.clone()).await.unwrap();
        (store, clock)
    }

    #[tokio::test]
    async fn test_hash_increments_and_get_all() {
        let (store, _clock) = store_with_clock().await;
        let mut batch = Batch::new();
        batch
            .hincr("stats:global", "total_mints", 1)
            .hincr("stats:global", "total_mints", 2)
            .hincr_float("stats:global", "total_volume", 0.5)
            .hset("stats:global", "label", "x");
        let replies = store.commit(batch).await.unwrap();
        assert_eq!(replies[1], Reply::Int(3));

        let fields = store.hash_get_all("stats:global").await.unwrap();
        assert_eq!(fields["total_mints"], "3");
        assert_eq!(fields["total_volume"].parse::<f64>().unwrap(), 0.5);
        assert_eq!(fields["label"], "x");
        assert!(store.hash_get_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let (store, _clock) = store_with_clock().await;
        store
            .set_if_absent("scalar-key", "1", None)
            .await
            .unwrap();

        let mut batch = Batch::new();
        batch
            .hincr("stats:global", "total_events", 1)
            // Type clash: scalar-key is not a hash, so the whole batch must roll back.
            .hincr("scalar-key", "field", 1);
        assert!(store.commit(batch).await.is_err());

        assert!(store.hash_get_all("stats:global").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sorted_set_rank_and_ranges() {
        let (store, _clock) = store_with_clock().await;
        let mut batch = Batch::new();
        batch
            .zincr("lb:mints", "0xa", 3.0)
            .zincr("lb:mints", "0xb", 5.0)
            .zincr("lb:mints", "0xc", 1.0)
            .zincr("lb:mints", "0xc", 1.0);
        store.commit(batch).await.unwrap();

        assert_eq!(store.zset_rev_rank("lb:mints", "0xb").await.unwrap(), Some(0));
        assert_eq!(store.zset_rev_rank("lb:mints", "0xc").await.unwrap(), Some(2));
        assert_eq!(store.zset_rev_rank("lb:mints", "0xz").await.unwrap(), None);
        assert_eq!(store.zset_score("lb:mints", "0xc").await.unwrap(), Some(2.0));
        assert_eq!(store.zset_card("lb:mints").await.unwrap(), 3);

        let top = store.zset_rev_range("lb:mints", 0, 2).await.unwrap();
        assert_eq!(
            top,
            vec![("0xb".to_string(), 5.0), ("0xa".to_string(), 3.0)]
        );
        let mid = store
            .zset_range_by_score("lb:mints", 2.0, 3.0, 10)
            .await
            .unwrap();
        assert_eq!(mid.len(), 2);
        assert_eq!(mid[0].0, "0xa");
    }

    #[tokio::test]
    async fn test_capped_list_keeps_newest() {
        let (store, _clock) = store_with_clock().await;
        let mut batch = Batch::new();
        for i in 0..5 {
            batch.lpush_capped("feed:global", i.to_string(), 3);
        }
        store.commit(batch).await.unwrap();

        let items = store.list_range("feed:global", 0, 10).await.unwrap();
        assert_eq!(items, vec!["4", "3", "2"]);
        let page = store.list_range("feed:global", 1, 1).await.unwrap();
        assert_eq!(page, vec!["3"]);
    }

    #[tokio::test]
    async fn test_set_add_reports_new_members() {
        let (store, _clock) = store_with_clock().await;
        assert!(store.set_add("wallets:connected", "0xa").await.unwrap());
        assert!(!store.set_add("wallets:connected", "0xa").await.unwrap());
        assert!(store.set_add("wallets:connected", "0xb").await.unwrap());
        assert_eq!(store.set_card("wallets:connected").await.unwrap(), 2);
        assert_eq!(
            store.set_members("wallets:connected").await.unwrap(),
            vec!["0xa", "0xb"]
        );
    }

    #[tokio::test]
    async fn test_set_if_absent_respects_ttl() {
        let (store, clock) = store_with_clock().await;
        let ttl = Some(Duration::from_secs(60));
        assert!(store.set_if_absent("marker:tx:0x1", "1", ttl).await.unwrap());
        assert!(!store.set_if_absent("marker:tx:0x1", "1", ttl).await.unwrap());

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(store.get("marker:tx:0x1").await.unwrap(), None);
        assert!(store.set_if_absent("marker:tx:0x1", "1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_ttl_is_set_on_create_only() {
        let (store, clock) = store_with_clock().await;
        let ttl = Some(Duration::from_secs(60));
        assert_eq!(store.incr("ratelimit:0xa:page_view", ttl).await.unwrap(), 1);
        clock.advance(chrono::Duration::seconds(30));
        // A later increment must not push the deadline out.
        assert_eq!(store.incr("ratelimit:0xa:page_view", ttl).await.unwrap(), 2);
        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(store.incr("ratelimit:0xa:page_view", ttl).await.unwrap(), 1);

        assert_eq!(store.incr("counter", None).await.unwrap(), 1);
        clock.advance(chrono::Duration::days(365));
        assert_eq!(store.incr("counter", None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hash_set_if_absent_writes_once() {
        let (store, _clock) = store_with_clock().await;
        let mut batch = Batch::new();
        batch
            .hset_if_absent("wallet:0xa", "first_seen", "100")
            .hset_if_absent("wallet:0xa", "first_seen", "200");
        let replies = store.commit(batch).await.unwrap();
        assert_eq!(replies, vec![Reply::Bool(true), Reply::Bool(false)]);
        assert_eq!(store.hash_get_all("wallet:0xa").await.unwrap()["first_seen"], "100");
    }

    #[tokio::test]
    async fn test_set_remove_drops_empty_set() {
        let (store, _clock) = store_with_clock().await;
        store.set_add("wallets:connected", "0xa").await.unwrap();
        store.set_add("wallets:connected", "0xb").await.unwrap();

        let mut batch = Batch::new();
        batch
            .srem("wallets:connected", "0xa")
            .srem("wallets:connected", "0xa");
        let replies = store.commit(batch).await.unwrap();
        assert_eq!(replies, vec![Reply::Bool(true), Reply::Bool(false)]);
        assert_eq!(store.set_members("wallets:connected").await.unwrap(), vec!["0xb"]);

        let mut batch = Batch::new();
        batch.srem("wallets:connected", "0xb");
        store.commit(batch).await.unwrap();
        assert!(store
            .keys_with_prefix("wallets:")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_read_only_calls_use_deferred_transactions() {
        let reads = vec![
            Op::HashGetAll { key: "a".into() },
            Op::ZRevRank {
                key: "b".into(),
                member: "m".into(),
            },
        ];
        assert!(matches!(
            transaction_behavior(&reads),
            TransactionBehavior::Deferred
        ));

        let mut mixed = reads;
        mixed.push(Op::Incr {
            key: "c".into(),
            ttl: None,
        });
        assert!(matches!(
            transaction_behavior(&mixed),
            TransactionBehavior::Immediate
        ));
    }

    #[tokio::test]
    async fn test_prefix_scan_delete_and_purge() {
        let (store, clock) = store_with_clock().await;
        let mut batch = Batch::new();
        batch
            .hincr("stats:daily:2025-01-01", "events", 1)
            .hincr("stats:daily:2025-01-02", "events", 1)
            .hincr("stats:global", "total_events", 1)
            .expire("stats:daily:2025-01-01", Duration::from_secs(10));
        store.commit(batch).await.unwrap();

        let keys = store.keys_with_prefix("stats:daily:").await.unwrap();
        assert_eq!(keys, vec!["stats:daily:2025-01-01", "stats:daily:2025-01-02"]);

        assert!(store.delete("stats:daily:2025-01-02").await.unwrap());
        assert!(!store.delete("stats:daily:2025-01-02").await.unwrap());

        clock.advance(chrono::Duration::seconds(11));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store
            .keys_with_prefix("stats:daily:")
            .await
            .unwrap()
            .is_empty());
    }
}
