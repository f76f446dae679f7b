//! Key-value store contract used by ingestion and the read API.
//!
//! The contract is deliberately Redis-shaped (hashes, sorted sets, sets,
//! capped lists, scalars with TTL) so the aggregation code reads the same
//! whichever backend sits underneath. The only write primitive is
//! [`Store::execute`]: a group of operations applied atomically.

mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// One store operation. Replies come back in the same order as the ops.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    HashIncr {
        key: String,
        field: String,
        by: i64,
    },
    HashIncrFloat {
        key: String,
        field: String,
        by: f64,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    /// Writes the field only when it is missing. Replies whether it wrote.
    HashSetIfAbsent {
        key: String,
        field: String,
        value: String,
    },
    HashGetAll {
        key: String,
    },
    ZIncr {
        key: String,
        member: String,
        by: f64,
    },
    ZSet {
        key: String,
        member: String,
        score: f64,
    },
    /// Highest scores first.
    ZRevRange {
        key: String,
        offset: usize,
        limit: usize,
    },
    /// Members with `min <= score <= max`, highest first.
    ZRangeByScore {
        key: String,
        min: f64,
        max: f64,
        limit: usize,
    },
    /// 0-based position counting from the highest score.
    ZRevRank {
        key: String,
        member: String,
    },
    ZScore {
        key: String,
        member: String,
    },
    ZCard {
        key: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    SetCard {
        key: String,
    },
    SetMembers {
        key: String,
    },
    /// Push to the head, then trim so at most `cap` newest entries remain.
    ListPush {
        key: String,
        value: String,
        cap: usize,
    },
    /// Newest first.
    ListRange {
        key: String,
        offset: usize,
        limit: usize,
    },
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    SetIfAbsent {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// `ttl` is applied only when this increment creates the key.
    Incr {
        key: String,
        ttl: Option<Duration>,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
}

impl Op {
    /// Stable label for metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HashIncr { .. } => "hincrby",
            Self::HashIncrFloat { .. } => "hincrbyfloat",
            Self::HashSet { .. } => "hset",
            Self::HashSetIfAbsent { .. } => "hsetnx",
            Self::HashGetAll { .. } => "hgetall",
            Self::ZIncr { .. } => "zincrby",
            Self::ZSet { .. } => "zadd",
            Self::ZRevRange { .. } => "zrevrange",
            Self::ZRangeByScore { .. } => "zrangebyscore",
            Self::ZRevRank { .. } => "zrevrank",
            Self::ZScore { .. } => "zscore",
            Self::ZCard { .. } => "zcard",
            Self::SetAdd { .. } => "sadd",
            Self::SetRemove { .. } => "srem",
            Self::SetCard { .. } => "scard",
            Self::SetMembers { .. } => "smembers",
            Self::ListPush { .. } => "lpush",
            Self::ListRange { .. } => "lrange",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::SetIfAbsent { .. } => "setnx",
            Self::Incr { .. } => "incr",
            Self::Expire { .. } => "expire",
            Self::Delete { .. } => "del",
        }
    }

    /// True for ops that never write.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::HashGetAll { .. }
                | Self::ZRevRange { .. }
                | Self::ZRangeByScore { .. }
                | Self::ZRevRank { .. }
                | Self::ZScore { .. }
                | Self::ZCard { .. }
                | Self::SetCard { .. }
                | Self::SetMembers { .. }
                | Self::ListRange { .. }
                | Self::Get { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Int(i64),
    Float(f64),
    Bool(bool),
    Value(Option<String>),
    Fields(HashMap<String, String>),
    Scored(Vec<(String, f64)>),
    Rank(Option<u64>),
    Score(Option<f64>),
    Members(Vec<String>),
}

impl Reply {
    pub fn into_int(self) -> Result<i64> {
        match self {
            Self::Int(v) => Ok(v),
            other => bail!("expected integer reply, got {other:?}"),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            other => bail!("expected boolean reply, got {other:?}"),
        }
    }

    pub fn into_value(self) -> Result<Option<String>> {
        match self {
            Self::Value(v) => Ok(v),
            other => bail!("expected value reply, got {other:?}"),
        }
    }

    pub fn into_fields(self) -> Result<HashMap<String, String>> {
        match self {
            Self::Fields(v) => Ok(v),
            other => bail!("expected hash reply, got {other:?}"),
        }
    }

    pub fn into_scored(self) -> Result<Vec<(String, f64)>> {
        match self {
            Self::Scored(v) => Ok(v),
            other => bail!("expected scored reply, got {other:?}"),
        }
    }

    pub fn into_rank(self) -> Result<Option<u64>> {
        match self {
            Self::Rank(v) => Ok(v),
            other => bail!("expected rank reply, got {other:?}"),
        }
    }

    pub fn into_score(self) -> Result<Option<f64>> {
        match self {
            Self::Score(v) => Ok(v),
            other => bail!("expected score reply, got {other:?}"),
        }
    }

    pub fn into_members(self) -> Result<Vec<String>> {
        match self {
            Self::Members(v) => Ok(v),
            other => bail!("expected members reply, got {other:?}"),
        }
    }
}

/// Mutations staged for one request and committed in a single round-trip.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn push(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn hincr(&mut self, key: impl Into<String>, field: impl Into<String>, by: i64) -> &mut Self {
        self.push(Op::HashIncr {
            key: key.into(),
            field: field.into(),
            by,
        })
    }

    /// Float increment; a zero amount stages nothing.
    pub fn hincr_float(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        by: f64,
    ) -> &mut Self {
        if by == 0.0 {
            return self;
        }
        self.push(Op::HashIncrFloat {
            key: key.into(),
            field: field.into(),
            by,
        })
    }

    pub fn hset(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Op::HashSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn hset_if_absent(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Op::HashSetIfAbsent {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    /// Sorted-set increment; a zero amount stages nothing.
    pub fn zincr(&mut self, key: impl Into<String>, member: impl Into<String>, by: f64) -> &mut Self {
        if by == 0.0 {
            return self;
        }
        self.push(Op::ZIncr {
            key: key.into(),
            member: member.into(),
            by,
        })
    }

    pub fn zset(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        score: f64,
    ) -> &mut Self {
        self.push(Op::ZSet {
            key: key.into(),
            member: member.into(),
            score,
        })
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Op::SetAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Op::SetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn lpush_capped(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        cap: usize,
    ) -> &mut Self {
        self.push(Op::ListPush {
            key: key.into(),
            value: value.into(),
            cap,
        })
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Op::Expire {
            key: key.into(),
            ttl,
        })
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Op::Delete { key: key.into() })
    }
}

fn single(mut replies: Vec<Reply>) -> Result<Reply> {
    match replies.pop() {
        Some(reply) if replies.is_empty() => Ok(reply),
        _ => bail!("expected exactly one reply"),
    }
}

/// Backend contract. Implementations must apply each `execute` call atomically:
/// readers observe either every op of the call or none of them.
pub trait Store: Send + Sync + 'static {
    fn execute(&self, ops: Vec<Op>) -> impl Future<Output = Result<Vec<Reply>>> + Send;

    /// Live keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Physically drop keys whose TTL has elapsed. Returns how many were removed.
    fn purge_expired(&self) -> impl Future<Output = Result<u64>> + Send;

    fn commit(&self, batch: Batch) -> impl Future<Output = Result<Vec<Reply>>> + Send {
        self.execute(batch.into_ops())
    }

    fn run(&self, op: Op) -> impl Future<Output = Result<Reply>> + Send {
        async move { single(self.execute(vec![op]).await?) }
    }

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send {
        let op = Op::Get {
            key: key.to_string(),
        };
        async move { self.run(op).await?.into_value() }
    }

    /// Returns `true` only for the caller that created the key.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool>> + Send {
        let op = Op::SetIfAbsent {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        };
        async move { self.run(op).await?.into_bool() }
    }

    /// Counter increment; a key created by this call gets `ttl`.
    fn incr(&self, key: &str, ttl: Option<Duration>) -> impl Future<Output = Result<i64>> + Send {
        let op = Op::Incr {
            key: key.to_string(),
            ttl,
        };
        async move { self.run(op).await?.into_int() }
    }

    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<bool>> + Send {
        let op = Op::Expire {
            key: key.to_string(),
            ttl,
        };
        async move { self.run(op).await?.into_bool() }
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        let op = Op::Delete {
            key: key.to_string(),
        };
        async move { self.run(op).await?.into_bool() }
    }

    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send {
        let op = Op::HashGetAll {
            key: key.to_string(),
        };
        async move { self.run(op).await?.into_fields() }
    }

    /// Returns whether the member was newly added.
    fn set_add(&self, key: &str, member: &str) -> impl Future<Output = Result<bool>> + Send {
        let op = Op::SetAdd {
            key: key.to_string(),
            member: member.to_string(),
        };
        async move { self.run(op).await?.into_bool() }
    }

    fn set_card(&self, key: &str) -> impl Future<Output = Result<i64>> + Send {
        let op = Op::SetCard {
            key: key.to_string(),
        };
        async move { self.run(op).await?.into_int() }
    }

    fn set_members(&self, key: &str) -> impl Future<Output = Result<Vec<String>>> + Send {
        let op = Op::SetMembers {
            key: key.to_string(),
        };
        async move { self.run(op).await?.into_members() }
    }

    fn zset_rev_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, f64)>>> + Send {
        let op = Op::ZRevRange {
            key: key.to_string(),
            offset,
            limit,
        };
        async move { self.run(op).await?.into_scored() }
    }

    fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, f64)>>> + Send {
        let op = Op::ZRangeByScore {
            key: key.to_string(),
            min,
            max,
            limit,
        };
        async move { self.run(op).await?.into_scored() }
    }

    fn zset_rev_rank(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<Option<u64>>> + Send {
        let op = Op::ZRevRank {
            key: key.to_string(),
            member: member.to_string(),
        };
        async move { self.run(op).await?.into_rank() }
    }

    fn zset_score(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<Option<f64>>> + Send {
        let op = Op::ZScore {
            key: key.to_string(),
            member: member.to_string(),
        };
        async move { self.run(op).await?.into_score() }
    }

    fn zset_card(&self, key: &str) -> impl Future<Output = Result<i64>> + Send {
        let op = Op::ZCard {
            key: key.to_string(),
        };
        async move { self.run(op).await?.into_int() }
    }

    fn list_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        let op = Op::ListRange {
            key: key.to_string(),
            offset,
            limit,
        };
        async move { self.run(op).await?.into_members() }
    }
}
