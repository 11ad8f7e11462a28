//! `server::stats` / `client::stats` — per-endpoint traffic aggregation
//!
//! Both plugins share one analyzer parameterized by role. Counts accumulate
//! in memory and fold into the `endpoint_stats` table on a fixed cadence
//! when the `rrd` option is on; shutdown always flushes whatever is
//! pending.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{Analyzer, AnalyzerContext, AnalyzerError, DnsEvent};
use crate::storage::EndpointStore;

const FLUSH_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

pub(crate) fn spawn_server(
    options: &toml::value::Table,
    ctx: &AnalyzerContext,
) -> Result<Box<dyn Analyzer>, AnalyzerError> {
    spawn(Role::Server, options, ctx)
}

pub(crate) fn spawn_client(
    options: &toml::value::Table,
    ctx: &AnalyzerContext,
) -> Result<Box<dyn Analyzer>, AnalyzerError> {
    spawn(Role::Client, options, ctx)
}

fn spawn(
    role: Role,
    options: &toml::value::Table,
    ctx: &AnalyzerContext,
) -> Result<Box<dyn Analyzer>, AnalyzerError> {
    let rrd = match options.get("rrd") {
        None => true,
        Some(toml::Value::Integer(v)) => *v == 1,
        Some(other) => {
            log::warn!("{}::stats rrd must be 0 or 1, got {}", role.as_str(), other);
            return Err(AnalyzerError::BadOption);
        }
    };

    Ok(Box::new(EndpointStats {
        role,
        store: ctx.store.clone(),
        rrd,
        pending: HashMap::new(),
        last_flush: Utc::now().timestamp(),
    }))
}

/// (queries, answers) pending per endpoint row id.
type Pending = HashMap<i64, (u64, u64)>;

struct EndpointStats {
    role: Role,
    store: Arc<EndpointStore>,
    rrd: bool,
    pending: Pending,
    last_flush: i64,
}

impl EndpointStats {
    async fn flush(&mut self, now: i64) -> Result<(), AnalyzerError> {
        self.last_flush = now;
        let pending: Vec<(i64, (u64, u64))> = self.pending.drain().collect();
        for (endpoint_id, (queries, answers)) in pending {
            self.store
                .bump_endpoint_stats(self.role.as_str(), endpoint_id, queries, answers, now)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Analyzer for EndpointStats {
    fn name(&self) -> &'static str {
        match self.role {
            Role::Server => "server::stats",
            Role::Client => "client::stats",
        }
    }

    async fn process(&mut self, event: &DnsEvent) -> Result<(), AnalyzerError> {
        let row = match self.role {
            Role::Server => &event.server,
            Role::Client => &event.client,
        };

        let counts = self.pending.entry(row.id).or_default();
        if event.message.is_response() {
            counts.1 += 1;
        } else {
            counts.0 += 1;
        }

        let now = event.ts.timestamp();
        if self.rrd && now - self.last_flush >= FLUSH_INTERVAL_SECS {
            self.flush(now).await?;
        }

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), AnalyzerError> {
        self.flush(Utc::now().timestamp()).await
    }
}
