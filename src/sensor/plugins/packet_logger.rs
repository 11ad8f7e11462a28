//! `packet::logger` — persists one row per observed DNS message
//!
//! The row carries the endpoint ids, the header essentials and a JSON
//! summary of the answers. Retention is bounded by the `keep_for` option;
//! pruning runs opportunistically at most once an hour so the hot path is
//! one insert.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Analyzer, AnalyzerContext, AnalyzerError, DnsEvent};
use crate::storage::{EndpointStore, PacketLogEntry};

const DEFAULT_KEEP_FOR: &str = "30 days";
const PRUNE_INTERVAL_SECS: i64 = 3600;

pub(crate) fn spawn(
    options: &toml::value::Table,
    ctx: &AnalyzerContext,
) -> Result<Box<dyn Analyzer>, AnalyzerError> {
    let keep_for = match options.get("keep_for") {
        None => DEFAULT_KEEP_FOR.to_string(),
        Some(toml::Value::String(s)) => s.clone(),
        Some(other) => {
            log::warn!("packet::logger keep_for must be a string, got {}", other);
            return Err(AnalyzerError::BadOption);
        }
    };

    let keep_secs = match parse_retention(&keep_for) {
        Some(secs) => secs,
        None => {
            log::warn!("packet::logger cannot parse keep_for {:?}", keep_for);
            return Err(AnalyzerError::BadOption);
        }
    };

    Ok(Box::new(PacketLogger {
        store: ctx.store.clone(),
        keep_secs,
        last_prune: 0,
    }))
}

/// Parse retention strings like "30 days", "12 hours" or "90 seconds".
fn parse_retention(value: &str) -> Option<i64> {
    let mut parts = value.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() || amount < 0 {
        return None;
    }

    let per_unit = match unit.trim_end_matches('s') {
        "second" => 1,
        "minute" => 60,
        "hour" => 3600,
        "day" => 86_400,
        "week" => 7 * 86_400,
        _ => return None,
    };

    Some(amount * per_unit)
}

struct PacketLogger {
    store: Arc<EndpointStore>,
    keep_secs: i64,
    last_prune: i64,
}

#[async_trait]
impl Analyzer for PacketLogger {
    fn name(&self) -> &'static str {
        "packet::logger"
    }

    async fn process(&mut self, event: &DnsEvent) -> Result<(), AnalyzerError> {
        let ts = event.ts.timestamp();
        let question = event.message.first_question();
        let answers = serde_json::to_string(&event.message.answer_summaries())
            .unwrap_or_else(|_| "[]".to_string());

        let entry = PacketLogEntry {
            ts,
            server_id: event.server.id,
            client_id: event.client.id,
            response: event.message.is_response(),
            opcode: event.message.header.opcode,
            rcode: event.message.header.rescode as u8,
            qname: question.map(|q| q.name.clone()),
            qtype: question.map(|q| q.qtype.to_num()),
            answers,
        };
        self.store.log_packet(&entry).await?;

        if ts - self.last_prune >= PRUNE_INTERVAL_SECS {
            self.last_prune = ts;
            let removed = self.store.prune_packet_log(ts - self.keep_secs).await?;
            if removed > 0 {
                log::debug!("packet::logger pruned {} expired rows", removed);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retention() {
        assert_eq!(Some(30 * 86_400), parse_retention("30 days"));
        assert_eq!(Some(86_400), parse_retention("1 day"));
        assert_eq!(Some(12 * 3600), parse_retention("12 hours"));
        assert_eq!(Some(90), parse_retention("90 seconds"));
        assert_eq!(Some(2 * 7 * 86_400), parse_retention("2 weeks"));

        assert_eq!(None, parse_retention("monthly"));
        assert_eq!(None, parse_retention("-1 days"));
        assert_eq!(None, parse_retention("30"));
        assert_eq!(None, parse_retention("30 days ago"));
    }
}
