//! `server::authorized` — flags DNS servers nobody vouched for
//!
//! Every server seen answering is checked against the `authorized_server`
//! table. Unknown servers are recorded (unauthorized) and reported once per
//! run; known-unauthorized servers are reported once per run as well.
//! Marking a server authorized is an operator action on the table.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{Analyzer, AnalyzerContext, AnalyzerError, DnsEvent};
use crate::sensor::logging::{LogSink, SinkLevel};
use crate::storage::EndpointStore;

pub(crate) fn spawn(
    _options: &toml::value::Table,
    ctx: &AnalyzerContext,
) -> Result<Box<dyn Analyzer>, AnalyzerError> {
    Ok(Box::new(AuthorizedServers {
        store: ctx.store.clone(),
        sink: ctx.sink.clone(),
        seen: HashSet::new(),
    }))
}

struct AuthorizedServers {
    store: Arc<EndpointStore>,
    sink: LogSink,
    /// Server IPs already checked this run.
    seen: HashSet<String>,
}

#[async_trait]
impl Analyzer for AuthorizedServers {
    fn name(&self) -> &'static str {
        "server::authorized"
    }

    async fn process(&mut self, event: &DnsEvent) -> Result<(), AnalyzerError> {
        // Only answers prove an endpoint is acting as a server.
        if !event.message.is_response() {
            return Ok(());
        }

        let ip = &event.server.ip;
        if !self.seen.insert(ip.clone()) {
            return Ok(());
        }

        match self.store.authorized_state(ip).await? {
            Some(true) => {}
            Some(false) => {
                self.sink.post(
                    SinkLevel::Notice,
                    &format!("unauthorized DNS server answering: {}", ip),
                );
            }
            None => {
                self.store
                    .record_server_sighting(ip, Utc::now().timestamp())
                    .await?;
                self.sink.post(
                    SinkLevel::Notice,
                    &format!("new DNS server observed: {}", ip),
                );
            }
        }

        Ok(())
    }
}
