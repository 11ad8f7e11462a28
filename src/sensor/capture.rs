//! Live packet capture source
//!
//! Owns the libpcap handle on a dedicated OS thread so a stalled consumer
//! never blocks the kernel capture buffer. Frames are coalesced into batches
//! and pushed over a bounded channel into the async pipeline. Read failures
//! put the source into a backoff-and-reopen loop with exponential delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};
use pcap::{Active, Capture};
use tokio::sync::mpsc;

use crate::sensor::decode::LinkLayer;

#[derive(Debug, Display, From, Error)]
pub enum CaptureError {
    Pcap(pcap::Error),
}

type Result<T> = std::result::Result<T, CaptureError>;

/// Frames accumulated per channel send. Batches of 1 are normal under light
/// load; the consumer accepts any non-empty batch.
const BATCH_MAX: usize = 64;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// One capture callback's worth of data.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Wall-clock capture timestamp, microsecond resolution.
    pub ts: DateTime<Utc>,
    pub captured_len: u32,
    pub original_len: u32,
    pub data: Vec<u8>,
}

/// A non-empty batch of frames plus the link layer they were captured with.
#[derive(Debug)]
pub struct FrameBatch {
    pub link: LinkLayer,
    pub frames: Vec<CapturedFrame>,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: String,
    pub snaplen: i32,
    pub promisc: bool,
    pub timeout_ms: i32,
    pub filter: String,
}

pub struct CaptureSource {
    config: CaptureConfig,
    shutdown: Arc<AtomicBool>,
}

impl CaptureSource {
    pub fn new(config: CaptureConfig, shutdown: Arc<AtomicBool>) -> CaptureSource {
        CaptureSource { config, shutdown }
    }

    /// Open the device. Startup aborts if this fails; the filter is applied
    /// separately so a bad expression degrades to catch-all capture instead.
    /// An unrecognized datalink type is not fatal either: the decoder
    /// rejects those frames one by one as invalid.
    pub fn open_live(&self) -> Result<(Capture<Active>, LinkLayer)> {
        let cap = Capture::from_device(self.config.device.as_str())?
            .promisc(self.config.promisc)
            .snaplen(self.config.snaplen)
            .timeout(self.config.timeout_ms)
            .open()?;
        let link = LinkLayer::from_datalink(cap.get_datalink().0);
        if let LinkLayer::Unknown(dlt) = link {
            log::warn!(
                "datalink {} on {} has no decoder, frames will be counted invalid",
                dlt,
                self.config.device
            );
        }
        Ok((cap, link))
    }

    /// Install the configured BPF filter on an open handle.
    pub fn install_filter(&self, cap: &mut Capture<Active>) -> Result<()> {
        cap.filter(&self.config.filter, true)?;
        Ok(())
    }

    /// Move the source onto its capture thread. The thread exits when the
    /// shutdown flag is raised or the receiving side of `tx` goes away.
    pub fn spawn(
        self,
        cap: Capture<Active>,
        link: LinkLayer,
        tx: mpsc::Sender<FrameBatch>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("argos-capture".into())
            .spawn(move || self.run(cap, link, tx))
    }

    fn run(self, mut cap: Capture<Active>, mut link: LinkLayer, tx: mpsc::Sender<FrameBatch>) {
        let mut batch: Vec<CapturedFrame> = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            match cap.next_packet() {
                Ok(packet) => {
                    batch.push(Self::to_frame(&packet));
                    if batch.len() >= BATCH_MAX && !Self::deliver(&tx, link, &mut batch) {
                        return;
                    }
                }
                Err(pcap::Error::TimeoutExpired) => {
                    if !batch.is_empty() && !Self::deliver(&tx, link, &mut batch) {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!(
                        "capture read on {} failed: {}, reopening",
                        self.config.device,
                        e
                    );
                    batch.clear();
                    match self.reopen() {
                        Some((new_cap, new_link)) => {
                            cap = new_cap;
                            link = new_link;
                        }
                        None => break,
                    }
                }
            }
        }

        if !batch.is_empty() {
            let _ = tx.blocking_send(FrameBatch {
                link,
                frames: batch,
            });
        }
        log::debug!("capture thread on {} exiting", self.config.device);
    }

    fn deliver(
        tx: &mpsc::Sender<FrameBatch>,
        link: LinkLayer,
        batch: &mut Vec<CapturedFrame>,
    ) -> bool {
        let frames = std::mem::take(batch);
        tx.blocking_send(FrameBatch { link, frames }).is_ok()
    }

    fn to_frame(packet: &pcap::Packet) -> CapturedFrame {
        let nanos = (packet.header.ts.tv_usec as u32).saturating_mul(1000);
        CapturedFrame {
            ts: DateTime::from_timestamp(packet.header.ts.tv_sec as i64, nanos)
                .unwrap_or_default(),
            captured_len: packet.header.caplen,
            original_len: packet.header.len,
            data: packet.data.to_vec(),
        }
    }

    /// Keep trying to reopen the device with exponentially growing delays.
    /// Returns `None` when shutdown is raised while waiting.
    fn reopen(&self) -> Option<(Capture<Active>, LinkLayer)> {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            if !self.sleep_interruptible(backoff) {
                return None;
            }
            backoff = std::cmp::min(backoff * 2, BACKOFF_CAP);

            match self.open_live() {
                Ok((mut cap, link)) => {
                    if let Err(e) = self.install_filter(&mut cap) {
                        log::warn!(
                            "filter {:?} rejected after reopen, capturing unfiltered: {}",
                            self.config.filter,
                            e
                        );
                    }
                    log::info!("capture on {} reopened", self.config.device);
                    return Some((cap, link));
                }
                Err(e) => {
                    log::warn!(
                        "reopening {} failed: {}, next attempt in {:?}",
                        self.config.device,
                        e,
                        backoff
                    );
                }
            }
        }
    }

    /// Sleep in short slices so shutdown is not delayed by a long backoff.
    /// Returns false when shutdown was raised.
    fn sleep_interruptible(&self, total: Duration) -> bool {
        let slice = Duration::from_millis(250);
        let mut remaining = total;
        while remaining > Duration::ZERO {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let step = std::cmp::min(slice, remaining);
            thread::sleep(step);
            remaining -= step;
        }
        !self.shutdown.load(Ordering::SeqCst)
    }
}
