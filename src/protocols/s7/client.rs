//! S7 driver: connection state machine, polling loop and write path.
//!
//! One background task per driver multiplexes the polling timer and the
//! inbound message queue, so all device I/O for a device funnels through a
//! single place. `write()` is a blocking rendezvous with that task: the
//! caller parks on a oneshot reply, which keeps at most one write in
//! flight per driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::codec;
use crate::core::data::{DataType, Value};
use crate::core::error::{AgentError, Result};
use crate::core::tag::{Tag, TagMeta};
use crate::core::traits::{DeviceDriver, DriverMessage, DriverStatus};
use crate::driver::registry::DriverParams;
use crate::store::RealtimeSink;

use super::address::{parse_address, Area, S7Address, WordLen};
use super::transport::{IsoTcpTransport, S7Transport};

/// Default ISO-on-TCP port.
const DEFAULT_PORT: u16 = 102;

/// Default poll interval in milliseconds.
const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Reconnect when the last successful contact is older than this.
const STALE_AFTER: Duration = Duration::from_secs(5);

/// Consecutive failed cycles after which every tag is forced `Bad`.
const FAIL_THRESHOLD: u32 = 5;

/// Inbound queue depth.
const QUEUE_DEPTH: usize = 100;

/// Polling loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Polling,
    Reconnecting,
    Stopped,
}

/// Outcome of one poll cycle.
enum Cycle {
    /// Every parsed tag read and decoded.
    Clean,
    /// Some tags failed; count attached.
    Partial(usize),
    /// The device itself was unreachable.
    Offline(AgentError),
}

/// Connection state, guarded separately so status queries never wait on
/// device I/O.
#[derive(Default)]
struct LinkState {
    connected: bool,
    last_ping: Option<Instant>,
    last_contact: Option<DateTime<Utc>>,
}

/// Transport and tag table; the I/O lock. Holding this mutex is what
/// serializes reads, writes and connection attempts against each other.
struct S7Io {
    transport: Box<dyn S7Transport>,
    tags: HashMap<String, Tag>,
}

/// State shared between the driver handle and its polling loop.
struct Shared {
    id: String,
    raw_url: String,
    interval_ms: AtomicU64,
    io: Mutex<S7Io>,
    link: StdMutex<LinkState>,
    fail_count: AtomicU32,
    snapshot_tx: watch::Sender<Arc<Vec<Tag>>>,
    sink: Arc<dyn RealtimeSink>,
}

/// S7 fieldbus driver.
pub struct S7Driver {
    shared: Arc<Shared>,
    name: String,
    endpoint: String,
    rack: u8,
    slot: u8,
    msg_tx: mpsc::Sender<DriverMessage>,
    msg_rx: StdMutex<Option<mpsc::Receiver<DriverMessage>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    snapshot_rx: watch::Receiver<Arc<Vec<Tag>>>,
}

impl S7Driver {
    /// Build a driver from registry parameters, with the production
    /// TCP transport.
    pub fn from_params(params: DriverParams) -> Result<Self> {
        let (endpoint, rack, slot, _) = parse_url(&params.raw_url)?;
        let transport = IsoTcpTransport::new(endpoint, rack, slot);
        Self::with_transport(params, Box::new(transport))
    }

    /// Build a driver with an injected transport.
    pub fn with_transport(params: DriverParams, transport: Box<dyn S7Transport>) -> Result<Self> {
        let (endpoint, rack, slot, interval_ms) = parse_url(&params.raw_url)?;

        let mut tags = HashMap::with_capacity(params.tags.len());
        for mut tag in params.tags {
            match parse_address(&tag.address) {
                Ok(addr) => {
                    tag.parsed = true;
                    tag.meta = TagMeta::S7(addr);
                }
                Err(e) => {
                    // logged once; the tag stays excluded from I/O
                    warn!(driver = %params.id, tag = %tag.name, address = %tag.address,
                          error = %e, "address parse error, tag excluded");
                    tag.parsed = false;
                    tag.meta = TagMeta::None;
                }
            }
            tags.insert(tag.name.clone(), tag);
        }

        let initial: Vec<Tag> = sorted_tags(&tags);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(initial));
        let (msg_tx, msg_rx) = mpsc::channel(QUEUE_DEPTH);

        Ok(Self {
            shared: Arc::new(Shared {
                id: params.id,
                raw_url: params.raw_url,
                interval_ms: AtomicU64::new(interval_ms),
                io: Mutex::new(S7Io { transport, tags }),
                link: StdMutex::new(LinkState::default()),
                fail_count: AtomicU32::new(0),
                snapshot_tx,
                sink: params.sink,
            }),
            name: params.name,
            endpoint,
            rack,
            slot,
            msg_tx,
            msg_rx: StdMutex::new(Some(msg_rx)),
            task: StdMutex::new(None),
            started: AtomicBool::new(false),
            snapshot_rx,
        })
    }

    fn send_error() -> AgentError {
        AgentError::write("driver loop is not running")
    }
}

/// Extract endpoint, rack, slot and poll interval from the driver URL.
fn parse_url(raw_url: &str) -> Result<(String, u8, u8, u64)> {
    let url = Url::parse(raw_url)
        .map_err(|e| AgentError::Config(format!("invalid driver URL {}: {}", raw_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| AgentError::Config(format!("driver URL {} has no host", raw_url)))?;
    let endpoint = format!("{}:{}", host, url.port().unwrap_or(DEFAULT_PORT));

    let mut rack = 0u8;
    let mut slot = 1u8;
    let mut interval_ms = DEFAULT_INTERVAL_MS;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "rack" => rack = value.parse().unwrap_or(rack),
            "slot" => slot = value.parse().unwrap_or(slot),
            "interval" => interval_ms = value.parse().unwrap_or(interval_ms),
            _ => {}
        }
    }
    Ok((endpoint, rack, slot, interval_ms.max(1)))
}

fn sorted_tags(tags: &HashMap<String, Tag>) -> Vec<Tag> {
    let mut all: Vec<Tag> = tags.values().cloned().collect();
    all.sort_by(|a, b| a.name.cmp(&b.name));
    all
}

impl Shared {
    /// Reconnect when disconnected or when the last successful contact is
    /// stale. Called with the I/O lock held, which serializes connection
    /// attempts between the read and write paths.
    async fn reconnect_if_needed(&self, io: &mut S7Io) -> Result<()> {
        let fresh = {
            let link = self.link.lock().unwrap();
            link.connected
                && link
                    .last_ping
                    .is_some_and(|at| at.elapsed() <= STALE_AFTER)
        };
        if fresh {
            return Ok(());
        }

        io.transport.close().await;
        match io.transport.open().await {
            Ok(()) => {
                let mut link = self.link.lock().unwrap();
                link.connected = true;
                link.last_ping = Some(Instant::now());
                link.last_contact = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                self.link.lock().unwrap().connected = false;
                Err(e)
            }
        }
    }

    /// Record a successful device contact.
    fn touch(&self) {
        let mut link = self.link.lock().unwrap();
        link.last_ping = Some(Instant::now());
        link.last_contact = Some(Utc::now());
    }

    /// Read every parsed tag once, updating tag state in place.
    ///
    /// Per-tag failures do not abort the batch. A connection-level failure
    /// aborts the cycle and leaves tag state untouched.
    async fn read_cycle(&self, io: &mut S7Io) -> Result<(HashMap<String, Value>, usize)> {
        self.reconnect_if_needed(io).await?;

        let now = Utc::now();
        let mut values = HashMap::new();
        let mut errors = 0usize;

        let S7Io { transport, tags } = io;
        for tag in tags.values_mut() {
            if !tag.parsed {
                continue;
            }
            let addr = match tag.meta.as_s7() {
                Some(addr) => *addr,
                None => continue,
            };

            let mut buf = vec![0u8; addr.length];
            let outcome = match transport
                .read_area(addr.area, addr.db_number, addr.start, &mut buf)
                .await
            {
                Ok(()) => codec::decode(&buf, tag.datatype, addr.bit, addr.length),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => {
                    tag.mark_good(value.clone(), now);
                    values.insert(tag.name.clone(), value);
                }
                Err(e) => {
                    debug!(driver = %self.id, tag = %tag.name, error = %e, "tag read failed");
                    tag.mark_bad(now);
                    values.insert(tag.name.clone(), Value::Null);
                    errors += 1;
                }
            }
        }

        if errors == 0 {
            self.touch();
        }
        Ok((values, errors))
    }

    /// One full poll tick: read cycle, outage bookkeeping, reporting and
    /// snapshot publication.
    async fn poll_tick(&self) -> Cycle {
        let mut io = self.io.lock().await;
        let ts = Utc::now();

        let cycle = match self.read_cycle(&mut io).await {
            Ok((_, 0)) => {
                self.fail_count.store(0, Ordering::SeqCst);
                Cycle::Clean
            }
            Ok((_, errors)) => {
                self.fail_count.fetch_add(1, Ordering::SeqCst);
                Cycle::Partial(errors)
            }
            Err(e) => {
                self.fail_count.fetch_add(1, Ordering::SeqCst);
                Cycle::Offline(e)
            }
        };

        // Device-level outage: individual results no longer count.
        if self.fail_count.load(Ordering::SeqCst) > FAIL_THRESHOLD {
            for tag in io.tags.values_mut() {
                tag.quality = crate::core::quality::Quality::Bad;
                tag.timestamp = Some(ts);
            }
        }

        self.report_all(&io, ts).await;
        self.publish_snapshot(&io);
        cycle
    }

    /// Report every tag's current state to the realtime sink,
    /// unconditionally; failures are logged, not retried.
    async fn report_all(&self, io: &S7Io, cycle_ts: DateTime<Utc>) {
        for tag in io.tags.values() {
            let ts = tag.timestamp.unwrap_or(cycle_ts);
            if let Err(e) = self
                .sink
                .report(&self.id, &tag.name, &tag.value, tag.quality, ts)
                .await
            {
                warn!(driver = %self.id, tag = %tag.name, error = %e, "realtime report failed");
            }
        }
    }

    /// Publish an immutable tag snapshot for external readers.
    fn publish_snapshot(&self, io: &S7Io) {
        self.snapshot_tx.send_replace(Arc::new(sorted_tags(&io.tags)));
    }

    /// Execute one write on the device.
    async fn perform_write(&self, name: &str, value: &Value) -> Result<()> {
        let mut io = self.io.lock().await;

        let (addr, datatype) = {
            let tag = io
                .tags
                .get(name)
                .ok_or_else(|| AgentError::Write(format!("tag {} is not defined", name)))?;
            if !tag.parsed {
                return Err(AgentError::Write(format!(
                    "tag {} has an unparsed address",
                    name
                )));
            }
            if !tag.writable {
                return Err(AgentError::Write(format!("tag {} is read only", name)));
            }
            let addr = tag
                .meta
                .as_s7()
                .copied()
                .ok_or_else(|| AgentError::Write(format!("tag {} is not an s7 tag", name)))?;
            (addr, tag.datatype)
        };

        self.reconnect_if_needed(&mut io).await?;

        if datatype == DataType::Bool && addr.word_len == WordLen::Bit {
            self.write_bit(&mut io, &addr, value).await?;
        } else {
            check_writable_area(addr.area)?;
            let data = codec::encode(value, datatype, addr.length)?;
            io.transport
                .write_area(addr.area, addr.db_number, addr.start, &data)
                .await?;
        }

        self.touch();
        Ok(())
    }

    /// Bit write: read the containing byte, flip only the target bit and
    /// write the byte back, so sibling bits survive.
    async fn write_bit(&self, io: &mut S7Io, addr: &S7Address, value: &Value) -> Result<()> {
        check_writable_area(addr.area)?;
        let on = value
            .coerce(DataType::Bool)?
            .as_bool()
            .ok_or_else(|| AgentError::Write("expected a bool value".into()))?;

        let mut current = [0u8; 1];
        io.transport
            .read_area(addr.area, addr.db_number, addr.start, &mut current)
            .await?;
        let updated = [codec::set_bit(current[0], addr.bit, on)];
        io.transport
            .write_area(addr.area, addr.db_number, addr.start, &updated)
            .await
    }
}

/// Timer and counter areas are read-only from this driver.
fn check_writable_area(area: Area) -> Result<()> {
    match area {
        Area::DataBlock | Area::Memory | Area::Input | Area::Output => Ok(()),
        Area::Timer | Area::Counter => Err(AgentError::Write(format!(
            "writes not supported for area {:?}",
            area
        ))),
    }
}

/// The driver's background loop: one task multiplexing the poll timer and
/// the message queue.
async fn run_loop(shared: Arc<Shared>, mut rx: mpsc::Receiver<DriverMessage>) {
    let mut state = LoopState::Polling;
    let mut ticker = new_ticker(shared.interval_ms.load(Ordering::SeqCst));

    info!(driver = %shared.id, "polling loop started");

    while state != LoopState::Stopped {
        enum Event {
            Tick,
            Message(DriverMessage),
        }

        let event = tokio::select! {
            _ = ticker.tick() => Event::Tick,
            msg = rx.recv() => Event::Message(msg.unwrap_or(DriverMessage::Stop)),
        };

        match event {
            Event::Tick => match shared.poll_tick().await {
                cycle @ (Cycle::Clean | Cycle::Partial(_)) => {
                    if let Cycle::Partial(errors) = cycle {
                        trace!(driver = %shared.id, errors, "poll cycle had tag errors");
                    }
                    if state == LoopState::Reconnecting {
                        info!(driver = %shared.id, "device connection restored");
                    }
                    state = LoopState::Polling;
                }
                Cycle::Offline(e) => {
                    if state == LoopState::Polling {
                        warn!(driver = %shared.id, error = %e, "device unreachable, retrying each cycle");
                    }
                    state = LoopState::Reconnecting;
                }
            },
            Event::Message(DriverMessage::Stop) => {
                state = LoopState::Stopped;
            }
            Event::Message(DriverMessage::Reconfig) => {
                if let Ok((_, _, _, interval_ms)) = parse_url(&shared.raw_url) {
                    shared.interval_ms.store(interval_ms, Ordering::SeqCst);
                    ticker = new_ticker(interval_ms);
                    info!(driver = %shared.id, interval_ms, "poll interval reconfigured");
                }
            }
            Event::Message(DriverMessage::Write { tag, value, reply }) => {
                trace!(driver = %shared.id, tag = %tag, "processing write request");
                let result = shared.perform_write(&tag, &value).await;
                // the caller may have given up; that is not our problem
                let _ = reply.send(result);
            }
        }
    }

    debug!(driver = %shared.id, "polling loop exited");
}

/// Periodic timer that waits one full interval before the first tick and
/// skips missed ticks instead of bursting.
fn new_ticker(interval_ms: u64) -> tokio::time::Interval {
    let period = Duration::from_millis(interval_ms.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[async_trait]
impl DeviceDriver for S7Driver {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &'static str {
        "s7"
    }

    async fn connect(&self) -> Result<()> {
        let mut io = self.shared.io.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        io.transport.open().await?;
        drop(io);
        self.shared.touch();
        self.shared.link.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut io = self.shared.io.lock().await;
        io.transport.close().await;
        self.shared.link.lock().unwrap().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.link.lock().unwrap().connected
    }

    async fn read(&self) -> Result<HashMap<String, Value>> {
        let mut io = self.shared.io.lock().await;
        let (values, _) = self.shared.read_cycle(&mut io).await?;
        self.shared.publish_snapshot(&io);
        Ok(values)
    }

    async fn write(&self, tag: &str, value: Value) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Self::send_error());
        }
        let (reply, rx) = oneshot::channel();
        self.msg_tx
            .send(DriverMessage::Write {
                tag: tag.to_string(),
                value,
                reply,
            })
            .await
            .map_err(|_| Self::send_error())?;
        rx.await.map_err(|_| Self::send_error())?
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AgentError::Config(format!(
                "driver {} already started",
                self.shared.id
            )));
        }
        let rx = self
            .msg_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AgentError::Config("driver cannot be restarted".into()))?;
        let handle = tokio::spawn(run_loop(self.shared.clone(), rx));
        *self.task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let handle = self.task.lock().unwrap().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        let _ = self.msg_tx.send(DriverMessage::Stop).await;
        let _ = handle.await;
        Ok(())
    }

    async fn reconfig(&self) -> Result<()> {
        self.msg_tx
            .send(DriverMessage::Reconfig)
            .await
            .map_err(|_| Self::send_error())
    }

    fn tags(&self) -> Arc<Vec<Tag>> {
        self.snapshot_rx.borrow().clone()
    }

    fn status(&self) -> DriverStatus {
        let (connected, last_contact) = {
            let link = self.shared.link.lock().unwrap();
            (link.connected, link.last_contact)
        };
        DriverStatus {
            id: self.shared.id.clone(),
            name: self.name.clone(),
            protocol: "s7".to_string(),
            connected,
            fail_count: self.shared.fail_count.load(Ordering::SeqCst),
            tag_count: self.snapshot_rx.borrow().len(),
            last_contact,
            extra: serde_json::json!({
                "endpoint": self.endpoint,
                "rack": self.rack,
                "slot": self.slot,
                "interval_ms": self.shared.interval_ms.load(Ordering::SeqCst),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quality::Quality;
    use crate::store::MemorySink;

    /// In-memory device image standing in for a PLC.
    #[derive(Clone, Default)]
    struct MockDevice {
        areas: Arc<StdMutex<HashMap<(u8, u16), Vec<u8>>>>,
        open_count: Arc<AtomicU32>,
        read_count: Arc<AtomicU32>,
        fail_connect: Arc<AtomicBool>,
        write_log: Arc<StdMutex<Vec<String>>>,
        write_delay: Option<Duration>,
    }

    impl MockDevice {
        fn with_area(self, area: Area, db: u16, bytes: Vec<u8>) -> Self {
            self.areas.lock().unwrap().insert((area.code(), db), bytes);
            self
        }

        fn area_bytes(&self, area: Area, db: u16) -> Vec<u8> {
            self.areas.lock().unwrap()[&(area.code(), db)].clone()
        }
    }

    #[async_trait]
    impl S7Transport for MockDevice {
        async fn open(&mut self) -> Result<()> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(AgentError::Connection("mock device offline".into()));
            }
            self.open_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) {}

        async fn read_area(
            &mut self,
            area: Area,
            db: u16,
            start: usize,
            buf: &mut [u8],
        ) -> Result<()> {
            self.read_count.fetch_add(1, Ordering::SeqCst);
            let areas = self.areas.lock().unwrap();
            let bytes = areas
                .get(&(area.code(), db))
                .ok_or_else(|| AgentError::Protocol("object does not exist".into()))?;
            if start + buf.len() > bytes.len() {
                return Err(AgentError::Protocol("address out of range".into()));
            }
            buf.copy_from_slice(&bytes[start..start + buf.len()]);
            Ok(())
        }

        async fn write_area(
            &mut self,
            area: Area,
            db: u16,
            start: usize,
            data: &[u8],
        ) -> Result<()> {
            self.write_log
                .lock()
                .unwrap()
                .push(format!("begin {}:{}", area.code(), start));
            if let Some(delay) = self.write_delay {
                tokio::time::sleep(delay).await;
            }
            {
                let mut areas = self.areas.lock().unwrap();
                let bytes = areas
                    .get_mut(&(area.code(), db))
                    .ok_or_else(|| AgentError::Protocol("object does not exist".into()))?;
                if start + data.len() > bytes.len() {
                    return Err(AgentError::Protocol("address out of range".into()));
                }
                bytes[start..start + data.len()].copy_from_slice(data);
            }
            self.write_log
                .lock()
                .unwrap()
                .push(format!("end {}:{}", area.code(), start));
            Ok(())
        }
    }

    fn make_driver(tags: Vec<Tag>, device: MockDevice, url: &str) -> S7Driver {
        let params = DriverParams {
            id: "plc1".to_string(),
            name: "test plc".to_string(),
            raw_url: url.to_string(),
            tags,
            sink: Arc::new(MemorySink::new()),
        };
        S7Driver::with_transport(params, Box::new(device)).unwrap()
    }

    fn tag(name: &str, address: &str, datatype: DataType) -> Tag {
        Tag::new(name, address, datatype).with_writable(true)
    }

    #[tokio::test]
    async fn test_read_cycle_decodes_tags() {
        // DB1: word 0x0102 at 0, bit 3 of byte 2 set
        let device = MockDevice::default().with_area(
            Area::DataBlock,
            1,
            vec![0x01, 0x02, 0b0000_1000, 0x00],
        );
        let driver = make_driver(
            vec![
                tag("speed", "DB1.DBW0", DataType::UInt16),
                tag("running", "DB1.DBX2.3", DataType::Bool),
                tag("broken", "not-an-address", DataType::Bool),
            ],
            device,
            "s7://10.0.0.1",
        );

        let values = driver.read().await.unwrap();
        assert_eq!(values["speed"], Value::UInt16(0x0102));
        assert_eq!(values["running"], Value::Bool(true));
        // unparsed tags never reach the device
        assert!(!values.contains_key("broken"));

        let tags = driver.tags();
        let speed = tags.iter().find(|t| t.name == "speed").unwrap();
        assert_eq!(speed.quality, Quality::Good);
        let broken = tags.iter().find(|t| t.name == "broken").unwrap();
        assert!(!broken.parsed);
        assert_eq!(broken.quality, Quality::Uncertain);
    }

    #[tokio::test]
    async fn test_partial_failure_marks_only_that_tag() {
        let device =
            MockDevice::default().with_area(Area::DataBlock, 1, vec![0x00, 0x2A]);
        let driver = make_driver(
            vec![
                tag("ok", "DB1.DBW0", DataType::UInt16),
                tag("missing", "DB9.DBW0", DataType::UInt16),
            ],
            device,
            "s7://10.0.0.1",
        );

        let values = driver.read().await.unwrap();
        assert_eq!(values["ok"], Value::UInt16(42));
        assert_eq!(values["missing"], Value::Null);

        let tags = driver.tags();
        assert_eq!(
            tags.iter().find(|t| t.name == "ok").unwrap().quality,
            Quality::Good
        );
        assert_eq!(
            tags.iter().find(|t| t.name == "missing").unwrap().quality,
            Quality::Bad
        );
    }

    #[tokio::test]
    async fn test_outage_forces_all_tags_bad() {
        // "good" decodes fine every cycle; "missing" fails every cycle
        let device = MockDevice::default().with_area(Area::DataBlock, 1, vec![0x00, 0x01]);
        let driver = make_driver(
            vec![
                tag("good", "DB1.DBW0", DataType::UInt16),
                tag("missing", "DB9.DBW0", DataType::UInt16),
            ],
            device,
            "s7://10.0.0.1",
        );

        for cycle in 1..=5 {
            driver.shared.poll_tick().await;
            let tags = driver.tags();
            let good = tags.iter().find(|t| t.name == "good").unwrap();
            assert_eq!(good.quality, Quality::Good, "cycle {}", cycle);
        }

        // 6th consecutive failed cycle crosses the threshold
        driver.shared.poll_tick().await;
        let tags = driver.tags();
        for t in tags.iter() {
            assert_eq!(t.quality, Quality::Bad, "tag {}", t.name);
        }

        // one clean cycle resets the counter and recovers quality
        driver
            .shared
            .io
            .lock()
            .await
            .tags
            .remove("missing");
        driver.shared.poll_tick().await;
        assert_eq!(driver.shared.fail_count.load(Ordering::SeqCst), 0);
        let tags = driver.tags();
        assert_eq!(
            tags.iter().find(|t| t.name == "good").unwrap().quality,
            Quality::Good
        );
    }

    #[tokio::test]
    async fn test_offline_device_keeps_stale_state_until_threshold() {
        let device = MockDevice::default().with_area(Area::DataBlock, 1, vec![0x00, 0x07]);
        let fail_connect = device.fail_connect.clone();
        let driver = make_driver(
            vec![tag("v", "DB1.DBW0", DataType::UInt16)],
            device,
            "s7://10.0.0.1",
        );

        driver.shared.poll_tick().await;
        assert_eq!(
            driver.tags()[0].quality,
            Quality::Good
        );

        // device drops; stale value keeps its quality until the threshold
        fail_connect.store(true, Ordering::SeqCst);
        // make the link stale so each cycle attempts (and fails) a reconnect
        driver.shared.link.lock().unwrap().last_ping =
            Instant::now().checked_sub(Duration::from_secs(6));

        for _ in 0..5 {
            driver.shared.poll_tick().await;
        }
        assert_eq!(driver.tags()[0].quality, Quality::Good);
        driver.shared.poll_tick().await;
        assert_eq!(driver.tags()[0].quality, Quality::Bad);
        assert_eq!(driver.tags()[0].value, Value::UInt16(7));
    }

    #[tokio::test]
    async fn test_bit_write_preserves_sibling_bits() {
        let device = MockDevice::default().with_area(Area::Output, 0, vec![0; 6]);
        {
            device.areas.lock().unwrap().get_mut(&(0x82, 0)).unwrap()[5] = 0b1011_0000;
        }
        let driver = make_driver(
            vec![tag("out", "Q5.0", DataType::Bool), tag("out5", "Q5.5", DataType::Bool)],
            device.clone(),
            "s7://10.0.0.1",
        );
        driver.start().await.unwrap();

        driver.write("out", Value::Bool(true)).await.unwrap();
        assert_eq!(device.area_bytes(Area::Output, 0)[5], 0b1011_0001);

        driver.write("out5", Value::Bool(false)).await.unwrap();
        assert_eq!(device.area_bytes(Area::Output, 0)[5], 0b1001_0001);

        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_rejections() {
        let device = MockDevice::default().with_area(Area::DataBlock, 1, vec![0; 4]);
        let mut readonly = tag("ro", "DB1.DBW0", DataType::UInt16);
        readonly.writable = false;
        let driver = make_driver(
            vec![readonly, tag("t", "T5", DataType::UInt16)],
            device,
            "s7://10.0.0.1",
        );
        driver.start().await.unwrap();

        let err = driver.write("ro", Value::UInt16(1)).await.unwrap_err();
        assert!(matches!(err, AgentError::Write(msg) if msg.contains("read only")));

        let err = driver.write("nope", Value::UInt16(1)).await.unwrap_err();
        assert!(matches!(err, AgentError::Write(msg) if msg.contains("not defined")));

        // timer area is read-only
        let err = driver.write("t", Value::UInt16(1)).await.unwrap_err();
        assert!(matches!(err, AgentError::Write(_)));

        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_writes_serialize() {
        let device = MockDevice {
            write_delay: Some(Duration::from_millis(30)),
            ..MockDevice::default()
        }
        .with_area(Area::DataBlock, 1, vec![0; 8]);
        let log = device.write_log.clone();
        let driver = Arc::new(make_driver(
            vec![
                tag("a", "DB1.DBW0", DataType::UInt16),
                tag("b", "DB1.DBW2", DataType::UInt16),
            ],
            device,
            "s7://10.0.0.1?interval=60000",
        ));
        driver.start().await.unwrap();

        let d1 = driver.clone();
        let d2 = driver.clone();
        let w1 = tokio::spawn(async move { d1.write("a", Value::UInt16(1)).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let w2 = tokio::spawn(async move { d2.write("b", Value::UInt16(2)).await });

        w1.await.unwrap().unwrap();
        w2.await.unwrap().unwrap();
        driver.stop().await.unwrap();

        // the second write only begins after the first completed
        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "begin 132:0".to_string(),
                "end 132:0".to_string(),
                "begin 132:2".to_string(),
                "end 132:2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_halts_device_io() {
        let device = MockDevice::default().with_area(Area::DataBlock, 1, vec![0; 2]);
        let read_count = device.read_count.clone();
        let driver = make_driver(
            vec![tag("v", "DB1.DBW0", DataType::UInt16)],
            device,
            "s7://10.0.0.1?interval=10",
        );

        driver.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        driver.stop().await.unwrap();

        let after_stop = read_count.load(Ordering::SeqCst);
        assert!(after_stop > 0, "loop never polled");

        // no further device I/O within a polling interval's grace period
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(read_count.load(Ordering::SeqCst), after_stop);

        // a second stop is a no-op
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let device = MockDevice::default();
        let driver = make_driver(vec![], device, "s7://10.0.0.1?interval=60000");
        driver.start().await.unwrap();
        assert!(driver.start().await.is_err());
        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_link_reconnects_lazily() {
        let device = MockDevice::default().with_area(Area::DataBlock, 1, vec![0; 2]);
        let open_count = device.open_count.clone();
        let driver = make_driver(
            vec![tag("v", "DB1.DBW0", DataType::UInt16)],
            device,
            "s7://10.0.0.1",
        );

        driver.read().await.unwrap();
        assert_eq!(open_count.load(Ordering::SeqCst), 1);

        // fresh link: no reconnect on the next read
        driver.read().await.unwrap();
        assert_eq!(open_count.load(Ordering::SeqCst), 1);

        // stale link: reconnect before the read
        driver.shared.link.lock().unwrap().last_ping =
            Instant::now().checked_sub(Duration::from_secs(6));
        driver.read().await.unwrap();
        assert_eq!(open_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_and_reconfig() {
        let device = MockDevice::default().with_area(Area::DataBlock, 1, vec![0; 2]);
        let driver = make_driver(
            vec![tag("v", "DB1.DBW0", DataType::UInt16)],
            device,
            "s7://10.0.0.1:1102?rack=2&slot=0&interval=10",
        );

        let status = driver.status();
        assert_eq!(status.id, "plc1");
        assert_eq!(status.protocol, "s7");
        assert!(!status.connected);
        assert_eq!(status.tag_count, 1);
        assert_eq!(status.extra["endpoint"], "10.0.0.1:1102");
        assert_eq!(status.extra["rack"], 2);

        driver.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // loop keeps polling across a reconfig
        driver.reconfig().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let status = driver.status();
        assert!(status.connected);
        assert!(status.last_contact.is_some());
        assert_eq!(status.fail_count, 0);

        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_url_parameters() {
        let (endpoint, rack, slot, interval) =
            parse_url("s7://192.168.0.5?rack=2&slot=0&interval=250").unwrap();
        assert_eq!(endpoint, "192.168.0.5:102");
        assert_eq!((rack, slot), (2, 0));
        assert_eq!(interval, 250);

        let (endpoint, rack, slot, interval) = parse_url("s7://192.168.0.5:1102").unwrap();
        assert_eq!(endpoint, "192.168.0.5:1102");
        assert_eq!((rack, slot), (0, 1));
        assert_eq!(interval, 1000);

        assert!(parse_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_write_string_tag() {
        let device = MockDevice::default().with_area(Area::DataBlock, 2, vec![0; 32]);
        let driver = make_driver(
            vec![tag("label", "DB2.STRING4(10)", DataType::String)],
            device.clone(),
            "s7://10.0.0.1",
        );
        driver.start().await.unwrap();

        driver
            .write("label", Value::String("pump".into()))
            .await
            .unwrap();
        driver.stop().await.unwrap();

        let bytes = device.area_bytes(Area::DataBlock, 2);
        assert_eq!(&bytes[4..10], &[10, 4, b'p', b'u', b'm', b'p']);

        // and the driver reads it back through the codec
        let values = driver.read().await.unwrap();
        assert_eq!(values["label"], Value::String("pump".into()));
    }
}
