//! # Connection Management Module
//!
//! Owns the Bluetooth adapter and the single connected peripheral. Scan,
//! connect and disconnect requests arrive as commands; status goes back out
//! as `ConnectionEvent`s.
//!
//! ## Key Components
//! - `ConnectionManager`: Runs the command loop on a dedicated thread with its own Tokio runtime
//! - `ConnectionCommand`: Requests from the terminal front-end or the C bridge
//! - `ConnectionEvent`: Status updates for whoever holds the event receiver
//! - `Link`: Shared adapter, scan lock, and connected-peripheral slot
//!
//! At most one peripheral is connected at a time: a new connect tears down
//! the previous link, and a pending connect is cancelled through its stop
//! flag when a newer command arrives.

use crate::config::Config;
use crate::device::{same_identifier, DiscoveredDevice};
use crate::device_scanner;
use crate::error::{ConnectionError, ScanError};
use crate::gatt::{self, ServiceSummary};
use crate::session::ScanSession;
use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use futures::stream::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard, OnceCell, RwLock};

/// Progress of a scan request, as reported to whoever asked for it
#[derive(Debug, Clone)]
pub enum ScanProgress {
    /// The scan owns the adapter; its window starts now
    Started,
    Finished(Result<Vec<DiscoveredDevice>, ScanError>),
}

pub type ScanReply = Sender<ScanProgress>;

/// Block until a requested scan reports its results.
///
/// A scan may queue behind another one holding the adapter, so `queue_wait`
/// bounds the wait for it to start and `window_wait` bounds the wait for
/// results once it has.
pub fn await_scan(
    progress: &Receiver<ScanProgress>,
    queue_wait: Duration,
    window_wait: Duration,
) -> Result<Vec<DiscoveredDevice>, ScanError> {
    let mut deadline = Instant::now() + queue_wait;
    loop {
        match progress.recv_deadline(deadline) {
            Ok(ScanProgress::Started) => deadline = Instant::now() + window_wait,
            Ok(ScanProgress::Finished(result)) => return result,
            Err(RecvTimeoutError::Timeout) => return Err(ScanError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => return Err(ScanError::WorkerUnavailable),
        }
    }
}

/// Take the scan lock, then tell the requester its window has started
async fn claim_scan<'a>(lock: &'a Mutex<()>, reply: Option<&ScanReply>) -> MutexGuard<'a, ()> {
    let guard = lock.lock().await;
    if let Some(reply) = reply {
        let _ = reply.send(ScanProgress::Started);
    }
    guard
}

/// Outcome of putting a freshly connected peripheral into the connected slot
#[derive(Debug, PartialEq, Eq)]
enum SlotClaim<P> {
    /// The slot now holds the candidate; `previous` must be torn down
    Claimed { previous: Option<P> },
    /// A newer command cancelled this attempt; the candidate is handed back
    Cancelled(P),
}

/// Check the stop flag and fill the slot in one step, under the caller's write guard
fn claim_slot<P>(slot: &mut Option<P>, candidate: P, should_stop: &AtomicBool) -> SlotClaim<P> {
    if should_stop.load(Ordering::Relaxed) {
        return SlotClaim::Cancelled(candidate);
    }
    SlotClaim::Claimed {
        previous: slot.replace(candidate),
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionCommand {
    /// Scan for `window`; results go to `reply` when one is given
    Scan {
        window: Duration,
        reply: Option<ScanReply>,
    },
    Connect(String),
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ScanCompleted(Vec<DiscoveredDevice>),
    Connected { device_id: String },
    ServicesDiscovered { device_id: String, services: Vec<ServiceSummary> },
    ConnectionFailed { device_id: String, reason: String },
    Disconnected { device_id: String },
    Error(String),
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::ScanCompleted(devices) => {
                write!(f, "Scan complete: {} device(s)", devices.len())?;
                for device in devices {
                    write!(f, "\n  {} ({})", device.name, device.id)?;
                    if let Some(rssi) = device.rssi {
                        write!(f, " RSSI {} dBm", rssi)?;
                    }
                }
                Ok(())
            }
            ConnectionEvent::Connected { device_id } => {
                write!(f, "Connected to {}", device_id)
            }
            ConnectionEvent::ServicesDiscovered { device_id, services } => {
                write!(f, "{} exposes {} service(s)", device_id, services.len())?;
                for service in services {
                    write!(f, "\n  service {}", service.uuid)?;
                    for characteristic in &service.characteristics {
                        write!(f, "\n    characteristic {}", characteristic.uuid)?;
                        if let Some(value) = &characteristic.value {
                            write!(f, " = {}", gatt::format_value(value))?;
                        }
                    }
                }
                Ok(())
            }
            ConnectionEvent::ConnectionFailed { device_id, reason } => {
                write!(f, "Failed to connect to {}: {}", device_id, reason)
            }
            ConnectionEvent::Disconnected { device_id } => {
                write!(f, "Disconnected from {}", device_id)
            }
            ConnectionEvent::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Manages the Bluetooth adapter and the connection lifecycle.
///
/// Runs in a dedicated thread with its own Tokio runtime so synchronous
/// callers never have to host an async executor. Every command is spawned
/// as a task, which keeps a disconnect responsive while a connect is still
/// searching for its target.
pub struct ConnectionManager {
    config: Config,
    command_receiver: Receiver<ConnectionCommand>,
    event_sender: Sender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Creates a new ConnectionManager.
    ///
    /// Returns the manager and a sender for issuing commands to it.
    pub fn new(config: Config, event_sender: Sender<ConnectionEvent>) -> (Self, Sender<ConnectionCommand>) {
        let (command_sender, command_receiver) = unbounded();

        let manager = ConnectionManager {
            config,
            command_receiver,
            event_sender,
        };

        (manager, command_sender)
    }

    /// Runs the command loop.
    ///
    /// This should be called in a spawned thread. It blocks until every
    /// command sender has been dropped, then disconnects whatever is still
    /// connected.
    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = ConnectionError::RuntimeCreation(e.to_string());
                log::error!("{}", error);
                let _ = self.event_sender.send(ConnectionEvent::Error(error.to_string()));
                return;
            }
        };

        let link = Arc::new(Link::new(self.config, self.event_sender));
        let mut stop_flag: Option<Arc<AtomicBool>> = None;

        while let Ok(command) = self.command_receiver.recv() {
            match command {
                ConnectionCommand::Scan { window, reply } => {
                    log::info!("Connection manager: Scan requested ({}s)", window.as_secs());
                    let link = link.clone();
                    rt.spawn(async move {
                        let result = link.scan(window, reply.as_ref()).await;
                        match &result {
                            Ok(devices) => link.emit(ConnectionEvent::ScanCompleted(devices.clone())),
                            Err(e) => {
                                log::error!("{}", e);
                                link.emit(ConnectionEvent::Error(e.to_string()));
                            }
                        }
                        if let Some(reply) = reply {
                            // Caller may have given up waiting
                            let _ = reply.send(ScanProgress::Finished(result));
                        }
                    });
                }
                ConnectionCommand::Connect(device_id) => {
                    log::info!("Connection manager: Connecting to device: {}", device_id);

                    // A newer connect supersedes whatever is still pending
                    if let Some(flag) = stop_flag.take() {
                        flag.store(true, Ordering::Relaxed);
                    }
                    let should_stop = Arc::new(AtomicBool::new(false));
                    stop_flag = Some(should_stop.clone());

                    let link = link.clone();
                    rt.spawn(async move {
                        if let Err(error) = link.connect(&device_id, should_stop).await {
                            log::error!("{}", error);
                            link.emit(ConnectionEvent::ConnectionFailed {
                                device_id,
                                reason: error.to_string(),
                            });
                        }
                    });
                }
                ConnectionCommand::Disconnect => {
                    log::info!("Connection manager: Disconnect requested");
                    if let Some(flag) = stop_flag.take() {
                        log::debug!("Connection manager: Setting stop flag");
                        flag.store(true, Ordering::Relaxed);
                    }
                    let link = link.clone();
                    rt.spawn(async move { link.disconnect().await });
                }
            }
        }

        log::info!("Connection manager: Command channel closed, shutting down");
        if let Some(flag) = stop_flag {
            flag.store(true, Ordering::Relaxed);
        }
        rt.block_on(link.disconnect());
    }
}

/// State shared by the tasks the manager spawns
struct Link {
    config: Config,
    events: Sender<ConnectionEvent>,
    adapter: OnceCell<Adapter>,
    /// Held for the duration of any scan on the adapter
    scan_lock: Mutex<()>,
    connected: RwLock<Option<Peripheral>>,
}

impl Link {
    fn new(config: Config, events: Sender<ConnectionEvent>) -> Self {
        Self {
            config,
            events,
            adapter: OnceCell::new(),
            scan_lock: Mutex::new(()),
            connected: RwLock::new(None),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Connection manager: No one is listening for events");
        }
    }

    /// Adapter handle, acquired on first use
    async fn adapter(self: &Arc<Self>) -> Result<Adapter, ScanError> {
        let adapter = self
            .adapter
            .get_or_try_init(|| async {
                let adapter = device_scanner::default_adapter().await?;
                tokio::spawn(Arc::clone(self).watch_disconnects(adapter.clone()));
                Ok::<_, ScanError>(adapter)
            })
            .await?;
        Ok(adapter.clone())
    }

    async fn scan(self: &Arc<Self>, window: Duration, reply: Option<&ScanReply>) -> Result<Vec<DiscoveredDevice>, ScanError> {
        let adapter = self.adapter().await?;
        let _guard = claim_scan(&self.scan_lock, reply).await;

        let mut session = ScanSession::with_config(window, &self.config);
        device_scanner::scan_devices(&adapter, &mut session).await?;
        Ok(session.finish())
    }

    async fn connect(self: &Arc<Self>, device_id: &str, should_stop: Arc<AtomicBool>) -> Result<(), ConnectionError> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(ConnectionError::InvalidIdentifier(device_id.to_string()));
        }

        let adapter = self.adapter().await.map_err(ConnectionError::Scan)?;

        if let Some(current) = self.connected.read().await.as_ref() {
            if same_identifier(&current.id().to_string(), device_id) && current.is_connected().await.unwrap_or(false) {
                log::info!("Already connected to {}", device_id);
                return Ok(());
            }
        }

        let peripheral = match device_scanner::known_peripheral(&adapter, device_id)
            .await
            .map_err(ConnectionError::Scan)?
        {
            Some(peripheral) => {
                log::info!("Found previously known peripheral {}. Connecting...", device_id);
                peripheral
            }
            None => {
                let _guard = claim_scan(&self.scan_lock, None).await;
                let timeout = self.config.connect_scan_timeout();
                match device_scanner::find_peripheral(&adapter, device_id, timeout, &should_stop)
                    .await
                    .map_err(ConnectionError::Scan)?
                {
                    Some(peripheral) => peripheral,
                    None if should_stop.load(Ordering::Relaxed) => return Err(ConnectionError::Interrupted),
                    None => {
                        return Err(ConnectionError::DeviceNotFound {
                            device_id: device_id.to_string(),
                        })
                    }
                }
            }
        };

        if should_stop.load(Ordering::Relaxed) {
            return Err(ConnectionError::Interrupted);
        }

        // Only one link at a time
        self.disconnect().await;

        peripheral
            .connect()
            .await
            .map_err(|e| ConnectionError::DeviceConnection {
                device_id: device_id.to_string(),
                reason: e.to_string(),
            })?;

        {
            let mut connected = self.connected.write().await;
            match claim_slot(&mut *connected, peripheral.clone(), &should_stop) {
                SlotClaim::Cancelled(peripheral) => {
                    drop(connected);
                    let _ = peripheral.disconnect().await;
                    return Err(ConnectionError::Interrupted);
                }
                SlotClaim::Claimed { previous: Some(previous) } => {
                    // A concurrent connect got in first; it goes, still under the guard
                    let previous_id = previous.id().to_string();
                    if !same_identifier(&previous_id, device_id) {
                        log::info!("Replacing connection to {}", previous_id);
                        if let Err(e) = previous.disconnect().await {
                            log::warn!("Disconnect from {} reported: {}", previous_id, e);
                        }
                        self.emit(ConnectionEvent::Disconnected { device_id: previous_id });
                    }
                }
                SlotClaim::Claimed { previous: None } => {}
            }
        }

        log::info!("Successfully connected to {}", device_id);
        self.emit(ConnectionEvent::Connected {
            device_id: device_id.to_string(),
        });

        let services = gatt::explore(&peripheral, device_id, &self.config).await?;
        self.emit(ConnectionEvent::ServicesDiscovered {
            device_id: device_id.to_string(),
            services,
        });

        tokio::spawn(gatt::log_notifications(peripheral, should_stop));
        Ok(())
    }

    async fn disconnect(&self) {
        let peripheral = self.connected.write().await.take();

        match peripheral {
            Some(peripheral) => {
                let device_id = peripheral.id().to_string();
                log::info!("Disconnecting from peripheral: {}", device_id);
                if let Err(e) = peripheral.disconnect().await {
                    log::warn!("Disconnect from {} reported: {}", device_id, e);
                }
                self.emit(ConnectionEvent::Disconnected { device_id });
            }
            None => log::info!("No connected peripheral to disconnect."),
        }
    }

    /// Clears the connected slot when the peripheral drops the link on its own
    async fn watch_disconnects(self: Arc<Self>, adapter: Adapter) {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                log::warn!("Cannot watch for disconnects: {}", e);
                return;
            }
        };

        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(id) = event {
                let mut connected = self.connected.write().await;
                let dropped = connected.as_ref().map(|p| p.id() == id).unwrap_or(false);
                if dropped {
                    *connected = None;
                    drop(connected);
                    log::info!("Peripheral {} disconnected", id);
                    self.emit(ConnectionEvent::Disconnected {
                        device_id: id.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_manager_creation() {
        let (event_sender, _event_receiver) = unbounded();
        let (_manager, command_sender) = ConnectionManager::new(Config::default(), event_sender);

        assert!(command_sender.send(ConnectionCommand::Disconnect).is_ok());
    }

    #[test]
    fn test_run_returns_when_senders_dropped() {
        let (event_sender, _event_receiver) = unbounded();
        let (manager, command_sender) = ConnectionManager::new(Config::default(), event_sender);
        drop(command_sender);

        // Nothing was ever connected, so shutdown needs no adapter
        let handle = std::thread::spawn(move || manager.run());
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_scan_event_display_lists_devices() {
        let event = ConnectionEvent::ScanCompleted(vec![
            DiscoveredDevice::new("AAAA".to_string(), "Sensor".to_string(), Some(-60)),
            DiscoveredDevice::new("BBBB".to_string(), "Unnamed".to_string(), None),
        ]);
        let text = event.to_string();
        assert!(text.starts_with("Scan complete: 2 device(s)"));
        assert!(text.contains("Sensor (AAAA) RSSI -60 dBm"));
        assert!(text.contains("Unnamed (BBBB)"));
    }

    #[test]
    fn test_services_event_display_shows_values() {
        let event = ConnectionEvent::ServicesDiscovered {
            device_id: "AAAA".to_string(),
            services: vec![ServiceSummary {
                uuid: "180d".to_string(),
                primary: true,
                characteristics: vec![gatt::CharacteristicSummary {
                    uuid: "2a37".to_string(),
                    readable: true,
                    notifiable: true,
                    subscribed: true,
                    value: Some(vec![0x06, 0x48]),
                }],
            }],
        };
        let text = event.to_string();
        assert!(text.contains("service 180d"));
        assert!(text.contains("characteristic 2a37 = <0648>"));
    }

    #[test]
    fn test_queued_scan_outlasts_window_wait() {
        let rt = Runtime::new().unwrap();
        let lock = Arc::new(Mutex::new(()));
        let held = rt.block_on(lock.clone().lock_owned());

        // The adapter stays busy well past the requester's window wait
        rt.spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            drop(held);
        });

        let (reply, progress) = unbounded();
        let queued = lock.clone();
        rt.spawn(async move {
            let _guard = claim_scan(&queued, Some(&reply)).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let devices = vec![DiscoveredDevice::new("AAAA".to_string(), "Sensor".to_string(), Some(-50))];
            let _ = reply.send(ScanProgress::Finished(Ok(devices)));
        });

        let devices = await_scan(&progress, Duration::from_secs(5), Duration::from_millis(200))
            .expect("queued scan should report once it runs");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "AAAA");
    }

    #[test]
    fn test_await_scan_gives_up_when_never_started() {
        let (_reply, progress) = unbounded::<ScanProgress>();
        let result = await_scan(&progress, Duration::from_millis(50), Duration::from_secs(1));
        assert!(matches!(result, Err(ScanError::TimedOut)));
    }

    #[test]
    fn test_await_scan_reports_worker_gone() {
        let (reply, progress) = unbounded::<ScanProgress>();
        drop(reply);
        let result = await_scan(&progress, Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(result, Err(ScanError::WorkerUnavailable)));
    }

    #[test]
    fn test_await_scan_passes_early_failure_through() {
        let (reply, progress) = unbounded();
        reply.send(ScanProgress::Finished(Err(ScanError::NoAdapters))).unwrap();
        let result = await_scan(&progress, Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(result, Err(ScanError::NoAdapters)));
    }

    #[test]
    fn test_claim_slot_keeps_one_occupant() {
        let should_stop = AtomicBool::new(false);
        let mut slot = None;

        assert_eq!(claim_slot(&mut slot, "first", &should_stop), SlotClaim::Claimed { previous: None });
        assert_eq!(
            claim_slot(&mut slot, "second", &should_stop),
            SlotClaim::Claimed { previous: Some("first") }
        );
        assert_eq!(slot, Some("second"));
    }

    #[test]
    fn test_claim_slot_cancelled_leaves_slot_alone() {
        let should_stop = AtomicBool::new(false);
        let mut slot = None;
        claim_slot(&mut slot, "first", &should_stop);

        should_stop.store(true, Ordering::Relaxed);
        assert_eq!(claim_slot(&mut slot, "late", &should_stop), SlotClaim::Cancelled("late"));
        assert_eq!(slot, Some("first"));
    }
}
