use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::heart_rate::{HeartRate, HRM_UUID, HRS_UUID};
use crate::hub::{DeviceEvent, DeviceHub};

/// How long to look for a known address before giving up on this attempt.
const FIND_TIMEOUT: Duration = Duration::from_secs(5);
const FIND_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    pub address: String,
}

impl DiscoveredDevice {
    pub fn label(&self) -> String {
        format!(
            "{} ({})",
            self.name.as_deref().unwrap_or("Unknown"),
            self.address
        )
    }
}

fn hrs_filter() -> ScanFilter {
    ScanFilter {
        services: vec![HRS_UUID],
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

pub async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Scan for `delay` and return every peripheral advertising the Heart Rate Service.
pub async fn scan_devices(central: &Adapter, delay: Duration) -> Result<Vec<DiscoveredDevice>> {
    central.start_scan(hrs_filter()).await?;
    time::sleep(delay).await;
    let peripherals = central.peripherals().await?;
    central.stop_scan().await?;

    let mut devices = vec![];
    for p in peripherals {
        let Some(props) = p.properties().await? else {
            continue;
        };
        // Not every backend honours the scan filter.
        if !props.services.is_empty() && !props.services.contains(&HRS_UUID) {
            continue;
        }
        devices.push(DiscoveredDevice {
            name: props.local_name,
            address: p.address().to_string(),
        });
    }
    Ok(devices)
}

/// Parse a 1-based menu choice.
fn parse_choice(input: &str, count: usize) -> Option<usize> {
    let choice: usize = input.trim().parse().ok()?;
    (1..=count).contains(&choice).then(|| choice - 1)
}

/// Scan and let the user pick a device on stdin. A single result is
/// picked automatically; `None` when nothing was found or stdin closed.
pub async fn select_device(central: &Adapter, delay: Duration) -> Result<Option<String>> {
    tracing::info!("Scanning for devices with Heart Rate Service (HRS) supported");
    let devices = scan_devices(central, delay).await?;
    if devices.is_empty() {
        tracing::error!("No devices found");
        return Ok(None);
    }

    println!("Supported devices found:");
    for (i, device) in devices.iter().enumerate() {
        println!("{}: {}", i + 1, device.label());
    }

    if devices.len() == 1 {
        tracing::info!("Only one device found, automatically selecting it");
        return Ok(Some(devices[0].address.clone()));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Select a device by number: ");
        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };
        match parse_choice(&line, devices.len()) {
            Some(index) => return Ok(Some(devices[index].address.clone())),
            None => tracing::error!(input = %line.trim(), "Invalid choice"),
        }
    }
}

async fn find_peripheral(central: &Adapter, address: &str) -> Result<Peripheral> {
    central.start_scan(hrs_filter()).await?;
    let found = time::timeout(FIND_TIMEOUT, async {
        loop {
            for p in central.peripherals().await? {
                if p.address().to_string().eq_ignore_ascii_case(address) {
                    return Ok::<_, Error>(p);
                }
            }
            time::sleep(FIND_POLL).await;
        }
    })
    .await;
    if let Err(e) = central.stop_scan().await {
        tracing::warn!(error = %e, "Failed to stop scan");
    }

    settle_find(found.ok(), address)
}

/// Outcome of a timed search; `None` means the timeout hit first.
fn settle_find<T>(found: Option<Result<T>>, address: &str) -> Result<T> {
    found.unwrap_or_else(|| Err(Error::DeviceNotFound(address.to_string())))
}

enum StreamEnd {
    Lost,
    Cancelled,
}

/// Keeps one device connected and publishes its measurements.
///
/// The background loop reconnects after `retry_interval` whenever the
/// connection attempt fails or the link drops, until
/// [`shutdown`](Self::shutdown) is called.
pub struct DeviceConnection {
    address: String,
    hub: Arc<DeviceHub>,
    cancel: CancellationToken,
    ready_rx: broadcast::Receiver<DeviceEvent>,
    task: JoinHandle<Result<()>>,
}

impl DeviceConnection {
    pub fn spawn(
        central: Adapter,
        address: String,
        retry_interval: Duration,
        hub: Arc<DeviceHub>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ready_rx = hub.subscribe();
        hub.mark_started();

        let task = tokio::spawn(run(
            central,
            address.clone(),
            retry_interval,
            Arc::clone(&hub),
            cancel.clone(),
        ));

        Self {
            address,
            hub,
            cancel,
            ready_rx,
            task,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// `true` once the first measurement stream is up, `false` if the
    /// first attempt fails.
    pub async fn wait_ready(&mut self) -> bool {
        loop {
            match self.ready_rx.recv().await {
                Ok(DeviceEvent::Prepared) => return true,
                Ok(DeviceEvent::ConnectFailed(_)) => return false,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    }

    /// Tell subscribers, stop the loop, and disconnect the peripheral.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!(address = %self.address, "Shutting down device connection");
        self.hub.publish(DeviceEvent::ShuttingDown);
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Device task panicked");
                Ok(())
            }
        }
    }
}

/// Sleep for `delay`; `true` when cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = time::sleep(delay) => false,
    }
}

async fn run(
    central: Adapter,
    address: String,
    retry_interval: Duration,
    hub: Arc<DeviceHub>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tracing::info!(address = %address, "Connecting to device");
        hub.publish(DeviceEvent::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = connect(&central, &address) => result,
        };
        let peripheral = match connected {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "Connect failed");
                hub.publish(DeviceEvent::ConnectFailed(e.to_string()));
                if sleep_or_cancel(retry_interval, &cancel).await {
                    return Ok(());
                }
                continue;
            }
        };
        tracing::info!(address = %address, "Device connected");
        hub.publish(DeviceEvent::Connected);

        let result = stream_measurements(&central, &peripheral, &hub, &cancel).await;
        if let Err(e) = peripheral.disconnect().await {
            tracing::debug!(address = %address, error = %e, "Disconnect failed");
        }

        match result {
            Ok(StreamEnd::Cancelled) => return Ok(()),
            Ok(StreamEnd::Lost) => {
                tracing::error!(address = %address, "Connection lost");
                hub.publish(DeviceEvent::ConnectionLost);
            }
            Err(Error::MissingCharacteristic) => {
                hub.publish(DeviceEvent::ConnectFailed(
                    Error::MissingCharacteristic.to_string(),
                ));
                return Err(Error::MissingCharacteristic);
            }
            Err(e) => {
                tracing::error!(address = %address, error = %e, "Failed to start notifications");
                hub.publish(DeviceEvent::ConnectFailed(e.to_string()));
            }
        }

        if sleep_or_cancel(retry_interval, &cancel).await {
            return Ok(());
        }
    }
}

async fn connect(central: &Adapter, address: &str) -> Result<Peripheral> {
    let peripheral = find_peripheral(central, address).await?;
    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }
    Ok(peripheral)
}

async fn stream_measurements(
    central: &Adapter,
    peripheral: &Peripheral,
    hub: &DeviceHub,
    cancel: &CancellationToken,
) -> Result<StreamEnd> {
    let mut central_events = central.events().await?;
    peripheral.discover_services().await?;

    let hrm = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == HRM_UUID)
        .ok_or(Error::MissingCharacteristic)?;
    peripheral.subscribe(&hrm).await?;
    let mut notifications = peripheral.notifications().await?;

    tracing::info!("Started receiving data");
    hub.publish(DeviceEvent::Prepared);

    let id = peripheral.id();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            notification = notifications.next() => match notification {
                Some(n) if n.uuid == HRM_UUID => match HeartRate::new(&n.value) {
                    Ok(rate) => {
                        tracing::trace!(raw = %hex::encode(&n.value), bpm = rate.bpm(), "Measurement");
                        hub.publish(DeviceEvent::Data { rate, t: unix_now() });
                    }
                    Err(e) => {
                        tracing::warn!(raw = %hex::encode(&n.value), error = %e, "Bad measurement");
                    }
                },
                Some(_) => {}
                None => return Ok(StreamEnd::Lost),
            },
            event = central_events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(pid)) if pid == id => {
                    return Ok(StreamEnd::Lost);
                }
                Some(_) => {}
                None => return Ok(StreamEnd::Lost),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn choice_is_one_based_and_bounded() {
        assert_eq!(parse_choice("1", 3), Some(0));
        assert_eq!(parse_choice(" 3\n", 3), Some(2));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("two", 3), None);
        assert_eq!(parse_choice("", 3), None);
    }

    #[test]
    fn find_outcome_keeps_found_device() {
        assert_eq!(settle_find(Some(Ok(7)), "AA").unwrap(), 7);
        assert_matches!(
            settle_find::<u8>(None, "AA:BB"),
            Err(Error::DeviceNotFound(address)) if address == "AA:BB"
        );
        assert_matches!(
            settle_find::<u8>(Some(Err(Error::NoAdapter)), "AA"),
            Err(Error::NoAdapter)
        );
    }

    #[test]
    fn label_falls_back_to_unknown() {
        let device = DiscoveredDevice {
            name: None,
            address: "AA:BB:CC:DD:EE:FF".into(),
        };
        assert_eq!(device.label(), "Unknown (AA:BB:CC:DD:EE:FF)");

        let device = DiscoveredDevice {
            name: Some("MYZONE".into()),
            ..device
        };
        assert_eq!(device.label(), "MYZONE (AA:BB:CC:DD:EE:FF)");
    }
}
