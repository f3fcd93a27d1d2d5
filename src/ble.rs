//! Bluetooth Low Energy transport built on `bluest`.
//!
//! JBD boards expose a vendor service `0xFF00` with a notify characteristic
//! `0xFF01` for responses and a write characteristic `0xFF02` for requests.
//!
//! # Example
//!
//! ```no_run
//! use jbdbms_lib::ble::BleTransport;
//! use jbdbms_lib::{Battery, BmsSession, SessionConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), jbdbms_lib::Error> {
//!     let address = "70:3E:97:EB:37:16";
//!     let transport = BleTransport::discover(address, Duration::from_secs(30)).await?;
//!     let mut session = BmsSession::new(transport, Battery::new(address), SessionConfig::default());
//!     session.read_once(1).await?;
//!     println!("{:?}", session.consumer());
//!     Ok(())
//! }
//! ```

use crate::transport::{NotificationHandler, Transport};
use crate::{Error, Result};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Service, Uuid};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

const SERVICE_ID: Uuid = Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb);
const NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);
const WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

pub struct BleTransport {
    adapter: Adapter,
    device: Device,
    write: Option<Characteristic>,
    notify: Option<Characteristic>,
    listener: Option<JoinHandle<()>>,
}

impl BleTransport {
    /// Scans for a device whose address or advertised name equals `address`.
    pub async fn discover(address: &str, scan_timeout: Duration) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| Error::transport("Default adapter not found"))?;
        adapter.wait_available().await.map_err(Error::transport)?;

        let device = tokio::time::timeout(scan_timeout, Self::discover_device(&adapter, address))
            .await
            .map_err(|_| Error::transport(format!("Device {address} not found")))??;

        Ok(Self {
            adapter,
            device,
            write: None,
            notify: None,
            listener: None,
        })
    }

    async fn discover_device(adapter: &Adapter, address: &str) -> Result<Device> {
        log::info!("Scanning for {address}");
        let mut adapter_events = adapter.scan(&[]).await.map_err(Error::transport)?;
        while let Some(found) = adapter_events.next().await {
            if Self::matches(&found.device, address).await {
                log::info!("Found {address} (rssi={:?})", found.rssi);
                return Ok(found.device);
            }
        }
        Err(Error::transport(format!("Device {address} not found")))
    }

    async fn matches(device: &Device, address: &str) -> bool {
        let wanted = address.to_uppercase();
        if format!("{:?}", device.id()).to_uppercase().contains(&wanted) {
            return true;
        }
        match device.name_async().await {
            Ok(name) => name.to_uppercase() == wanted,
            Err(_) => false,
        }
    }

    async fn characteristic(service: &Service, id: Uuid) -> Result<Characteristic> {
        service
            .discover_characteristics_with_uuid(id)
            .await
            .map_err(Error::transport)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::transport(format!("Characteristic {id} not found")))
    }

    fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<()> {
        self.adapter
            .connect_device(&self.device)
            .await
            .map_err(Error::transport)?;
        let service = self
            .device
            .discover_services_with_uuid(SERVICE_ID)
            .await
            .map_err(Error::transport)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::transport("The device does not offer the BMS service"))?;
        self.notify = Some(Self::characteristic(&service, NOTIFY_CHARACTERISTIC_ID).await?);
        self.write = Some(Self::characteristic(&service, WRITE_CHARACTERISTIC_ID).await?);
        log::info!("Connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop_listener();
        self.write = None;
        self.notify = None;
        self.adapter
            .disconnect_device(&self.device)
            .await
            .map_err(Error::transport)?;
        log::info!("Disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.notify.is_some() && self.device.is_connected().await
    }

    async fn subscribe_notifications(&mut self, handler: NotificationHandler) -> Result<()> {
        let notify = self
            .notify
            .clone()
            .ok_or_else(|| Error::transport("Not connected"))?;
        self.stop_listener();

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let listener = tokio::spawn(async move {
            let mut notifications = match notify.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    notifications
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            while let Some(notification) = notifications.next().await {
                match notification {
                    Ok(data) => handler(&data),
                    Err(err) => {
                        log::warn!("Notification error: {err}");
                        break;
                    }
                }
            }
            log::debug!("End of notification stream");
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.listener = Some(listener);
                Ok(())
            }
            Ok(Err(err)) => Err(Error::transport(err)),
            Err(_) => Err(Error::transport("Notification listener stopped")),
        }
    }

    async fn unsubscribe_notifications(&mut self) -> Result<()> {
        self.stop_listener();
        Ok(())
    }

    async fn write_characteristic(&mut self, data: &[u8]) -> Result<()> {
        let write = self
            .write
            .as_ref()
            .ok_or_else(|| Error::transport("Not connected"))?;
        write
            .write_without_response(data)
            .await
            .map_err(Error::transport)
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
