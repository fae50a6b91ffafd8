use crate::metrics::record_registry_reconnect;
use crate::registry::error::{RegistryError, RegistryResult};
use crate::registry::types::{Device, RegistryConfig, RegistryMessage};
use crate::retry::LinearBackoff;
use backoff::backoff::Backoff;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One open text channel to the registry.
pub struct RegistryLink {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens connections to the registry service.
pub trait RegistryConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, RegistryResult<RegistryLink>>;
}

/// Cheap handle for talking to a running [`RegistryClient`].
#[derive(Clone)]
pub struct RegistryHandle {
    outbound: mpsc::UnboundedSender<RegistryMessage>,
    devices: Arc<RwLock<Vec<Device>>>,
}

impl RegistryHandle {
    /// Sender for room coordinators and other producers. Messages queued
    /// while disconnected go out after the next successful reconnect.
    pub fn sender(&self) -> mpsc::UnboundedSender<RegistryMessage> {
        self.outbound.clone()
    }

    pub fn send(&self, message: RegistryMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Other online devices, as of the latest `device-list`.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }
}

enum Disconnect {
    /// Every handle was dropped
    Shutdown,
    Lost,
}

/// Keeps this device registered with the registry.
///
/// Sends `register` on every (re)connect and a `heartbeat` on a fixed
/// interval, forwards everything the registry sends to the inbound channel,
/// and reconnects with a linearly growing delay. After
/// `max_reconnect_attempts` consecutive failures `run` returns
/// [`RegistryError::ReconnectExhausted`].
pub struct RegistryClient {
    config: RegistryConfig,
    device_id: String,
    device_name: String,
    connector: Arc<dyn RegistryConnector>,
    outbound: mpsc::UnboundedReceiver<RegistryMessage>,
    inbound: mpsc::UnboundedSender<RegistryMessage>,
    devices: Arc<RwLock<Vec<Device>>>,
    unsent: VecDeque<RegistryMessage>,
}

impl RegistryClient {
    pub fn new(
        config: RegistryConfig,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        connector: Arc<dyn RegistryConnector>,
    ) -> (
        Self,
        RegistryHandle,
        mpsc::UnboundedReceiver<RegistryMessage>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let devices = Arc::new(RwLock::new(Vec::new()));

        let client = Self {
            config,
            device_id: device_id.into(),
            device_name: device_name.into(),
            connector,
            outbound: outbound_rx,
            inbound: inbound_tx,
            devices: devices.clone(),
            unsent: VecDeque::new(),
        };
        let handle = RegistryHandle {
            outbound: outbound_tx,
            devices,
        };
        (client, handle, inbound_rx)
    }

    pub async fn run(mut self) -> RegistryResult<()> {
        let mut backoff = LinearBackoff::new(
            self.config.reconnect_delay,
            self.config.max_reconnect_attempts,
        );

        loop {
            let link = match self.connector.connect().await {
                Ok(link) => {
                    backoff.reset();
                    link
                }
                Err(e) => {
                    self.wait_before_reconnect(&mut backoff, &e.to_string())
                        .await?;
                    continue;
                }
            };

            info!(device_id = %self.device_id, "Connected to registry");
            match self.serve(link).await? {
                Disconnect::Shutdown => {
                    debug!(device_id = %self.device_id, "Registry client shutting down");
                    return Ok(());
                }
                Disconnect::Lost => {
                    self.wait_before_reconnect(&mut backoff, "connection lost")
                        .await?;
                }
            }
        }
    }

    async fn wait_before_reconnect(
        &self,
        backoff: &mut LinearBackoff,
        reason: &str,
    ) -> RegistryResult<()> {
        match backoff.next_backoff() {
            Some(delay) => {
                record_registry_reconnect(backoff.attempts());
                warn!(
                    attempt = backoff.attempts(),
                    max_attempts = backoff.max_attempts(),
                    reason,
                    "Registry unavailable, reconnecting in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => {
                error!(
                    attempts = backoff.max_attempts(),
                    reason, "Giving up on registry"
                );
                Err(RegistryError::ReconnectExhausted {
                    attempts: backoff.max_attempts(),
                })
            }
        }
    }

    async fn serve(&mut self, link: RegistryLink) -> RegistryResult<Disconnect> {
        let RegistryLink {
            outgoing,
            mut incoming,
        } = link;

        let register = RegistryMessage::Register {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
        };
        if outgoing.send(register.to_json()?).is_err() {
            return Ok(Disconnect::Lost);
        }
        while let Some(message) = self.unsent.pop_front() {
            if outgoing.send(message.to_json()?).is_err() {
                self.unsent.push_front(message);
                return Ok(Disconnect::Lost);
            }
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if outgoing.send(RegistryMessage::Heartbeat.to_json()?).is_err() {
                        return Ok(Disconnect::Lost);
                    }
                }
                message = self.outbound.recv() => {
                    let Some(message) = message else {
                        return Ok(Disconnect::Shutdown);
                    };
                    if outgoing.send(message.to_json()?).is_err() {
                        self.unsent.push_back(message);
                        return Ok(Disconnect::Lost);
                    }
                }
                text = incoming.recv() => {
                    let Some(text) = text else {
                        warn!(device_id = %self.device_id, "Registry connection closed");
                        return Ok(Disconnect::Lost);
                    };
                    self.handle_incoming(&text);
                }
            }
        }
    }

    fn handle_incoming(&self, text: &str) {
        let message = match RegistryMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed registry message");
                return;
            }
        };

        if let RegistryMessage::DeviceList { devices } = &message {
            let others: Vec<Device> = devices
                .iter()
                .filter(|d| d.id != self.device_id)
                .cloned()
                .collect();
            debug!(count = others.len(), "Device list updated");
            *self.devices.write() = others;
        }

        let _ = self.inbound.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Unreachable {
        attempts: AtomicU32,
    }

    impl RegistryConnector for Unreachable {
        fn connect(&self) -> BoxFuture<'_, RegistryResult<RegistryLink>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(RegistryError::Connect("refused".into())) })
        }
    }

    #[tokio::test]
    async fn test_reconnect_gives_up() {
        let connector = Arc::new(Unreachable {
            attempts: AtomicU32::new(0),
        });
        let config = RegistryConfig::default()
            .with_reconnect_delay(Duration::from_millis(1))
            .with_max_reconnect_attempts(3);
        let (client, _handle, _inbound) =
            RegistryClient::new(config, "d1", "Desk", connector.clone());

        let err = client.run().await.unwrap_err();
        assert!(matches!(err, RegistryError::ReconnectExhausted { attempts: 3 }));
        // First try plus three reconnects
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    }

    /// Hands out links whose far ends the test drives by hand.
    struct Scripted {
        links: parking_lot::Mutex<Vec<RegistryLink>>,
    }

    impl RegistryConnector for Scripted {
        fn connect(&self) -> BoxFuture<'_, RegistryResult<RegistryLink>> {
            let link = self.links.lock().pop();
            Box::pin(async move { link.ok_or_else(|| RegistryError::Connect("no more links".into())) })
        }
    }

    #[tokio::test]
    async fn test_registers_heartbeats_and_tracks_devices() {
        let (to_registry, mut registry_rx) = mpsc::unbounded_channel();
        let (registry_tx, from_registry) = mpsc::unbounded_channel();
        let connector = Arc::new(Scripted {
            links: parking_lot::Mutex::new(vec![RegistryLink {
                outgoing: to_registry,
                incoming: from_registry,
            }]),
        });
        let config = RegistryConfig::default().with_heartbeat_interval(Duration::from_millis(20));
        let (client, handle, mut inbound) = RegistryClient::new(config, "d1", "Desk", connector);
        tokio::spawn(client.run());

        let first = RegistryMessage::from_json(&registry_rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            first,
            RegistryMessage::Register {
                device_id: "d1".into(),
                device_name: "Desk".into()
            }
        );
        let second = RegistryMessage::from_json(&registry_rx.recv().await.unwrap()).unwrap();
        assert_eq!(second, RegistryMessage::Heartbeat);

        let now = chrono::Utc::now();
        let list = RegistryMessage::DeviceList {
            devices: vec![
                Device {
                    id: "d1".into(),
                    display_name: "Desk".into(),
                    last_seen_at: now,
                },
                Device {
                    id: "d2".into(),
                    display_name: "Phone".into(),
                    last_seen_at: now,
                },
            ],
        };
        registry_tx.send(list.to_json().unwrap()).unwrap();
        registry_tx.send("not json".into()).unwrap();

        assert!(matches!(
            inbound.recv().await.unwrap(),
            RegistryMessage::DeviceList { .. }
        ));
        let devices = handle.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(handle.device("d2").unwrap().display_name, "Phone");
    }
}
