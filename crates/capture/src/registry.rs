use crate::descriptor::{Locator, SourceDescriptor, SourceKind};
use crate::error::SourceError;
use crate::platform::{CaptureFormat, DeviceProvider, FrameProducer, StreamConnector};
use schema::Frame;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Default)]
struct Catalog {
    local: Vec<SourceDescriptor>,
    remote: Vec<SourceDescriptor>,
    /// Device handle to assigned id, kept across rediscovery.
    local_ids: HashMap<String, String>,
    local_count: usize,
    ip_count: usize,
    drone_count: usize,
}

struct ActiveSource {
    descriptor: SourceDescriptor,
    producer: Box<dyn FrameProducer>,
}

/// Catalog of known sources and owner of the single open capture.
///
/// Activation closes the previous capture before opening the next one, so at
/// most one capture is open at any time. Frame capture holds the same lock,
/// so a capture never races an in-flight switch.
pub struct SourceRegistry {
    devices: Arc<dyn DeviceProvider>,
    streams: Arc<dyn StreamConnector>,
    format: CaptureFormat,
    catalog: RwLock<Catalog>,
    active: Mutex<Option<ActiveSource>>,
    current: RwLock<Option<SourceDescriptor>>,
}

impl SourceRegistry {
    pub fn new(
        devices: Arc<dyn DeviceProvider>,
        streams: Arc<dyn StreamConnector>,
        format: CaptureFormat,
    ) -> Self {
        Self {
            devices,
            streams,
            format,
            catalog: RwLock::new(Catalog::default()),
            active: Mutex::new(None),
            current: RwLock::new(None),
        }
    }

    fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|p| p.into_inner())
    }

    fn catalog_mut(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(|p| p.into_inner())
    }

    fn set_current(&self, descriptor: Option<SourceDescriptor>) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = descriptor;
    }

    /// Probe local cameras and replace the local part of the catalog.
    ///
    /// A device handle keeps its id across calls; unseen handles get the next
    /// free `local-<n>`.
    pub async fn discover_local_sources(&self) -> Result<Vec<SourceDescriptor>, SourceError> {
        let devices = self.devices.enumerate().await?;

        let mut catalog = self.catalog_mut();
        let mut discovered = Vec::with_capacity(devices.len());
        for device in devices {
            let id = match catalog.local_ids.get(&device.handle) {
                Some(id) => id.clone(),
                None => {
                    catalog.local_count += 1;
                    let id = SourceKind::LocalCamera.source_id(catalog.local_count);
                    catalog.local_ids.insert(device.handle.clone(), id.clone());
                    id
                }
            };
            discovered.push(SourceDescriptor {
                id,
                kind: SourceKind::LocalCamera,
                display_name: device.name,
                locator: Locator::Device(device.handle),
            });
        }

        info!(count = discovered.len(), "Discovered local cameras");
        catalog.local = discovered.clone();
        Ok(discovered)
    }

    /// Add an IP or drone stream to the catalog without opening it.
    pub fn register_remote_source(
        &self,
        kind: SourceKind,
        locator: &str,
        display_name: Option<String>,
    ) -> Result<SourceDescriptor, SourceError> {
        if kind == SourceKind::LocalCamera {
            return Err(SourceError::InvalidLocator(
                "local cameras are discovered, not registered".to_string(),
            ));
        }

        let url = Url::parse(locator.trim())
            .map_err(|e| SourceError::InvalidLocator(format!("{locator}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::InvalidLocator(format!(
                "unsupported scheme '{}'; expected http(s)",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| SourceError::InvalidLocator(format!("{locator}: missing host")))?
            .to_string();

        let mut catalog = self.catalog_mut();
        let n = match kind {
            SourceKind::DroneStream => {
                catalog.drone_count += 1;
                catalog.drone_count
            }
            _ => {
                catalog.ip_count += 1;
                catalog.ip_count
            }
        };

        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| match kind {
                SourceKind::DroneStream => format!("Drone {host}"),
                _ => format!("IP camera {host}"),
            });

        let descriptor = SourceDescriptor {
            id: kind.source_id(n),
            kind,
            display_name,
            locator: Locator::Url(url),
        };
        catalog.remote.push(descriptor.clone());

        info!(id = %descriptor.id, kind = %kind, "Registered remote source");
        Ok(descriptor)
    }

    /// Local cameras in discovery order, then remote sources in registration order.
    pub fn list_sources(&self) -> Vec<SourceDescriptor> {
        let catalog = self.catalog();
        catalog.local.iter().chain(&catalog.remote).cloned().collect()
    }

    pub fn find(&self, id: &str) -> Option<SourceDescriptor> {
        let catalog = self.catalog();
        catalog.local.iter().chain(&catalog.remote).find(|s| s.id == id).cloned()
    }

    pub fn active_source(&self) -> Option<SourceDescriptor> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Close the current capture, then open `descriptor`.
    ///
    /// On failure no source is active.
    pub async fn activate(&self, descriptor: &SourceDescriptor) -> Result<(), SourceError> {
        let mut active = self.active.lock().await;

        if let Some(mut previous) = active.take() {
            self.set_current(None);
            debug!(id = %previous.descriptor.id, "Closing previous source");
            previous.producer.close().await;
        }

        let opened = match &descriptor.locator {
            Locator::Device(handle) => self.devices.open(&descriptor.id, handle, self.format).await,
            Locator::Url(url) => {
                self.streams
                    .connect(&descriptor.id, descriptor.kind, url, self.format)
                    .await
            }
        };

        match opened {
            Ok(producer) => {
                *active = Some(ActiveSource {
                    descriptor: descriptor.clone(),
                    producer,
                });
                self.set_current(Some(descriptor.clone()));
                info!(id = %descriptor.id, name = %descriptor.display_name, "Source active");
                Ok(())
            }
            Err(e) => {
                warn!(id = %descriptor.id, error = %e, "Source activation failed");
                Err(e)
            }
        }
    }

    pub async fn activate_id(&self, id: &str) -> Result<SourceDescriptor, SourceError> {
        let descriptor = self
            .find(id)
            .ok_or_else(|| SourceError::UnknownSource(id.to_string()))?;
        self.activate(&descriptor).await?;
        Ok(descriptor)
    }

    /// Advance cyclically through the discovered local cameras.
    pub async fn switch_to_next(&self) -> Result<SourceDescriptor, SourceError> {
        let next = {
            let catalog = self.catalog();
            if catalog.local.is_empty() {
                return Err(SourceError::NoLocalCameras);
            }
            let position = self
                .active_source()
                .and_then(|current| catalog.local.iter().position(|s| s.id == current.id));
            let index = position.map_or(0, |i| (i + 1) % catalog.local.len());
            catalog.local[index].clone()
        };

        self.activate(&next).await?;
        Ok(next)
    }

    /// Grab the next frame from the active source.
    pub async fn capture(&self) -> Result<Frame, SourceError> {
        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(source) => source.producer.next_frame().await,
            None => Err(SourceError::NoActiveSource),
        }
    }

    /// Close the active source, if any.
    pub async fn close(&self) {
        let mut active = self.active.lock().await;
        let previous = active.take();
        self.set_current(None);
        if let Some(mut source) = previous {
            info!(id = %source.descriptor.id, "Closing source");
            source.producer.close().await;
        }
    }
}
