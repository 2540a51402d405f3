// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Device discovery

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::device::{Device, DeviceConfig};
use crate::error::Result;
use crate::parser::{DeviceEntry, parse_devices};

pub struct Adb {
    bridge: Arc<dyn Bridge>,
    device_config: DeviceConfig,
    attempts: u32,
    retry_delay: Duration,
}

impl Adb {
    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        Self {
            bridge,
            device_config: DeviceConfig::default(),
            attempts: 3,
            retry_delay: Duration::from_secs(3),
        }
    }

    /// Config given to every discovered device.
    pub fn with_device_config(mut self, config: DeviceConfig) -> Self {
        self.device_config = config;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    /// One `devices` listing, without retry.
    pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
        let output = self
            .bridge
            .issue(None, false, &["devices".to_string()])
            .await?;
        Ok(parse_devices(&output))
    }

    /// Discover attached devices, retrying while the listing is empty.
    ///
    /// Connected devices have their resolution read before they are returned.
    pub async fn devices(&self) -> Result<Vec<Arc<Device>>> {
        for attempt in 1..=self.attempts {
            let entries = self.list_devices().await?;
            if !entries.is_empty() {
                let mut devices = Vec::with_capacity(entries.len());
                for entry in entries {
                    let device = Device::with_status(
                        entry.serial,
                        self.bridge.clone(),
                        entry.connected,
                        self.device_config.clone(),
                    );
                    if entry.connected {
                        let resolution = device.init().await?;
                        info!(serial = device.serial(), width = resolution.x, height = resolution.y, "found device");
                    } else {
                        info!(serial = device.serial(), "found disconnected device");
                    }
                    devices.push(device);
                }
                return Ok(devices);
            }

            debug!(attempt, "no devices attached");
            if attempt < self.attempts {
                sleep(self.retry_delay).await;
            }
        }
        Ok(Vec::new())
    }

    /// Find a device by serial, or the first connected one when `serial` is `None`.
    pub async fn device(&self, serial: Option<&str>) -> Result<Option<Arc<Device>>> {
        let devices = self.devices().await?;
        Ok(devices.into_iter().find(|d| match serial {
            Some(serial) => d.serial() == serial,
            None => d.connected(),
        }))
    }
}
