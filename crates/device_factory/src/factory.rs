//! DeviceFactory - descriptor to handle resolution
//!
//! Resolves each descriptor's driver kind into a concrete transport exactly
//! once, at startup; the poll loop never re-checks the kind per call.

use contracts::{DeviceDescriptor, DriverKind, LoggerBlueprint, Transport};
use tracing::{info, instrument};

use crate::error::{FactoryError, Result};
use crate::handle::DeviceHandle;
use crate::transports::{MockTransport, PrologixTransport, TcpTransport};
#[cfg(feature = "serial")]
use crate::transports::SerialTransport;

/// Builds device handles from descriptors.
pub struct DeviceFactory;

impl DeviceFactory {
    /// Build every device in the blueprint.
    ///
    /// Fails on the first unresolvable descriptor; nothing has been
    /// connected at that point, so there is nothing to roll back.
    #[instrument(name = "factory_build_all", skip(blueprint), fields(devices = blueprint.devices.len()))]
    pub fn build_all(blueprint: &LoggerBlueprint) -> Result<Vec<DeviceHandle>> {
        let mut handles = Vec::with_capacity(blueprint.devices.len());
        for descriptor in &blueprint.devices {
            handles.push(Self::build_handle(descriptor)?);
        }
        info!(devices = handles.len(), "device handles constructed");
        Ok(handles)
    }

    /// Build one handle, resolving the transport for its driver kind.
    pub fn build_handle(descriptor: &DeviceDescriptor) -> Result<DeviceHandle> {
        let transport = Self::build_transport(descriptor)?;
        Ok(DeviceHandle::new(descriptor.clone(), transport))
    }

    fn build_transport(descriptor: &DeviceDescriptor) -> Result<Box<dyn Transport>> {
        let conn = &descriptor.connection;
        let id = &descriptor.id;

        match descriptor.driver {
            DriverKind::Mock => Ok(Box::new(MockTransport::synthetic(id))),

            DriverKind::ScpiTcp => {
                let host = conn
                    .host
                    .clone()
                    .ok_or_else(|| FactoryError::missing_param(id, "host"))?;
                let port = conn
                    .port
                    .ok_or_else(|| FactoryError::missing_param(id, "port"))?;
                Ok(Box::new(TcpTransport::new(id, host, port, conn.timeout())))
            }

            DriverKind::Prologix => {
                let host = conn
                    .host
                    .clone()
                    .ok_or_else(|| FactoryError::missing_param(id, "host"))?;
                let port = conn
                    .port
                    .ok_or_else(|| FactoryError::missing_param(id, "port"))?;
                let gpib_address = conn
                    .gpib_address
                    .ok_or_else(|| FactoryError::missing_param(id, "gpib_address"))?;
                Ok(Box::new(PrologixTransport::new(
                    id,
                    host,
                    port,
                    gpib_address,
                    conn.timeout(),
                )))
            }

            #[cfg(feature = "serial")]
            DriverKind::ScpiSerial => {
                let tty = conn
                    .tty
                    .clone()
                    .ok_or_else(|| FactoryError::missing_param(id, "tty"))?;
                let baud_rate = conn
                    .baud_rate
                    .ok_or_else(|| FactoryError::missing_param(id, "baud_rate"))?;
                Ok(Box::new(SerialTransport::new(
                    id,
                    tty,
                    baud_rate,
                    conn.timeout(),
                )))
            }

            #[cfg(not(feature = "serial"))]
            DriverKind::ScpiSerial => Err(FactoryError::DriverUnavailable {
                device_id: id.clone(),
                feature: "serial",
            }),
        }
    }
}
