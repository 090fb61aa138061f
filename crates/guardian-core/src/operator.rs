//! Operator actions on the registry
//!
//! Each action is one serialized load-modify-save cycle through a
//! [`RegistryHandle`]. Actions only change the registry: callers follow up
//! with a full resync (`SyncScope::All`), either through a running
//! `SyncWorker` or by running one directly.

use std::net::IpAddr;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{DeviceRecord, DeviceStatus, MacAddress, UNKNOWN_NAME};
use crate::registry::RegistryHandle;
use crate::sync::dns::is_valid_domain;
use crate::traits::{HostnameLookup, RouterClient};

/// Set a device's status
///
/// Accepts any status, including `Redirected` with a valid domain. Setting
/// the current status again leaves the registry untouched.
///
/// # Returns
///
/// - `Ok(DeviceRecord)`: The record after the change
/// - `Err(Error::NotFound)`: Unknown MAC
/// - `Err(Error::InvalidInput)`: Redirect domain is not a valid name
pub async fn set_status(
    registry: &RegistryHandle,
    mac: &MacAddress,
    status: DeviceStatus,
) -> Result<DeviceRecord> {
    if let DeviceStatus::Redirected { domain } = &status {
        if !is_valid_domain(domain) {
            return Err(Error::invalid_input(format!("Invalid redirect domain: '{}'", domain)));
        }
    }

    let record = registry
        .update(|registry| {
            let record = registry
                .get_mut(mac)
                .ok_or_else(|| Error::not_found(mac.to_string()))?;
            if record.status != status {
                record.status = status.clone();
                record.touch();
            }
            Ok(record.clone())
        })
        .await?;

    info!("Device {} set to {}", mac, record.status);
    Ok(record)
}

/// Redirect a device's DNS to `domain`
///
/// The domain is trimmed and lowercased before validation.
pub async fn set_redirect(registry: &RegistryHandle, mac: &MacAddress, domain: &str) -> Result<DeviceRecord> {
    let domain = domain.trim().to_ascii_lowercase();
    set_status(registry, mac, DeviceStatus::Redirected { domain }).await
}

/// Drop a device's redirect and approve it
pub async fn clear_redirect(registry: &RegistryHandle, mac: &MacAddress) -> Result<DeviceRecord> {
    set_status(registry, mac, DeviceStatus::Approved).await
}

/// Add every connected client the registry does not know yet as approved
///
/// Known devices are left exactly as they are.
///
/// # Returns
///
/// Number of devices added
pub async fn import_clients(registry: &RegistryHandle, router: &dyn RouterClient) -> Result<usize> {
    let ctx = router.login().await?;
    let clients = router.list_clients(&ctx).await?;

    let added = registry
        .update(|registry| {
            let mut added = 0;
            for client in &clients {
                if registry.contains(&client.mac) {
                    continue;
                }
                registry.insert(
                    client.mac.clone(),
                    DeviceRecord::discovered(
                        client.reported_ip().unwrap_or_default(),
                        client.display_name(),
                        DeviceStatus::Approved,
                    ),
                );
                added += 1;
            }
            Ok(added)
        })
        .await?;

    info!("Imported {} of {} connected clients", added, clients.len());
    Ok(added)
}

/// Re-resolve a device's name from its stored IP address
///
/// The name becomes `Unknown` when the device has no usable IP or the
/// reverse lookup yields nothing. The lookup runs outside the registry lock.
///
/// # Returns
///
/// - `Ok(DeviceRecord)`: The record after the refresh
/// - `Err(Error::NotFound)`: Unknown MAC
pub async fn refresh_name(
    registry: &RegistryHandle,
    mac: &MacAddress,
    lookup: &dyn HostnameLookup,
) -> Result<DeviceRecord> {
    let snapshot = registry.snapshot().await?;
    let record = snapshot
        .get(mac)
        .ok_or_else(|| Error::not_found(mac.to_string()))?;

    let name = match record.observed_ip().map(str::parse::<IpAddr>) {
        Some(Ok(ip)) => lookup.reverse(ip).await,
        Some(Err(_)) => {
            warn!("Device {} has unparsable IP '{}'", mac, record.ip);
            None
        }
        None => None,
    }
    .unwrap_or_else(|| UNKNOWN_NAME.to_string());

    let record = registry
        .update(|registry| {
            let record = registry
                .get_mut(mac)
                .ok_or_else(|| Error::not_found(mac.to_string()))?;
            if record.name != name {
                record.name = name.clone();
                record.touch();
            }
            Ok(record.clone())
        })
        .await?;

    info!("Device {} name refreshed to '{}'", mac, record.name);
    Ok(record)
}

/// Archive the registry and start over with an empty one
///
/// The next daemon start bootstraps again.
pub async fn reset_all(registry: &RegistryHandle) -> Result<Option<PathBuf>> {
    let archived = registry.reset().await?;
    match &archived {
        Some(path) => info!("Registry reset, previous devices archived to {}", path.display()),
        None => info!("Registry reset"),
    }
    Ok(archived)
}
