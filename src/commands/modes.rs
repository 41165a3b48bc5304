//! Mode transfer actions: demo, push/pull, brightness, VortexLink and
//! Chromalink.
//!
//! Mode contents stay opaque engine streams; callers own the [`ModeStore`]
//! and the link only fills or reads it.

use super::{describe_error, report, ProgressSender};
use crate::engine::{Mode, ModeStore, Rgb};
use crate::protocol::{DeviceLink, DuoHeader};

pub async fn demo_mode(link: &DeviceLink, mode: &Mode) -> Result<(), String> {
    link.demo_mode(mode).await.map_err(|e| describe_error(&e))
}

pub async fn demo_color(link: &DeviceLink, color: Rgb) -> Result<(), String> {
    link.demo_color(color).await.map_err(|e| describe_error(&e))
}

pub async fn clear_demo(link: &DeviceLink) -> Result<(), String> {
    link.clear_demo().await.map_err(|e| describe_error(&e))
}

/// Replace the modes saved on the device with `store`.
pub async fn push_modes(
    link: &DeviceLink,
    store: &ModeStore,
    progress: ProgressSender,
) -> Result<(), String> {
    link.push_to_device(store, |p| report(&progress, p))
        .await
        .map_err(|e| describe_error(&e))
}

/// Load the device's saved modes into `store`. Returns how many arrived.
///
/// `store` is left as it was when the pull fails.
pub async fn pull_modes(
    link: &DeviceLink,
    store: &mut ModeStore,
    progress: ProgressSender,
) -> Result<usize, String> {
    link.pull_from_device(store, |p| report(&progress, p))
        .await
        .map_err(|e| describe_error(&e))?;
    Ok(store.len())
}

pub async fn set_brightness(link: &DeviceLink, brightness: u8) -> Result<(), String> {
    link.set_brightness(brightness)
        .await
        .map_err(|e| describe_error(&e))
}

pub async fn get_brightness(link: &DeviceLink) -> Result<u8, String> {
    link.get_brightness().await.map_err(|e| describe_error(&e))
}

/// Send `mode` out over the device's VortexLink emitter.
pub async fn transmit_vl(link: &DeviceLink, mode: &Mode) -> Result<(), String> {
    link.transmit_vl(mode).await.map_err(|e| describe_error(&e))
}

/// Wait for a mode beamed at the device over VortexLink.
pub async fn listen_vl(link: &DeviceLink) -> Result<Mode, String> {
    link.listen_vl().await.map_err(|e| describe_error(&e))
}

pub async fn pull_single_mode(link: &DeviceLink, index: u32) -> Result<Mode, String> {
    link.pull_single_mode(index)
        .await
        .map_err(|e| describe_error(&e))
}

pub async fn push_single_mode(link: &DeviceLink, index: u32, mode: &Mode) -> Result<(), String> {
    link.push_single_mode(index, mode)
        .await
        .map_err(|e| describe_error(&e))
}

/// Read the header of the Duo attached over Chromalink.
pub async fn connect_chromalink(link: &DeviceLink) -> Result<DuoHeader, String> {
    link.connect_chromalink()
        .await
        .map_err(|e| describe_error(&e))
}

pub async fn pull_duo_modes(
    link: &DeviceLink,
    header: &DuoHeader,
    store: &mut ModeStore,
    progress: ProgressSender,
) -> Result<usize, String> {
    link.pull_duo_modes(header, store, |p| report(&progress, p))
        .await
        .map_err(|e| describe_error(&e))?;
    Ok(store.len())
}

pub async fn push_duo_modes(
    link: &DeviceLink,
    header: &DuoHeader,
    store: &ModeStore,
    progress: ProgressSender,
) -> Result<(), String> {
    link.push_duo_modes(header, store, |p| report(&progress, p))
        .await
        .map_err(|e| describe_error(&e))
}

pub async fn write_duo_header(link: &DeviceLink, header: &DuoHeader) -> Result<(), String> {
    link.write_duo_header(header)
        .await
        .map_err(|e| describe_error(&e))
}
