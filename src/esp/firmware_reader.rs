//! Firmware package reader for ESP32 controllers.
//!
//! A package is a zip archive with a `manifest.json` naming each flash image
//! and its role:
//!
//! ```json
//! {
//!   "version": "1.4.0",
//!   "chip": "esp32s3",
//!   "images": [
//!     { "file": "bootloader.bin", "role": "bootloader" },
//!     { "file": "app.bin", "role": "application", "sha256": "..." }
//!   ]
//! }
//! ```

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{LinkError, LinkResult};
use crate::settings::FlashLayout;

/// One contiguous region to program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareChunk {
    pub address: u32,
    pub data: Vec<u8>,
}

/// Ordered list of chunks making up one flashable firmware.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub version: Option<String>,
    pub chip: Option<String>,
    pub chunks: Vec<FirmwareChunk>,
}

impl FirmwareImage {
    pub fn total_size(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}

/// What a file in the package is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageRole {
    Bootloader,
    #[serde(alias = "partitions")]
    PartitionTable,
    #[serde(alias = "boot_app0")]
    BootApp0,
    #[serde(alias = "app", alias = "firmware")]
    Application,
}

impl ImageRole {
    pub fn address(self, layout: &FlashLayout) -> u32 {
        match self {
            ImageRole::Bootloader => layout.bootloader,
            ImageRole::PartitionTable => layout.partition_table,
            ImageRole::BootApp0 => layout.boot_app0,
            ImageRole::Application => layout.application,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    version: Option<String>,
    chip: Option<String>,
    images: Vec<ManifestImage>,
}

#[derive(Debug, Deserialize)]
struct ManifestImage {
    file: String,
    role: ImageRole,
    address: Option<u32>,
    sha256: Option<String>,
}

/// Read a firmware package, placing each image at its layout address.
///
/// Chunks come back sorted by address. Digests given in the manifest are
/// verified before anything is returned.
pub fn read_firmware_package<P: AsRef<Path>>(
    path: P,
    layout: &FlashLayout,
) -> LinkResult<FirmwareImage> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut archive = zip::ZipArchive::new(file)?;

    let manifest = read_manifest(&mut archive)?;
    if manifest.images.is_empty() {
        return Err(LinkError::InvalidManifest {
            reason: "no images listed".into(),
        });
    }

    let mut chunks = Vec::with_capacity(manifest.images.len());
    for image in &manifest.images {
        let data = read_file_from_zip(&mut archive, &image.file)?;

        if let Some(expected) = &image.sha256 {
            let actual = format!("{:x}", Sha256::digest(&data));
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(LinkError::DigestMismatch {
                    filename: image.file.clone(),
                });
            }
        }

        let address = image.address.unwrap_or_else(|| image.role.address(layout));
        debug!(
            file = %image.file,
            address = %format!("0x{:X}", address),
            size = data.len(),
            "firmware image"
        );
        chunks.push(FirmwareChunk { address, data });
    }

    chunks.sort_by_key(|c| c.address);
    if let Some(pair) = chunks
        .windows(2)
        .find(|w| w[0].address as usize + w[0].data.len() > w[1].address as usize)
    {
        return Err(LinkError::InvalidManifest {
            reason: format!(
                "image at 0x{:X} overlaps image at 0x{:X}",
                pair[0].address, pair[1].address
            ),
        });
    }

    Ok(FirmwareImage {
        version: manifest.version,
        chip: manifest.chip,
        chunks,
    })
}

/// Load a single raw binary to flash at `address`.
pub fn read_firmware_bin<P: AsRef<Path>>(path: P, address: u32) -> LinkResult<FirmwareImage> {
    let data = std::fs::read(path.as_ref())?;
    if data.is_empty() {
        return Err(LinkError::InvalidManifest {
            reason: "firmware file is empty".into(),
        });
    }

    Ok(FirmwareImage {
        version: None,
        chip: None,
        chunks: vec![FirmwareChunk { address, data }],
    })
}

fn read_manifest(archive: &mut zip::ZipArchive<std::fs::File>) -> LinkResult<RawManifest> {
    let mut manifest_file =
        archive
            .by_name("manifest.json")
            .map_err(|_| LinkError::MissingFile {
                filename: "manifest.json".to_string(),
            })?;

    let mut contents = String::new();
    manifest_file.read_to_string(&mut contents)?;

    Ok(serde_json::from_str(&contents)?)
}

fn read_file_from_zip(
    archive: &mut zip::ZipArchive<std::fs::File>,
    name: &str,
) -> LinkResult<Vec<u8>> {
    let mut file = archive.by_name(name).map_err(|_| LinkError::MissingFile {
        filename: name.to_string(),
    })?;

    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)?;

    Ok(data)
}
