/*
 *  modules/sd.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  SD card module: listing, delete and upload
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::path::Path;

use log::{debug, info};

use crate::automap::contains_file;
use crate::bitmap::PackedImage;
use crate::bus::session::LISTING_TIMEOUT;
use crate::bus::transfer::{SD_SEND, transfer_timeout};
use crate::bus::{BusError, Chunking, CommandBus, CommandRequest, Transport};

pub const SD_LIST: &str = "deej.modules.sd.list";
pub const SD_DELETE: &str = "deej.modules.sd.delete";

/// Alternate delete confirmation sent by some firmware builds
pub const FILE_DELETED: &str = "FILEDELETED";

pub struct SdCard<T: Transport> {
    bus: CommandBus<T>,
    chunking: Chunking,
}

impl<T: Transport> SdCard<T> {
    pub fn new(bus: CommandBus<T>) -> Self {
        Self { bus, chunking: Chunking::default() }
    }

    pub fn with_chunking(mut self, chunking: Chunking) -> Self {
        self.chunking = chunking;
        self
    }

    /// Root directory listing, one name per entry.
    /// A listing cut short by a timeout is an error, not a partial result.
    pub async fn list(&self) -> Result<Vec<String>, BusError> {
        let request = CommandRequest::new(SD_LIST).timeout(LISTING_TIMEOUT);
        let lines = self
            .bus
            .execute(request)
            .await?
            .into_result(SD_LIST, LISTING_TIMEOUT)?;
        Ok(lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Whether the card holds `name`, compared without regard to case
    pub async fn contains(&self, name: &str) -> Result<bool, BusError> {
        Ok(contains_file(&self.list().await?, name))
    }

    pub async fn delete(&self, name: &str) -> Result<(), BusError> {
        check_file_name(name)?;
        let request = CommandRequest::new(SD_DELETE)
            .arg(name)
            .or_terminator(FILE_DELETED)
            .timeout(LISTING_TIMEOUT);
        let outcome = self.bus.execute(request).await?;
        for line in outcome.into_result(SD_DELETE, LISTING_TIMEOUT)? {
            debug!("{}: {}", SD_DELETE, line);
        }
        info!("Deleted {} from the SD card", name);
        Ok(())
    }

    /// Upload `bytes` as `name` in one session
    pub async fn send_payload(&self, bytes: &[u8], name: &str) -> Result<(), BusError> {
        check_file_name(name)?;
        let mut session = self.bus.open_session().await;
        let outcome = session.send_payload(bytes, name, self.chunking).await?;
        session.close().await;
        outcome.into_result(SD_SEND, transfer_timeout(bytes.len()))?;
        info!("Sent {} ({} bytes) to the SD card", name, bytes.len());
        Ok(())
    }

    pub async fn send_image(&self, image: &PackedImage, name: &str) -> Result<(), BusError> {
        self.send_payload(&image.to_bytes(), name).await
    }

    /// Upload a local file, by default under its own file name
    pub async fn send_file(&self, path: &Path, name: Option<&str>) -> Result<String, BusError> {
        let name = match name {
            Some(n) => n.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| BusError::InvalidArgument(format!("no file name in {}", path.display())))?,
        };
        let bytes = tokio::fs::read(path).await?;
        self.send_payload(&bytes, &name).await?;
        Ok(name)
    }
}

fn check_file_name(name: &str) -> Result<(), BusError> {
    if name.trim().is_empty() || name.contains(['\r', '\n']) {
        return Err(BusError::InvalidArgument(format!("bad file name {:?}", name)));
    }
    Ok(())
}
