/*
 *  modules/display.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display module: power and image selection
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

use crate::bus::session::CONTROL_TIMEOUT;
use crate::bus::{BusError, CommandBus, CommandRequest, Transport};

pub const DISPLAY_ON: &str = "deej.modules.display.on";
pub const DISPLAY_OFF: &str = "deej.modules.display.off";
pub const SET_IMAGE: &str = "deej.modules.display.setimage";

/// Commands for whichever display the port selector currently addresses
pub struct DisplayModule<T: Transport> {
    bus: CommandBus<T>,
    acknowledge: bool,
}

impl<T: Transport> DisplayModule<T> {
    pub fn new(bus: CommandBus<T>) -> Self {
        Self { bus, acknowledge: false }
    }

    /// Wait for `DONE` after on/off
    pub fn acknowledged(mut self, acknowledge: bool) -> Self {
        self.acknowledge = acknowledge;
        self
    }

    pub fn on_request(&self) -> CommandRequest {
        CommandRequest::new(DISPLAY_ON).expect_response(self.acknowledge)
    }

    pub fn off_request(&self) -> CommandRequest {
        CommandRequest::new(DISPLAY_OFF).expect_response(self.acknowledge)
    }

    /// Show `file_name` from the card; the firmware always answers this one
    pub fn set_image_request(&self, file_name: &str) -> Result<CommandRequest, BusError> {
        if file_name.is_empty() || file_name.contains(['\r', '\n']) {
            return Err(BusError::InvalidArgument(format!("bad image name {:?}", file_name)));
        }
        Ok(CommandRequest::new(SET_IMAGE)
            .arg(file_name)
            .timeout(CONTROL_TIMEOUT))
    }

    pub async fn on(&self) -> Result<(), BusError> {
        self.run(self.on_request()).await
    }

    pub async fn off(&self) -> Result<(), BusError> {
        self.run(self.off_request()).await
    }

    pub async fn set_image(&self, file_name: &str) -> Result<(), BusError> {
        self.run(self.set_image_request(file_name)?).await
    }

    async fn run(&self, request: CommandRequest) -> Result<(), BusError> {
        let command = request.command_path.clone();
        let after = request.timeout;
        self.bus.execute(request).await?.into_result(&command, after)?;
        Ok(())
    }
}
