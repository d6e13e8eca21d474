/*
 *  modules/mux.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  I2C port selector (TCA9548A class multiplexer)
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

use log::debug;

use crate::bus::session::CONTROL_TIMEOUT;
use crate::bus::{BusError, CommandBus, CommandRequest, Transport};

pub const DEFAULT_CHIP: &str = "TCA9548A";

/// Highest selectable port
pub const MAX_PORT: usize = 7;

pub struct PortSelector<T: Transport> {
    bus: CommandBus<T>,
    chip: String,
    acknowledge: bool,
}

impl<T: Transport> PortSelector<T> {
    pub fn new(bus: CommandBus<T>, chip: impl Into<String>) -> Self {
        Self {
            bus,
            chip: chip.into(),
            acknowledge: false,
        }
    }

    /// Wait for `DONE` after a select instead of firing and forgetting
    pub fn acknowledged(mut self, acknowledge: bool) -> Self {
        self.acknowledge = acknowledge;
        self
    }

    pub fn command_path(&self) -> String {
        format!("deej.modules.{}.select", self.chip)
    }

    /// Request selecting `port`; anything outside 0..=7 is refused here so
    /// nothing reaches the wire
    pub fn select_request(&self, port: usize) -> Result<CommandRequest, BusError> {
        if port > MAX_PORT {
            return Err(BusError::InvalidArgument(format!(
                "{} port {} out of range 0..={}",
                self.chip, port, MAX_PORT
            )));
        }
        Ok(CommandRequest::new(self.command_path())
            .arg(port.to_string())
            .expect_response(self.acknowledge)
            .timeout(CONTROL_TIMEOUT))
    }

    pub async fn select(&self, port: usize) -> Result<(), BusError> {
        let request = self.select_request(port)?;
        debug!("selecting {} port {}", self.chip, port);
        let command = request.command_path.clone();
        self.bus
            .execute(request)
            .await?
            .into_result(&command, CONTROL_TIMEOUT)
            .map(|_| ())
    }
}
