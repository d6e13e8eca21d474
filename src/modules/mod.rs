/*
 *  modules/mod.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  One type per firmware module reachable over the bus
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

pub mod display;
pub mod mux;
pub mod sd;

pub use display::DisplayModule;
pub use mux::PortSelector;
pub use sd::SdCard;

use crate::bus::{CommandBus, Transport};
use crate::config::Config;

/// Every module on one bus, set up from a configuration snapshot
pub struct Modules<T: Transport> {
    pub bus: CommandBus<T>,
    pub display: DisplayModule<T>,
    pub sd: SdCard<T>,
    pub mux: PortSelector<T>,
}

impl<T: Transport> Modules<T> {
    pub fn new(bus: &CommandBus<T>, cfg: &Config) -> Self {
        let bus = bus.clone().with_settle_delay(cfg.command_delay());
        let ack = cfg.acknowledge_control();
        Self {
            display: DisplayModule::new(bus.clone()).acknowledged(ack),
            sd: SdCard::new(bus.clone()).with_chunking(cfg.chunking()),
            mux: PortSelector::new(bus.clone(), cfg.mux_chip()).acknowledged(ack),
            bus,
        }
    }
}
