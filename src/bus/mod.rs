/*
 *  bus/mod.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Shared serial bus: arbitration, sessions, transfer, transports
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

pub mod arbiter;
pub mod error;
pub mod mock;
pub mod serial;
pub mod session;
pub mod transfer;
pub mod transport;

pub use arbiter::{BusArbiter, BusGuard};
pub use error::BusError;
pub use mock::MockTransport;
pub use serial::{PortSettings, SerialTransport};
pub use session::{CommandBus, CommandOutcome, CommandRequest, Session};
pub use transfer::Chunking;
pub use transport::Transport;
