/*
 *  bus/transport.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Narrow interface onto the raw serial link
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

use tokio::sync::mpsc;

use crate::bus::error::BusError;

/// Line oriented access to the link shared with the microcontroller.
///
/// The transport owns a background reader that consumes unsolicited lines
/// (slider positions) while it is running. A command session pauses that
/// reader and subscribes to the raw line stream with [`Transport::read_lines`]
/// for the duration of its exchange.
pub trait Transport: Send + Sync + 'static {
    /// Whether the background reader is currently consuming lines
    fn is_running(&self) -> bool;

    /// Stop the background reader from consuming lines
    fn pause(&self);

    /// (Re)start the background reader
    fn start(&self);

    /// Write `line` followed by the line terminator
    fn write_line(&self, line: &str) -> Result<(), BusError>;

    /// Write raw bytes, no framing
    fn write_bytes(&self, bytes: &[u8]) -> Result<(), BusError>;

    /// Subscribe to received lines.
    ///
    /// Each call replaces the previous subscriber, whose stream then ends.
    fn read_lines(&self) -> mpsc::UnboundedReceiver<String>;
}

/// Strip line framing the firmware may leave on a response
pub fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
