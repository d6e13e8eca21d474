/*
 *  bus/error.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error types for the shared serial bus
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

use std::time::Duration;
use thiserror::Error;

use crate::bitmap::ImageError;

/// Unified error type for everything that talks over the bus
#[derive(Debug, Error)]
pub enum BusError {
    /// No terminator arrived before the deadline. Recoverable: the bus has
    /// already been released and the reader resumed.
    #[error("{command}: no response within {after:?}")]
    Timeout { command: String, after: Duration },

    /// The transport failed or its line stream closed underneath a session
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Rejected before any byte was written
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("image conversion failed: {0}")]
    Image(#[from] ImageError),
}

impl BusError {
    /// Timeouts are soft failures; callers retry on the next refresh pass.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_soft() {
        let err = BusError::Timeout {
            command: "deej.modules.sd.list".to_string(),
            after: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("deej.modules.sd.list"));

        let err = BusError::InvalidArgument("port 9".to_string());
        assert!(!err.is_timeout());
    }
}
