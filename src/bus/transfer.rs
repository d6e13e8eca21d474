/*
 *  bus/transfer.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Line and byte transfer helpers used inside a session
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

use log::{debug, info, trace, warn};
use tokio::sync::mpsc;

use crate::bus::error::BusError;
use crate::bus::session::{CommandOutcome, CommandRequest, Session};
use crate::bus::transport::{Transport, trim_line};

/// Remote command that opens a file transfer
pub const SD_SEND: &str = "deej.modules.sd.send";

/// Sentinel line closing the raw payload
pub const END_OF_FILE: &str = "EOF";

/// Base deadline for the card to acknowledge a transfer
const TRANSFER_BASE: Duration = Duration::from_millis(750);

/// How a payload is cut up on the wire. The firmware UART buffer is small,
/// so bytes go out in chunks with a pause in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunking {
    /// Bytes per write, 0 sends the payload in one write
    pub size: usize,
    pub delay: Duration,
}

impl Default for Chunking {
    fn default() -> Self {
        Self {
            size: 64,
            delay: Duration::from_millis(2),
        }
    }
}

impl Chunking {
    pub fn single_write() -> Self {
        Self { size: 0, delay: Duration::ZERO }
    }
}

/// Acknowledgement deadline for a payload of `len` bytes
pub fn transfer_timeout(len: usize) -> Duration {
    TRANSFER_BASE + Duration::from_millis((len / 16) as u64)
}

/// Throw away whatever is already buffered on the line stream
pub fn drain(lines: &mut mpsc::UnboundedReceiver<String>) -> usize {
    let mut dropped = 0;
    while let Ok(line) = lines.try_recv() {
        trace!("discarding stale line {:?}", line);
        dropped += 1;
    }
    dropped
}

/// Write `bytes` in order, chunked and throttled per `chunking`
pub async fn stream_payload<T: Transport>(transport: &T, bytes: &[u8], chunking: Chunking) -> Result<(), BusError> {
    if chunking.size == 0 || bytes.len() <= chunking.size {
        return transport.write_bytes(bytes);
    }
    let mut chunks = bytes.chunks(chunking.size).peekable();
    while let Some(chunk) = chunks.next() {
        transport.write_bytes(chunk)?;
        if chunks.peek().is_some() && !chunking.delay.is_zero() {
            tokio::time::sleep(chunking.delay).await;
        }
    }
    Ok(())
}

/// Read lines until one matches `terminators`.
///
/// The deadline restarts with every received line. Running out of time is
/// reported in the outcome, not as an error; a closed stream is an error.
pub async fn receive_until(
    lines: &mut mpsc::UnboundedReceiver<String>,
    command: &str,
    terminators: &[String],
    timeout: Duration,
    skip_blank: bool,
) -> Result<CommandOutcome, BusError> {
    let mut outcome = CommandOutcome::default();
    loop {
        let raw = match tokio::time::timeout(timeout, lines.recv()).await {
            Err(_) => {
                warn!("{}: no {} within {:?}", command, terminators.join("/"), timeout);
                outcome.timed_out = true;
                return Ok(outcome);
            }
            Ok(None) => {
                return Err(BusError::Transport(format!("{}: line stream closed", command)));
            }
            Ok(Some(raw)) => raw,
        };

        let line = trim_line(&raw);
        if terminators.iter().any(|t| t == line) {
            trace!("{}: {}", command, line);
            return Ok(outcome);
        }
        if skip_blank && line.trim().is_empty() {
            continue;
        }
        info!("{}: {}", command, line);
        outcome.collected_lines.push(line.to_string());
    }
}

impl<T: Transport> Session<'_, T> {
    /// Upload `bytes` to the card as `destination`.
    ///
    /// A timeout means the card may hold a partial file; nothing here
    /// retries, the caller re-lists if it needs to know.
    pub async fn send_payload(&mut self, bytes: &[u8], destination: &str, chunking: Chunking) -> Result<CommandOutcome, BusError> {
        debug!("Sending {} bytes to the SD card as {:?}", bytes.len(), destination);
        let request = CommandRequest::new(SD_SEND)
            .arg(destination)
            .timeout(transfer_timeout(bytes.len()))
            .skip_blank();

        self.drain_stale();
        self.write_command(&request.command_path, &request.args)?;
        stream_payload(self.transport(), bytes, chunking).await?;
        self.write_line(END_OF_FILE)?;
        self.await_response(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{MockTransport, Written};
    use crate::bus::session::CommandBus;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_chunked_stream_preserves_order() {
        let mock = MockTransport::new();
        let payload: Vec<u8> = (0..=255).collect();
        stream_payload(&mock, &payload, Chunking { size: 100, delay: Duration::ZERO })
            .await
            .unwrap();

        assert_eq!(mock.bytes(), payload);
        let sizes: Vec<usize> = mock
            .written()
            .iter()
            .map(|w| match w {
                Written::Bytes(b) => b.len(),
                Written::Line(_) => 0,
            })
            .collect();
        assert_eq!(sizes, vec![100, 100, 56]);
    }

    #[tokio::test]
    async fn test_single_write() {
        let mock = MockTransport::new();
        stream_payload(&mock, &[9; 300], Chunking::single_write()).await.unwrap();
        assert_eq!(mock.written().len(), 1);
    }

    #[tokio::test]
    async fn test_send_payload_wire_format() {
        let mock = Arc::new(MockTransport::new());
        mock.reply_to(END_OF_FILE, &["", "  ", "writing", "DONE"]);
        let bus = CommandBus::new(Arc::clone(&mock));

        let outcome = {
            let mut session = bus.open_session().await;
            session
                .send_payload(&[0xAA, 0x55, 0x01], "1A2B3C4.B", Chunking::default())
                .await
                .unwrap()
        };

        assert!(!outcome.timed_out);
        assert_eq!(outcome.collected_lines, vec!["writing"]);
        assert_eq!(
            mock.written(),
            vec![
                Written::Line(SD_SEND.to_string()),
                Written::Line("1A2B3C4.B".to_string()),
                Written::Bytes(vec![0xAA, 0x55, 0x01]),
                Written::Line(END_OF_FILE.to_string()),
            ]
        );
        assert!(!bus.arbiter().is_busy());
    }

    #[tokio::test]
    async fn test_closed_stream_is_transport_error() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tx.send("partial".to_string()).unwrap();
        drop(tx);
        let err = receive_until(&mut rx, "deej.modules.sd.list", &["DONE".to_string()], Duration::from_secs(1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Transport(_)));
    }

    #[test]
    fn test_transfer_timeout_grows_with_payload() {
        assert_eq!(transfer_timeout(0), TRANSFER_BASE);
        assert!(transfer_timeout(1024) > transfer_timeout(16));
    }
}
