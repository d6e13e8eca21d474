/*
 *  bus/session.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Scoped command sessions: acquire, write, await terminator, release
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

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::mpsc;

use crate::bus::arbiter::{BusArbiter, BusGuard};
use crate::bus::error::BusError;
use crate::bus::transfer;
use crate::bus::transport::Transport;

/// Literal line ending every multi-line response
pub const TERMINATOR: &str = "DONE";

/// Deadline for control commands (display, port select)
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(350);

/// Deadline for directory listings
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(1);

/// One command to run on the microcontroller. Built per call, consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Dotted remote command, e.g. `deej.modules.display.on`
    pub command_path: String,
    /// Sent as the lines following the command path
    pub args: Vec<String>,
    pub expect_response: bool,
    /// Accepted end-of-response lines, primary first
    pub terminators: Vec<String>,
    /// Allowed silence between two received lines
    pub timeout: Duration,
    /// Blank lines are neither terminators nor collected
    pub skip_blank: bool,
}

impl CommandRequest {
    pub fn new(command_path: impl Into<String>) -> Self {
        Self {
            command_path: command_path.into(),
            args: Vec::new(),
            expect_response: true,
            terminators: vec![TERMINATOR.to_string()],
            timeout: CONTROL_TIMEOUT,
            skip_blank: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn expect_response(mut self, expect: bool) -> Self {
        self.expect_response = expect;
        self
    }

    /// Write only; still serialized through the arbiter
    pub fn fire_and_forget(self) -> Self {
        self.expect_response(false)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Also accept `terminator` as the end of the response
    pub fn or_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminators.push(terminator.into());
        self
    }

    pub fn skip_blank(mut self) -> Self {
        self.skip_blank = true;
        self
    }
}

/// Result of running a [`CommandRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Every non-terminator line, in arrival order
    pub collected_lines: Vec<String>,
    /// The deadline passed before a terminator. Lines read so far stay valid.
    pub timed_out: bool,
}

impl CommandOutcome {
    /// Surface a timed out outcome as [`BusError::Timeout`]
    pub fn into_result(self, command: &str, after: Duration) -> Result<Vec<String>, BusError> {
        if self.timed_out {
            return Err(BusError::Timeout {
                command: command.to_string(),
                after,
            });
        }
        Ok(self.collected_lines)
    }
}

/// Entry point for everything sent over the shared link.
///
/// Clones share the transport and the arbiter, so any number of device
/// modules can hold one and still be serialized against each other.
pub struct CommandBus<T: Transport> {
    transport: Arc<T>,
    arbiter: BusArbiter,
    settle: Duration,
}

impl<T: Transport> Clone for CommandBus<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            arbiter: self.arbiter.clone(),
            settle: self.settle,
        }
    }
}

impl<T: Transport> CommandBus<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            arbiter: BusArbiter::new(),
            settle: Duration::ZERO,
        }
    }

    /// Time the firmware is given after each closed session before the
    /// next client is granted the bus
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn arbiter(&self) -> &BusArbiter {
        &self.arbiter
    }

    /// Acquire the bus and take the line stream away from the background
    /// reader. Everything is undone when the session is dropped.
    pub async fn open_session(&self) -> Session<'_, T> {
        let guard = self.arbiter.acquire().await;
        let resume_reader = self.transport.is_running();
        if resume_reader {
            self.transport.pause();
        }
        let lines = self.transport.read_lines();
        trace!("session opened (reader was running: {})", resume_reader);
        Session {
            bus: self,
            lines,
            resume_reader,
            _guard: guard,
        }
    }

    /// Run one request as a complete session.
    ///
    /// A timeout is not an error here: it comes back as
    /// `CommandOutcome { timed_out: true, .. }` with the bus released.
    pub async fn execute(&self, request: CommandRequest) -> Result<CommandOutcome, BusError> {
        let mut session = self.open_session().await;
        let outcome = session.run(&request).await?;
        session.close().await;
        Ok(outcome)
    }
}

/// Exclusive, scoped use of the link.
///
/// Dropping the session, on any path, resumes the background reader if it
/// was running and then releases the bus.
pub struct Session<'a, T: Transport> {
    bus: &'a CommandBus<T>,
    pub(crate) lines: mpsc::UnboundedReceiver<String>,
    resume_reader: bool,
    _guard: BusGuard,
}

impl<T: Transport> Session<'_, T> {
    pub fn transport(&self) -> &T {
        &self.bus.transport
    }

    pub fn write_line(&self, line: &str) -> Result<(), BusError> {
        self.transport().write_line(line)
    }

    /// Command path line followed by one line per argument
    pub fn write_command(&self, command_path: &str, args: &[String]) -> Result<(), BusError> {
        self.write_line(command_path)?;
        for arg in args {
            self.write_line(arg)?;
        }
        Ok(())
    }

    /// Discard lines that arrived before this session wrote anything
    pub fn drain_stale(&mut self) -> usize {
        transfer::drain(&mut self.lines)
    }

    /// Read until one of the request's terminators or its timeout
    pub async fn await_response(&mut self, request: &CommandRequest) -> Result<CommandOutcome, BusError> {
        transfer::receive_until(
            &mut self.lines,
            &request.command_path,
            &request.terminators,
            request.timeout,
            request.skip_blank,
        )
        .await
    }

    /// Run one request inside this session. Several requests may share a
    /// session when they must not be split by another client, e.g. a port
    /// select followed by the display command it addresses.
    pub async fn run(&mut self, request: &CommandRequest) -> Result<CommandOutcome, BusError> {
        self.drain_stale();
        self.write_command(&request.command_path, &request.args)?;
        if !request.expect_response {
            return Ok(CommandOutcome::default());
        }
        self.await_response(request).await
    }

    /// Give the firmware its settle time, then release
    pub async fn close(self) {
        if !self.bus.settle.is_zero() {
            tokio::time::sleep(self.bus.settle).await;
        }
    }
}

impl<T: Transport> Drop for Session<'_, T> {
    fn drop(&mut self) {
        if self.resume_reader {
            self.bus.transport.start();
        }
        debug!("session closed");
        // _guard drops after this body and hands the bus on
    }
}
