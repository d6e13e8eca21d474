/*
 *  bus/serial.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  serialport backed line transport
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

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, trace};
use serialport::SerialPort;
use tokio::sync::mpsc;

use crate::bus::error::BusError;
use crate::bus::transport::{Transport, trim_line};

/// Read timeout of the reader thread, bounds how long shutdown takes
const READ_POLL: Duration = Duration::from_millis(50);

/// Longest line kept; anything longer is passed on in pieces of this size
const MAX_LINE: usize = 512;

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// Device path, e.g. /dev/ttyACM0 or COM4
    pub path: String,
    pub baud_rate: u32,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
        }
    }
}

/// Where received lines go
#[derive(Debug, Default)]
struct LineRouting {
    /// Subscriber installed by a command session
    session: Option<mpsc::UnboundedSender<String>>,
    /// Consumer of unsolicited lines while the reader runs
    background: Option<mpsc::UnboundedSender<String>>,
}

impl LineRouting {
    fn route(&mut self, line: String, running: bool) {
        if let Some(tx) = self.session.as_ref() {
            match tx.send(line) {
                Ok(()) => return,
                Err(mpsc::error::SendError(line)) => {
                    self.session = None;
                    self.route(line, running);
                    return;
                }
            }
        }
        if running {
            if let Some(tx) = self.background.as_ref() {
                if tx.send(line).is_err() {
                    self.background = None;
                }
                return;
            }
        }
        trace!("dropped line {:?}, nobody listening", line);
    }

    /// Reader is gone: drop every sender so receivers see the stream end
    fn close(&mut self) {
        self.session = None;
        self.background = None;
    }
}

/// Frames raw bytes into lines on `\n`
#[derive(Debug, Default)]
struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b != b'\n' {
                self.pending.push(b);
                if self.pending.len() < MAX_LINE {
                    continue;
                }
                debug!("no line end after {} bytes, passing them on", MAX_LINE);
            }
            let raw = String::from_utf8_lossy(&self.pending).to_string();
            self.pending.clear();
            lines.push(trim_line(&raw).to_string());
        }
        lines
    }
}

/// Line transport over a real serial port.
///
/// A dedicated thread performs the blocking reads, frames lines on `\n` and
/// routes them into tokio channels.
pub struct SerialTransport {
    writer: Mutex<Box<dyn SerialPort>>,
    routing: Arc<Mutex<LineRouting>>,
    running: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Open the port and start the reader thread.
    ///
    /// Returns the transport plus the stream of unsolicited lines seen while
    /// the background reader is running.
    pub fn open(settings: &PortSettings) -> Result<(Self, mpsc::UnboundedReceiver<String>), BusError> {
        let port = serialport::new(&settings.path, settings.baud_rate)
            .timeout(READ_POLL)
            .open()?;
        let reader_port = port.try_clone()?;
        info!("Serial port ......: {} @ {} baud", settings.path, settings.baud_rate);

        let (bg_tx, bg_rx) = mpsc::unbounded_channel();
        let routing = Arc::new(Mutex::new(LineRouting {
            session: None,
            background: Some(bg_tx),
        }));
        let running = Arc::new(AtomicBool::new(true));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = {
            let routing = Arc::clone(&routing);
            let running = Arc::clone(&running);
            let alive = Arc::clone(&alive);
            std::thread::Builder::new()
                .name("serial-reader".to_string())
                .spawn(move || read_loop(reader_port, routing, running, alive))?
        };

        Ok((
            Self {
                writer: Mutex::new(port),
                routing,
                running,
                alive,
                reader: Some(reader),
            },
            bg_rx,
        ))
    }

    fn with_writer<F>(&self, f: F) -> Result<(), BusError>
    where
        F: FnOnce(&mut dyn SerialPort) -> std::io::Result<()>,
    {
        let mut port = self
            .writer
            .lock()
            .map_err(|_| BusError::Transport("serial writer lock poisoned".to_string()))?;
        f(port.as_mut())?;
        Ok(())
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    routing: Arc<Mutex<LineRouting>>,
    running: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
) {
    let mut framer = LineFramer::default();
    let mut buf = [0u8; 256];

    while alive.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                let lines = framer.push(&buf[..n]);
                if let Ok(mut routes) = routing.lock() {
                    for line in lines {
                        routes.route(line, running.load(Ordering::SeqCst));
                    }
                }
            }
            Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => {
                error!("Serial read failed, reader stopping: {}", e);
                reader_stopped(&routing, &alive);
                break;
            }
        }
    }
    debug!("Serial reader thread exiting");
}

/// Mark the link dead; sessions then fail with a transport error instead
/// of waiting out their timeout
fn reader_stopped(routing: &Mutex<LineRouting>, alive: &AtomicBool) {
    alive.store(false, Ordering::SeqCst);
    if let Ok(mut routes) = routing.lock() {
        routes.close();
    }
}

/// Session stream for a new subscriber; already closed when the reader
/// has stopped
fn subscribe(routing: &Mutex<LineRouting>, alive: &AtomicBool) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Ok(mut routes) = routing.lock() {
        if alive.load(Ordering::SeqCst) {
            routes.session = Some(tx);
        }
    }
    rx
}

impl Transport for SerialTransport {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        trace!("serial reader paused");
        self.running.store(false, Ordering::SeqCst);
    }

    fn start(&self) {
        trace!("serial reader started");
        // a paused session stream ends when the reader resumes
        if let Ok(mut routes) = self.routing.lock() {
            routes.session = None;
        }
        self.running.store(true, Ordering::SeqCst);
    }

    fn write_line(&self, line: &str) -> Result<(), BusError> {
        debug!("> {}", line);
        self.with_writer(|port| {
            port.write_all(line.as_bytes())?;
            port.write_all(b"\n")?;
            port.flush()
        })
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), BusError> {
        trace!("> {} raw bytes", bytes.len());
        self.with_writer(|port| {
            port.write_all(bytes)?;
            port.flush()
        })
    }

    fn read_lines(&self) -> mpsc::UnboundedReceiver<String> {
        subscribe(&self.routing, &self.alive)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                error!("Serial reader thread panicked");
            }
        }
    }
}
