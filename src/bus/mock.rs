/*
 *  bus/mock.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mock transport for testing without hardware
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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::bus::error::BusError;
use crate::bus::transport::Transport;

/// One write as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Written {
    Line(String),
    Bytes(Vec<u8>),
}

/// Internal state of the mock (shared for inspection in tests)
#[derive(Debug, Default)]
pub struct MockTransportState {
    /// Every write in order
    pub written: Vec<Written>,

    /// Replies emitted after a given line is written
    pub replies: HashMap<String, Vec<String>>,

    /// Lines queued for the next subscriber, e.g. stale chatter
    pub pending: Vec<String>,

    pub running: bool,
    pub pause_count: usize,
    pub start_count: usize,

    /// Simulate failures (for error testing)
    pub simulate_write_failure: bool,

    subscriber: Option<mpsc::UnboundedSender<String>>,
}

/// Mock transport
///
/// Records every line and byte written and answers scripted commands, so
/// sessions and device modules can be exercised without a microcontroller.
/// A command with no scripted reply is met with silence.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a mock whose background reader is running
    pub fn new() -> Self {
        let state = MockTransportState {
            running: true,
            ..Default::default()
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reply with `lines` whenever `trigger` is written
    pub fn reply_to(&self, trigger: &str, lines: &[&str]) -> &Self {
        self.lock()
            .replies
            .insert(trigger.to_string(), lines.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Queue lines the next subscriber sees before anything it triggers
    pub fn push_pending(&self, line: &str) {
        self.lock().pending.push(line.to_string());
    }

    /// Get reference to state for inspection in tests
    pub fn state(&self) -> Arc<Mutex<MockTransportState>> {
        Arc::clone(&self.state)
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().simulate_write_failure = fail;
    }

    /// All lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lock()
            .written
            .iter()
            .filter_map(|w| match w {
                Written::Line(l) => Some(l.clone()),
                Written::Bytes(_) => None,
            })
            .collect()
    }

    /// All raw bytes written so far, concatenated
    pub fn bytes(&self) -> Vec<u8> {
        self.lock()
            .written
            .iter()
            .filter_map(|w| match w {
                Written::Bytes(b) => Some(b.as_slice()),
                Written::Line(_) => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn written(&self) -> Vec<Written> {
        self.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }
}

impl Transport for MockTransport {
    fn is_running(&self) -> bool {
        self.lock().running
    }

    fn pause(&self) {
        let mut state = self.lock();
        state.running = false;
        state.pause_count += 1;
    }

    fn start(&self) {
        let mut state = self.lock();
        state.running = true;
        state.start_count += 1;
        state.subscriber = None;
    }

    fn write_line(&self, line: &str) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.simulate_write_failure {
            return Err(BusError::Transport("simulated write failure".to_string()));
        }
        state.written.push(Written::Line(line.to_string()));

        let replies = state.replies.get(line).cloned().unwrap_or_default();
        if let Some(tx) = state.subscriber.as_ref() {
            for reply in replies {
                let _ = tx.send(reply);
            }
        }
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.simulate_write_failure {
            return Err(BusError::Transport("simulated write failure".to_string()));
        }
        state.written.push(Written::Bytes(bytes.to_vec()));
        Ok(())
    }

    fn read_lines(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for line in state.pending.drain(..) {
            let _ = tx.send(line);
        }
        state.subscriber = Some(tx);
        rx
    }
}
