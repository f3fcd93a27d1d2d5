//! Request/response state machine.
//!
//! One request is outstanding at a time. The notification handler and the
//! polling waiter share the reassembly buffer and the state through a single
//! mutex; the lock is never held across an await point.

use crate::config::SessionConfig;
use crate::protocol::{build_command, Command, Payload};
use crate::reassembly::ReassemblyBuffer;
use crate::transport::{NotificationHandler, Transport};
use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Awaiting(Command),
    /// The end marker arrived while awaiting the command, the frame is ready.
    Finished(Command),
    /// The last request timed out.
    Retry,
}

impl SessionState {
    /// The command of the request that is still outstanding, if any.
    pub fn pending(&self) -> Option<Command> {
        match self {
            SessionState::Awaiting(command) | SessionState::Finished(command) => Some(*command),
            SessionState::Idle | SessionState::Retry => None,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: SessionState,
    buffer: ReassemblyBuffer,
    frame: Option<Vec<u8>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            buffer: ReassemblyBuffer::new(),
            frame: None,
        }
    }

    fn on_notification(&mut self, fragment: &[u8]) {
        log::trace!("RX notification: {fragment:02X?}");
        let SessionState::Awaiting(command) = self.state else {
            log::debug!(
                "Dropping {} unsolicited bytes in state {:?}",
                fragment.len(),
                self.state
            );
            return;
        };
        self.buffer.append(fragment);
        if self.buffer.is_closed() {
            let frame = self.buffer.take();
            log::trace!("RX {command} frame: {frame:02X?}");
            // Late response to an abandoned request
            if let Some(&opcode) = frame.get(1) {
                if opcode != command.opcode() {
                    log::debug!(
                        "Dropping response with opcode {opcode:02X} while awaiting {command}"
                    );
                    return;
                }
            }
            self.frame = Some(frame);
            self.state = SessionState::Finished(command);
        }
    }
}

/// Drives single requests over a [`Transport`].
#[derive(Debug, Clone)]
pub struct RequestEngine {
    shared: Arc<Mutex<Shared>>,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl RequestEngine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::new())),
            poll_interval: config.poll_interval,
            poll_attempts: config.poll_attempts,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // The state stays consistent even if a handler panicked
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// A handler to pass to [`Transport::subscribe_notifications`].
    pub fn notification_handler(&self) -> NotificationHandler {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |fragment: &[u8]| {
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_notification(fragment)
        })
    }

    pub fn on_notification(&self, fragment: &[u8]) {
        self.lock().on_notification(fragment);
    }

    /// Abandons any outstanding request.
    pub fn reset(&self) {
        let mut shared = self.lock();
        if let Some(pending) = shared.state.pending() {
            log::debug!("Abandoning outstanding {pending} request");
        }
        *shared = Shared::new();
    }

    /// Sends the request frame for `command`.
    ///
    /// Fails with [`Error::RequestPending`] while another request has not
    /// been consumed by [`RequestEngine::await_terminal`].
    pub async fn issue<T>(&self, transport: &mut T, command: Command) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        {
            let mut shared = self.lock();
            if let Some(pending) = shared.state.pending() {
                log::error!("Cannot issue {command} request while {pending} request is outstanding");
                return Err(Error::RequestPending {
                    requested: command,
                    pending,
                });
            }
            shared.buffer = ReassemblyBuffer::new();
            shared.frame = None;
            shared.state = SessionState::Awaiting(command);
        }

        let request = build_command(command);
        log::trace!("TX {command} request: {request:02X?}");
        if let Err(err) = transport.write_characteristic(&request).await {
            self.lock().state = SessionState::Idle;
            return Err(err);
        }
        Ok(())
    }

    /// Polls until the response to `command` is complete.
    ///
    /// Gives up after `poll_attempts` polls, leaving the engine in
    /// [`SessionState::Retry`].
    pub async fn await_terminal(&self, command: Command) -> Result<Vec<u8>> {
        let mut polls = 0;
        loop {
            {
                let mut shared = self.lock();
                if shared.state == SessionState::Finished(command) {
                    shared.state = SessionState::Idle;
                    return Ok(shared.frame.take().unwrap_or_default());
                }
                if polls >= self.poll_attempts {
                    let waited = self.poll_interval * self.poll_attempts;
                    log::warn!(
                        "No {command} response after {waited:?}, {} bytes buffered",
                        shared.buffer.len()
                    );
                    shared.state = SessionState::Retry;
                    return Err(Error::Timeout { command, waited });
                }
            }
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
        }
    }

    /// Issues `command`, waits for the response and decodes it.
    pub async fn request<T>(&self, transport: &mut T, command: Command) -> Result<Payload>
    where
        T: Transport + ?Sized,
    {
        log::debug!("Request {command}");
        self.issue(transport, command).await?;
        let frame = self.await_terminal(command).await?;
        Payload::decode(&frame, command).map_err(|source| Error::Decode { command, source })
    }
}
