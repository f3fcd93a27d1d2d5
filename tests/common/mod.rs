#![allow(dead_code)]

use async_trait::async_trait;
use jbdbms_lib::protocol::{encode_frame, Command};
use jbdbms_lib::transport::{NotificationHandler, Transport};
use jbdbms_lib::{Error, Result};
use std::sync::Mutex;

/// Captured basic info response of a 15 cell pack.
pub const BASIC_RESPONSE: [u8; 34] = [
    0xdd, 0x03, 0x00, 0x1b, 0x17, 0x00, 0x00, 0x00, 0x02, 0xd0, 0x03, 0xe8, 0x00, 0x00, 0x20, 0x78,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x48, 0x03, 0x0f, 0x02, 0x0b, 0x76, 0x0b, 0x82, 0xfb,
    0xff, 0x77,
];

pub const HARDWARE_VERSION: &[u8] = b"JBD-SP15S001";

pub fn voltages_response(cells: usize) -> Vec<u8> {
    let payload: Vec<u8> = (0..cells)
        .flat_map(|index| (3900 + index as u16).to_be_bytes())
        .collect();
    encode_frame(Command::ReadVoltages.opcode(), 0x00, &payload)
}

pub fn version_response() -> Vec<u8> {
    encode_frame(Command::ReadVersion.opcode(), 0x00, HARDWARE_VERSION)
}

/// A well behaved device answering every request in `chunk` sized notifications.
pub fn device(chunk: usize) -> impl FnMut(Command) -> Vec<Vec<u8>> + Send {
    move |command| {
        let frame = match command {
            Command::ReadBasic => BASIC_RESPONSE.to_vec(),
            Command::ReadVoltages => voltages_response(15),
            Command::ReadVersion => version_response(),
        };
        frame.chunks(chunk).map(<[u8]>::to_vec).collect()
    }
}

type Responder = Box<dyn FnMut(Command) -> Vec<Vec<u8>> + Send>;

/// In-memory transport that answers writes synchronously through the
/// subscribed handler.
pub struct MockTransport {
    responder: Mutex<Responder>,
    handler: Option<NotificationHandler>,
    connected: bool,
    /// Connect attempts that fail before the first one succeeds
    pub failing_connects: u32,
    pub connects: u32,
    pub disconnects: u32,
    pub subscribes: u32,
    pub unsubscribes: u32,
    pub writes: Vec<Vec<u8>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(Command) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            responder: Mutex::new(Box::new(responder)),
            handler: None,
            connected: false,
            failing_connects: 0,
            connects: 0,
            disconnects: 0,
            subscribes: 0,
            unsubscribes: 0,
            writes: Vec::new(),
        }
    }

    /// A device that never answers.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    pub fn written_commands(&self) -> Vec<Command> {
        self.writes
            .iter()
            .filter_map(|frame| frame.get(2).copied().and_then(Command::from_opcode))
            .collect()
    }

    pub fn notify(&self, fragment: &[u8]) {
        if let Some(handler) = &self.handler {
            handler(fragment);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connects += 1;
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            return Err(Error::transport("device out of range"));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnects += 1;
        self.connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn subscribe_notifications(&mut self, handler: NotificationHandler) -> Result<()> {
        if !self.connected {
            return Err(Error::transport("not connected"));
        }
        self.subscribes += 1;
        self.handler = Some(handler);
        Ok(())
    }

    async fn unsubscribe_notifications(&mut self) -> Result<()> {
        self.unsubscribes += 1;
        self.handler = None;
        Ok(())
    }

    async fn write_characteristic(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::transport("not connected"));
        }
        self.writes.push(data.to_vec());
        let command = data.get(2).copied().and_then(Command::from_opcode);
        if let Some(command) = command {
            let fragments = (self.responder.get_mut().unwrap())(command);
            for fragment in fragments {
                self.notify(&fragment);
            }
        }
        Ok(())
    }
}
