use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const START_BYTE: u8 = 0xdd;
/// Second start byte of every host request.
pub const READ_MARKER: u8 = 0xa5;
pub const END_BYTE: u8 = 0x77;

/// start(2) + code(1) + length(1) + checksum(2) + end(1)
pub const MIN_FRAME_LENGTH: usize = 7;
pub const MAX_PAYLOAD_LENGTH: usize = u8::MAX as usize;

// voltage .. thermistor count, see BasicInfo::decode
const BASIC_FIXED_LENGTH: usize = 23;
const STATUS_OK: u8 = 0x00;

// Temperatures are reported in 0.1 K
const KELVIN_OFFSET_DECI: i32 = 2731;

macro_rules! read_bit {
    ($value:expr,$position:expr) => {
        ($value >> $position) & 1 != 0
    };
}

/// The read requests understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    ReadBasic = 0x03,
    ReadVoltages = 0x04,
    ReadVersion = 0x05,
}

impl Command {
    pub const ALL: [Command; 3] = [
        Command::ReadBasic,
        Command::ReadVoltages,
        Command::ReadVersion,
    ];

    pub const fn opcode(self) -> u8 {
        self as u8
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.opcode() == opcode)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::ReadBasic => write!(f, "basic info"),
            Command::ReadVoltages => write!(f, "cell voltages"),
            Command::ReadVersion => write!(f, "version"),
        }
    }
}

/// Two's complement of the 16 bit byte sum, so that `sum + checksum == 0 (mod 2^16)`.
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    0u16.wrapping_sub(sum)
}

/// Builds a complete frame.
///
/// `marker` is the second start byte ([`READ_MARKER`] for requests, the opcode
/// for responses) and `code` the opcode of a request or the status of a
/// response. Payloads longer than [`MAX_PAYLOAD_LENGTH`] are cut off.
pub fn encode_frame(marker: u8, code: u8, payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(MAX_PAYLOAD_LENGTH)];
    let mut buffer = Vec::with_capacity(MIN_FRAME_LENGTH + payload.len());
    buffer.push(START_BYTE);
    buffer.push(marker);
    buffer.push(code);
    buffer.push(payload.len() as u8);
    buffer.extend_from_slice(payload);
    let crc = checksum(&buffer[2..]);
    buffer.extend_from_slice(&crc.to_be_bytes());
    buffer.push(END_BYTE);
    buffer
}

/// Builds the request frame for `command`. Requests never carry a payload.
pub fn build_command(command: Command) -> Vec<u8> {
    encode_frame(READ_MARKER, command.opcode(), &[])
}

fn validate_len(buffer: &[u8], required: usize) -> Result<(), DecodeError> {
    if buffer.len() < required {
        log::warn!(
            "Invalid buffer size - required={} received={}",
            required,
            buffer.len()
        );
        return Err(DecodeError::Truncated {
            required,
            received: buffer.len(),
        });
    }
    Ok(())
}

fn validate_checksum(frame: &[u8]) -> Result<(), DecodeError> {
    let crc_offset = frame.len() - 3;
    let calculated = checksum(&frame[2..crc_offset]);
    let received = u16::from_be_bytes([frame[crc_offset], frame[crc_offset + 1]]);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={:04X} received={:04X} frame={:02X?}",
            calculated,
            received,
            frame
        );
        return Err(DecodeError::BadChecksum {
            calculated,
            received,
        });
    }
    Ok(())
}

/// A frame whose markers, length and checksum have been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// Second start byte: [`READ_MARKER`] on requests, the opcode on responses.
    pub marker: u8,
    /// Opcode on requests, status on responses.
    pub code: u8,
    pub payload: &'a [u8],
}

impl<'a> RawFrame<'a> {
    pub fn parse(frame: &'a [u8]) -> Result<Self, DecodeError> {
        validate_len(frame, MIN_FRAME_LENGTH)?;
        let (start, end) = (frame[0], frame[frame.len() - 1]);
        if start != START_BYTE || end != END_BYTE {
            log::warn!("Invalid frame markers - start={start:02X} end={end:02X}");
            return Err(DecodeError::BadMarker { start, end });
        }
        let declared = usize::from(frame[3]);
        validate_len(frame, MIN_FRAME_LENGTH + declared)?;
        let received = frame.len() - MIN_FRAME_LENGTH;
        if received > declared {
            log::warn!("Frame longer than declared - declared={declared} received={received}");
            return Err(DecodeError::LengthMismatch { declared, received });
        }
        validate_checksum(frame)?;
        Ok(Self {
            marker: frame[1],
            code: frame[2],
            payload: &frame[4..4 + declared],
        })
    }
}

/// Verifies a response frame for `expected` and returns its payload.
fn response_payload(frame: &[u8], expected: Command) -> Result<&[u8], DecodeError> {
    let raw = RawFrame::parse(frame)?;
    if raw.marker != expected.opcode() {
        log::warn!(
            "Unexpected response - expected={:02X} received={:02X}",
            expected.opcode(),
            raw.marker
        );
        return Err(DecodeError::UnexpectedCommand {
            expected: expected.opcode(),
            received: raw.marker,
        });
    }
    if raw.code != STATUS_OK {
        return Err(DecodeError::Rejected(raw.code));
    }
    Ok(raw.payload)
}

fn be_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

/// Reads the balance bit of cell `index` (zero based) from the 4 balance bytes.
///
/// The first word covers cells 1-16, the second word cells 17-32.
pub fn balance_bit(balance: u32, index: usize) -> bool {
    let word = match index {
        0..=15 => balance >> 16,
        16..=31 => balance & 0xffff,
        _ => return false,
    };
    read_bit!(word, index % 16)
}

/// Converts a temperature in 0.1 K to °C.
pub fn deci_kelvin_to_celsius(raw: u16) -> f32 {
    (i32::from(raw) - KELVIN_OFFSET_DECI) as f32 / 10.0
}

/// Response to [`Command::ReadBasic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    /// Pack voltage in V (transmitted in 10 mV)
    pub voltage: f32,
    /// Pack current in A, negative while discharging (transmitted in 10 mA)
    pub current: f32,
    /// Remaining capacity in Ah (transmitted in 10 mAh)
    pub capacity_remaining: f32,
    /// Nominal capacity in Ah (transmitted in 10 mAh)
    pub capacity: f32,
    pub cycles: u16,
    pub manufacture_date_code: u16,
    /// Low word (cells 1-16) followed by high word (cells 17-32)
    pub balance: u32,
    pub protection: u16,
    pub software_version: u8,
    pub state_of_charge: u8,
    pub switch_state: u8,
    pub string_count: u8,
    pub ntc_count: u8,
    /// Thermistor readings in °C
    pub temperatures: Vec<f32>,
    /// Trailing bytes with unknown meaning, kept verbatim
    pub unknown: Vec<u8>,
}

impl BasicInfo {
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let payload = response_payload(frame, Command::ReadBasic)?;
        validate_len(payload, BASIC_FIXED_LENGTH)?;
        let ntc_count = payload[22];
        let temperatures_end = BASIC_FIXED_LENGTH + 2 * usize::from(ntc_count);
        validate_len(payload, temperatures_end)?;

        let temperatures = payload[BASIC_FIXED_LENGTH..temperatures_end]
            .chunks_exact(2)
            .map(|raw| deci_kelvin_to_celsius(u16::from_be_bytes([raw[0], raw[1]])))
            .collect();

        Ok(Self {
            voltage: be_u16(payload, 0) as f32 / 100.0,
            current: be_u16(payload, 2) as i16 as f32 / 100.0,
            capacity_remaining: be_u16(payload, 4) as f32 / 100.0,
            capacity: be_u16(payload, 6) as f32 / 100.0,
            cycles: be_u16(payload, 8),
            manufacture_date_code: be_u16(payload, 10),
            balance: u32::from_be_bytes([payload[12], payload[13], payload[14], payload[15]]),
            protection: be_u16(payload, 16),
            software_version: payload[18],
            state_of_charge: payload[19],
            switch_state: payload[20],
            string_count: payload[21],
            ntc_count,
            temperatures,
            unknown: payload[temperatures_end..].to_vec(),
        })
    }

    /// Whether cell `index` (zero based) is currently being balanced.
    pub fn is_balancing(&self, index: usize) -> bool {
        balance_bit(self.balance, index)
    }

    pub fn protection_status(&self) -> ProtectionStatus {
        ProtectionStatus::jbd(self.protection)
    }
}

/// Response to [`Command::ReadVoltages`]: one voltage in V per string, in cell order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellVoltages(pub Vec<f32>);

impl CellVoltages {
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let payload = response_payload(frame, Command::ReadVoltages)?;
        // Two bytes per cell
        validate_len(payload, payload.len().next_multiple_of(2))?;
        let voltages = payload
            .chunks_exact(2)
            .enumerate()
            .map(|(n_cell, raw)| {
                let volt = u16::from_be_bytes([raw[0], raw[1]]) as f32 / 1000.0;
                log::trace!("Cell #{} volt={}", n_cell + 1, volt);
                volt
            })
            .collect();
        Ok(Self(voltages))
    }
}

/// Response to [`Command::ReadVersion`]: the hardware version string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareVersion(pub Vec<u8>);

impl HardwareVersion {
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self(response_payload(frame, Command::ReadVersion)?.to_vec()))
    }
}

impl fmt::Display for HardwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A decoded response, tagged by the request that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Basic(BasicInfo),
    Voltages(CellVoltages),
    Version(HardwareVersion),
}

impl Payload {
    /// Decodes `frame` as the response to `command`.
    ///
    /// The frame does not say which shape it carries, so the caller has to
    /// pass the command that is outstanding.
    pub fn decode(frame: &[u8], command: Command) -> Result<Self, DecodeError> {
        match command {
            Command::ReadBasic => BasicInfo::decode(frame).map(Payload::Basic),
            Command::ReadVoltages => CellVoltages::decode(frame).map(Payload::Voltages),
            Command::ReadVersion => HardwareVersion::decode(frame).map(Payload::Version),
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Payload::Basic(_) => Command::ReadBasic,
            Payload::Voltages(_) => Command::ReadVoltages,
            Payload::Version(_) => Command::ReadVersion,
        }
    }
}

/// One bit of the protection bitmask, named by its bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtectionFlag {
    MonomerOvervoltage = 0,
    MonomerUndervoltage = 1,
    BatteryOvervoltage = 2,
    BatteryUndervoltage = 3,
    ChargeOvertemp = 4,
    ChargeUndertemp = 5,
    DischargeOvertemp = 6,
    DischargeUndertemp = 7,
    ChargeOvercurrent = 8,
    DischargeOvercurrent = 9,
    ShortCircuit = 10,
    HardwareError = 11,
    SoftwareSwitchLock = 12,
}

impl ProtectionFlag {
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

/// Flags every BMS of this protocol family reports.
pub const BASE_PROTECTION_FLAGS: &[ProtectionFlag] = &[
    ProtectionFlag::BatteryOvervoltage,
    ProtectionFlag::BatteryUndervoltage,
    ProtectionFlag::ChargeOvertemp,
    ProtectionFlag::ChargeUndertemp,
    ProtectionFlag::DischargeOvertemp,
    ProtectionFlag::DischargeUndertemp,
    ProtectionFlag::ChargeOvercurrent,
    ProtectionFlag::DischargeOvercurrent,
];

/// Flags defined by JBD boards.
pub const JBD_PROTECTION_FLAGS: &[ProtectionFlag] = &[
    ProtectionFlag::MonomerOvervoltage,
    ProtectionFlag::MonomerUndervoltage,
    ProtectionFlag::BatteryOvervoltage,
    ProtectionFlag::BatteryUndervoltage,
    ProtectionFlag::ChargeOvertemp,
    ProtectionFlag::ChargeUndertemp,
    ProtectionFlag::DischargeOvertemp,
    ProtectionFlag::DischargeUndertemp,
    ProtectionFlag::ChargeOvercurrent,
    ProtectionFlag::DischargeOvercurrent,
    ProtectionFlag::ShortCircuit,
    ProtectionFlag::HardwareError,
    ProtectionFlag::SoftwareSwitchLock,
];

/// The protection bitmask, interpreted through a table of defined flags.
///
/// Bits that are not part of the table are ignored by every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionStatus {
    raw: u16,
    defined: &'static [ProtectionFlag],
}

impl ProtectionStatus {
    pub fn new(raw: u16, defined: &'static [ProtectionFlag]) -> Self {
        Self { raw, defined }
    }

    pub fn jbd(raw: u16) -> Self {
        Self::new(raw, JBD_PROTECTION_FLAGS)
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    pub fn is_set(&self, flag: ProtectionFlag) -> bool {
        self.defined.contains(&flag) && read_bit!(self.raw, flag.bit())
    }

    pub fn active(&self) -> impl Iterator<Item = ProtectionFlag> + '_ {
        self.defined.iter().copied().filter(|flag| self.is_set(*flag))
    }

    /// `true` if any defined flag is set.
    pub fn alarm(&self) -> bool {
        self.active().next().is_some()
    }
}

impl fmt::Display for ProtectionFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtectionFlag::MonomerOvervoltage => write!(f, "Cell overvoltage protection"),
            ProtectionFlag::MonomerUndervoltage => write!(f, "Cell undervoltage protection"),
            ProtectionFlag::BatteryOvervoltage => write!(f, "Pack overvoltage protection"),
            ProtectionFlag::BatteryUndervoltage => write!(f, "Pack undervoltage protection"),
            ProtectionFlag::ChargeOvertemp => write!(f, "Charging overtemperature protection"),
            ProtectionFlag::ChargeUndertemp => write!(f, "Charging undertemperature protection"),
            ProtectionFlag::DischargeOvertemp => {
                write!(f, "Discharging overtemperature protection")
            }
            ProtectionFlag::DischargeUndertemp => {
                write!(f, "Discharging undertemperature protection")
            }
            ProtectionFlag::ChargeOvercurrent => write!(f, "Charge overcurrent protection"),
            ProtectionFlag::DischargeOvercurrent => write!(f, "Discharge overcurrent protection"),
            ProtectionFlag::ShortCircuit => write!(f, "Short circuit protection"),
            ProtectionFlag::HardwareError => write!(f, "Front-end IC error"),
            ProtectionFlag::SoftwareSwitchLock => write!(f, "MOSFET software lock"),
        }
    }
}
