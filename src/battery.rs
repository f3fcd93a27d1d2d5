use crate::protocol::{
    balance_bit, BasicInfo, CellVoltages, HardwareVersion, Payload, ProtectionFlag,
    ProtectionStatus,
};
use crate::session::SnapshotConsumer;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub voltage: f32,
    pub balancing: bool,
}

/// Snapshot of a battery, merged from the responses of one read cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub address: String,
    /// Time of the last merged response
    pub timestamp: Option<DateTime<Utc>>,
    pub voltage: f32,
    pub current: f32, // negative=discharging, positive=charging
    pub capacity_remaining: f32,
    pub capacity: f32,
    pub cycles: u16,
    pub state_of_charge: u8,
    pub manufacture_date: Option<NaiveDate>,
    pub software_version: f32,
    pub switch_charge: bool,
    pub switch_discharge: bool,
    pub balance: u32,
    pub protection: Vec<ProtectionFlag>,
    pub alarm: bool,
    pub string_count: u8,
    pub temperature_count: u8,
    pub temperatures: Vec<f32>,
    pub unknown: Vec<u8>,
    pub voltages: Vec<f32>,
    pub cells: Vec<Cell>,
    pub hardware_version: Option<String>,
}

/// Decodes the packed production date: 7 bits year since 2000, 4 bits month, 5 bits day.
pub fn manufacture_date(code: u16) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        2000 + i32::from(code >> 9),
        u32::from((code >> 5) & 0x0f),
        u32::from(code & 0x1f),
    )
}

/// Decodes the BCD-like software version byte, `0x21` is version 2.1.
pub fn software_version(raw: u8) -> f32 {
    f32::from((raw >> 4) & 0x0f) + f32::from(raw & 0x0f) / 10.0
}

impl Battery {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    fn apply_basic(&mut self, basic: BasicInfo) {
        let protection = ProtectionStatus::jbd(basic.protection);
        self.voltage = basic.voltage;
        self.current = basic.current;
        self.capacity_remaining = basic.capacity_remaining;
        self.capacity = basic.capacity;
        self.cycles = basic.cycles;
        self.state_of_charge = basic.state_of_charge;
        self.manufacture_date = manufacture_date(basic.manufacture_date_code);
        self.software_version = software_version(basic.software_version);
        self.switch_charge = basic.switch_state & 0x01 != 0;
        self.switch_discharge = basic.switch_state & 0x02 != 0;
        self.balance = basic.balance;
        self.protection = protection.active().collect();
        self.alarm = protection.alarm();
        self.string_count = basic.string_count;
        self.temperature_count = basic.ntc_count;
        self.temperatures = basic.temperatures;
        self.unknown = basic.unknown;
    }

    fn apply_voltages(&mut self, voltages: CellVoltages) {
        let count = match self.string_count {
            // No basic info yet, trust the voltage list
            0 => voltages.0.len(),
            n => usize::from(n).min(voltages.0.len()),
        };
        if count < usize::from(self.string_count) {
            log::warn!(
                "Expected {} cell voltages, received {}",
                self.string_count,
                voltages.0.len()
            );
        }
        self.cells = voltages.0[..count]
            .iter()
            .enumerate()
            .map(|(index, voltage)| Cell {
                voltage: *voltage,
                balancing: balance_bit(self.balance, index),
            })
            .collect();
        self.voltages = voltages.0;
    }

    fn apply_version(&mut self, version: HardwareVersion) {
        self.hardware_version = Some(version.to_string());
    }

    pub fn protection_status(&self) -> ProtectionStatus {
        let raw = self
            .protection
            .iter()
            .fold(0u16, |raw, flag| raw | 1 << flag.bit());
        ProtectionStatus::jbd(raw)
    }
}

impl SnapshotConsumer for Battery {
    fn on_payload(&mut self, payload: Payload) {
        log::debug!("Merging {} response", payload.command());
        match payload {
            Payload::Basic(basic) => self.apply_basic(basic),
            Payload::Voltages(voltages) => self.apply_voltages(voltages),
            Payload::Version(version) => self.apply_version(version),
        }
        self.timestamp = Some(Utc::now());
    }
}
