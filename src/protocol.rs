use crate::DecodeError;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Baud rate of the BMS RS485 port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Silence on the link that ends a burst.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(100);

/// Start sequence of frames sent *to* the BMS (activation, register reads).
///
/// Telemetry frames are recognized by [`FrameConfig::header`], which is a different pair.
pub const COMMAND_HEADER: [u8; 2] = [0x4e, 0x57];

/// Header bytes, declared length, command code and register pair.
pub const HEADER_LENGTH: usize = 6;
const LENGTH_OFFSET: usize = 2;
const COMMAND_OFFSET: usize = 3;
const REGISTER_OFFSET: usize = 4;
// The declared length counts every byte after the length byte itself
const LENGTH_PREFIX: usize = LENGTH_OFFSET + 1;

pub const CELL_COUNT: usize = 24;
const ALARM_PAIRS: usize = 9;
// 12 leading field pairs, then one pair per cell and one pair per alarm
pub const PAYLOAD_LENGTH: usize = (12 + CELL_COUNT + ALARM_PAIRS) * 2;
pub const CHECKSUM_LENGTH: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn read(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn write(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Structural constants of the telemetry frame.
///
/// The defaults match the active-upload frame of a JK BMS on the RS485 display port. Device
/// families differ in header and byte order, so every value can be overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FrameConfig {
    pub header: [u8; 2],
    /// Smallest declared length accepted by the scanner.
    pub min_length: u8,
    pub command: u8,
    /// Register pair marking a "read all" reply.
    pub register: [u8; 2],
    pub byte_order: ByteOrder,
    /// Verify the trailing checksum when the frame carries one.
    pub verify_checksum: bool,
    /// Reject out-of-range field values instead of passing them through.
    pub strict: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            header: [0xa5, 0x5a],
            min_length: 0x5d,
            command: 0x82,
            register: [0x10, 0x00],
            byte_order: ByteOrder::Little,
            verify_checksum: true,
            strict: false,
        }
    }
}

/// Arithmetic sum (mod 2^16) of all bytes.
pub fn calc_checksum(buffer: &[u8]) -> u16 {
    buffer
        .iter()
        .fold(0u16, |checksum, b| checksum.wrapping_add(u16::from(*b)))
}

/// A header match inside a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFrame {
    /// Offset of the first header byte.
    pub start: usize,
    /// Length byte as sent on the wire.
    pub declared_length: u8,
}

impl CandidateFrame {
    /// Number of bytes the whole frame occupies on the wire.
    pub fn frame_length(&self) -> usize {
        LENGTH_PREFIX + usize::from(self.declared_length)
    }

    pub fn end(&self) -> usize {
        self.start + self.frame_length()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameScanner {
    config: FrameConfig,
}

impl FrameScanner {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    fn header_matches(&self, header: &[u8]) -> bool {
        header[0] == self.config.header[0]
            && header[1] == self.config.header[1]
            && header[LENGTH_OFFSET] >= self.config.min_length
            && header[COMMAND_OFFSET] == self.config.command
            && header[REGISTER_OFFSET..HEADER_LENGTH] == self.config.register
    }

    /// Looks for the first valid header at or after `start`.
    ///
    /// Any mismatch advances the scan position by exactly one byte, so a frame starting inside a
    /// rejected candidate is still found. Returns `None` once fewer than [`HEADER_LENGTH`] bytes
    /// remain.
    pub fn scan(&self, buffer: &[u8], start: usize) -> Option<CandidateFrame> {
        let mut index = start;
        while index + HEADER_LENGTH <= buffer.len() {
            if self.header_matches(&buffer[index..index + HEADER_LENGTH]) {
                if index > start {
                    log::debug!("Resync - skipped {} bytes before header", index - start);
                }
                return Some(CandidateFrame {
                    start: index,
                    declared_length: buffer[index + LENGTH_OFFSET],
                });
            }
            index += 1;
        }
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlarmFlags {
    pub system: bool,
    pub over_discharge: bool,
    pub over_charge: bool,
    pub over_current: bool,
    pub mos_overheat: bool,
    pub battery_overheat: bool,
    pub short_circuit: bool,
    pub communication_loss: bool,
    pub equalizing_line: bool,
    pub cell_count_mismatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Alarm {
    System,
    OverDischarge,
    OverCharge,
    OverCurrent,
    MosOverheat,
    BatteryOverheat,
    ShortCircuit,
    CommunicationLoss,
    EqualizingLine,
    CellCountMismatch,
}

impl AlarmFlags {
    pub fn any(&self) -> bool {
        !self.active().is_empty()
    }

    /// Raised alarms in wire order.
    pub fn active(&self) -> Vec<Alarm> {
        [
            (self.system, Alarm::System),
            (self.over_discharge, Alarm::OverDischarge),
            (self.over_charge, Alarm::OverCharge),
            (self.over_current, Alarm::OverCurrent),
            (self.mos_overheat, Alarm::MosOverheat),
            (self.battery_overheat, Alarm::BatteryOverheat),
            (self.short_circuit, Alarm::ShortCircuit),
            (self.communication_loss, Alarm::CommunicationLoss),
            (self.equalizing_line, Alarm::EqualizingLine),
            (self.cell_count_mismatch, Alarm::CellCountMismatch),
        ]
        .into_iter()
        .filter_map(|(raised, alarm)| raised.then_some(alarm))
        .collect()
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Alarm::System => write!(f, "System alarm"),
            Alarm::OverDischarge => write!(f, "Over discharge alarm"),
            Alarm::OverCharge => write!(f, "Over charge alarm"),
            Alarm::OverCurrent => write!(f, "Over current alarm"),
            Alarm::MosOverheat => write!(f, "MOS overtemperature alarm"),
            Alarm::BatteryOverheat => write!(f, "Battery overtemperature alarm"),
            Alarm::ShortCircuit => write!(f, "Short circuit alarm"),
            Alarm::CommunicationLoss => write!(f, "Communication failure alarm"),
            Alarm::EqualizingLine => write!(f, "Equalizing line alarm"),
            Alarm::CellCountMismatch => write!(f, "Cell count mismatch alarm"),
        }
    }
}

/// One decoded telemetry frame.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BmsState {
    pub voltage: f32,
    pub current: f32, // negative=discharging, positive=charging
    pub battery_level: u16,
    pub max_cell_voltage_diff: u16, // mV
    pub mos_temperature: i16,
    pub battery_temperature: i16,
    pub average_cell_voltage: u16, // mV
    pub balance_switch_on: bool,
    pub charge_switch_on: bool,
    pub discharge_switch_on: bool,
    pub cell_voltages: [u16; CELL_COUNT], // mV, index 0 = cell 1
    pub alarms: AlarmFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Integrity {
    /// The trailing checksum was present and matched.
    Verified,
    /// Best effort: the frame carried no checksum or verification is disabled.
    Unverified,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Decoded {
    pub state: BmsState,
    pub integrity: Integrity,
}

impl Decoded {
    pub fn is_verified(&self) -> bool {
        self.integrity == Integrity::Verified
    }
}

/// Positional reader over the 2-byte field pairs following the header.
struct Fields<'a> {
    data: &'a [u8],
    position: usize,
    byte_order: ByteOrder,
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8], byte_order: ByteOrder) -> Self {
        Self {
            data,
            position: 0,
            byte_order,
        }
    }

    fn pair(&mut self) -> [u8; 2] {
        let pair = [self.data[self.position], self.data[self.position + 1]];
        self.position += 2;
        pair
    }

    fn u16(&mut self) -> u16 {
        let pair = self.pair();
        self.byte_order.read(pair)
    }

    fn i16(&mut self) -> i16 {
        self.u16() as i16
    }

    // Flag fields only carry meaning in the second byte of the pair
    fn flag(&mut self) -> u8 {
        self.pair()[1]
    }

    fn skip(&mut self) {
        self.position += 2;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    config: FrameConfig,
}

impl FrameDecoder {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Decodes the frame found by [`FrameScanner::scan`] in `buffer`.
    ///
    /// Nothing is returned unless every field was extracted and, when present and enabled, the
    /// checksum matched.
    pub fn decode(&self, buffer: &[u8], frame: CandidateFrame) -> Result<Decoded, DecodeError> {
        let required = frame.frame_length();
        let available = buffer.len().saturating_sub(frame.start);
        if available < required {
            log::debug!(
                "Frame truncated - required={} available={}",
                required,
                available
            );
            return Err(DecodeError::Truncated {
                required,
                available,
            });
        }
        if required < HEADER_LENGTH + PAYLOAD_LENGTH {
            return Err(DecodeError::MalformedField {
                field: "length",
                value: u16::from(frame.declared_length),
            });
        }

        let bytes = &buffer[frame.start..frame.end()];
        let integrity = self.check_integrity(bytes)?;
        let state = self.decode_fields(&bytes[HEADER_LENGTH..])?;
        log::debug!(
            "Decoded frame ({:?}) voltage={:.2} current={:.1} level={}",
            integrity,
            state.voltage,
            state.current,
            state.battery_level
        );
        Ok(Decoded { state, integrity })
    }

    fn check_integrity(&self, bytes: &[u8]) -> Result<Integrity, DecodeError> {
        if !self.config.verify_checksum
            || bytes.len() < HEADER_LENGTH + PAYLOAD_LENGTH + CHECKSUM_LENGTH
        {
            return Ok(Integrity::Unverified);
        }
        let (covered, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LENGTH);
        let calculated = calc_checksum(covered);
        let received = self.config.byte_order.read([trailer[0], trailer[1]]);
        if calculated != received {
            log::warn!(
                "Invalid checksum - calculated={:04X} received={:04X} buffer={:02X?}",
                calculated,
                received,
                bytes
            );
            return Err(DecodeError::ChecksumMismatch {
                calculated,
                received,
            });
        }
        Ok(Integrity::Verified)
    }

    fn decode_fields(&self, payload: &[u8]) -> Result<BmsState, DecodeError> {
        let mut fields = Fields::new(payload, self.config.byte_order);

        let voltage = f32::from(fields.u16()) / 100.0;
        let current = f32::from(fields.i16()) / 10.0;
        fields.skip();
        let battery_level = fields.u16();
        let max_cell_voltage_diff = fields.u16();
        let mos_temperature = fields.i16();
        let battery_temperature = fields.i16();
        let system_alarm = fields.flag();
        let average_cell_voltage = fields.u16();
        let balance_switch = fields.flag();
        let charge_switch = fields.flag();
        let discharge_switch = fields.flag();

        let mut cell_voltages = [0u16; CELL_COUNT];
        for (n_cell, cell) in cell_voltages.iter_mut().enumerate() {
            *cell = fields.u16();
            log::trace!("Cell #{} mV={}", n_cell + 1, cell);
        }

        let alarms = AlarmFlags {
            system: system_alarm != 0,
            over_discharge: fields.flag() != 0,
            over_charge: fields.flag() != 0,
            over_current: fields.flag() != 0,
            mos_overheat: fields.flag() != 0,
            battery_overheat: fields.flag() != 0,
            short_circuit: fields.flag() != 0,
            communication_loss: fields.flag() != 0,
            equalizing_line: fields.flag() != 0,
            cell_count_mismatch: fields.flag() != 0,
        };

        if self.config.strict {
            validate_range("battery_level", battery_level, 100)?;
            validate_range("balance_switch", balance_switch.into(), 1)?;
            validate_range("charge_switch", charge_switch.into(), 1)?;
            validate_range("discharge_switch", discharge_switch.into(), 1)?;
        }

        Ok(BmsState {
            voltage,
            current,
            battery_level,
            max_cell_voltage_diff,
            mos_temperature,
            battery_temperature,
            average_cell_voltage,
            balance_switch_on: balance_switch != 0,
            charge_switch_on: charge_switch != 0,
            discharge_switch_on: discharge_switch != 0,
            cell_voltages,
            alarms,
        })
    }
}

fn validate_range(field: &'static str, value: u16, max: u16) -> Result<(), DecodeError> {
    if value > max {
        log::warn!("Value out of range - field={} value={}", field, value);
        return Err(DecodeError::MalformedField { field, value });
    }
    Ok(())
}
