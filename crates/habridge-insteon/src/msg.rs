//! Decoded PLM messages and serial stream reassembly

use crate::error::FieldError;
use crate::schema::{self, Direction, FieldType, FrameSize, MsgDefinition};
use crate::{InsteonAddress, InsteonError, Result, ACK, NAK, START_BYTE};
use bytes::{Buf, BytesMut};
use std::fmt;
use std::time::Duration;
use tracing::{trace, warn};

/// Default spacing after a message before the next one goes to the same device
pub const DEFAULT_QUIET_TIME: Duration = Duration::from_millis(1000);

/// Message type from the top three bits of `messageFlags`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Direct,
    AckOfDirect,
    AllLinkCleanup,
    AllLinkCleanupAck,
    Broadcast,
    NakOfDirect,
    AllLinkBroadcast,
    AllLinkCleanupNak,
}

impl MsgType {
    pub fn from_flags(flags: u8) -> Self {
        match flags & 0xE0 {
            0x00 => MsgType::Direct,
            0x20 => MsgType::AckOfDirect,
            0x40 => MsgType::AllLinkCleanup,
            0x60 => MsgType::AllLinkCleanupAck,
            0x80 => MsgType::Broadcast,
            0xA0 => MsgType::NakOfDirect,
            0xC0 => MsgType::AllLinkBroadcast,
            _ => MsgType::AllLinkCleanupNak,
        }
    }

    pub fn flags(&self) -> u8 {
        match self {
            MsgType::Direct => 0x00,
            MsgType::AckOfDirect => 0x20,
            MsgType::AllLinkCleanup => 0x40,
            MsgType::AllLinkCleanupAck => 0x60,
            MsgType::Broadcast => 0x80,
            MsgType::NakOfDirect => 0xA0,
            MsgType::AllLinkBroadcast => 0xC0,
            MsgType::AllLinkCleanupNak => 0xE0,
        }
    }
}

/// One PLM frame bound to its definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    data: Vec<u8>,
    def: &'static MsgDefinition,
    quiet_time: Duration,
}

impl Msg {
    /// Decode a complete inbound frame
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        match frame.first() {
            Some(&START_BYTE) => {}
            Some(&b) => return Err(InsteonError::InvalidStart(b)),
            None => {
                return Err(InsteonError::InvalidLength {
                    name: "frame",
                    expected: 2,
                    actual: 0,
                })
            }
        }
        let def = match schema::size_inbound(frame) {
            FrameSize::Known(def) => def,
            FrameSize::Unknown(cmd) => return Err(InsteonError::UnknownMessageType(cmd)),
            FrameSize::NeedMore => {
                return Err(InsteonError::InvalidLength {
                    name: "frame",
                    expected: schema::MIN_SIZED_LEN,
                    actual: frame.len(),
                })
            }
        };
        if frame.len() != def.length {
            return Err(InsteonError::InvalidLength {
                name: def.name,
                expected: def.length,
                actual: frame.len(),
            });
        }
        Ok(Self {
            data: frame.to_vec(),
            def,
            quiet_time: DEFAULT_QUIET_TIME,
        })
    }

    /// Empty outbound message with start and command bytes filled in
    pub fn outbound(cmd: u8, extended: bool) -> Result<Self> {
        let def = schema::definition(cmd, Direction::ToModem, extended)
            .ok_or(InsteonError::UnknownMessageType(cmd))?;
        let mut data = vec![0u8; def.length];
        data[0] = START_BYTE;
        data[1] = cmd;
        Ok(Self {
            data,
            def,
            quiet_time: DEFAULT_QUIET_TIME,
        })
    }

    /// Standard direct message to a device
    pub fn standard(to: InsteonAddress, flags: u8, cmd1: u8, cmd2: u8) -> Self {
        let def = &schema::SEND_STANDARD_MESSAGE;
        let mut data = vec![START_BYTE, 0x62];
        data.extend_from_slice(&to.as_bytes());
        data.extend_from_slice(&[flags & !0x10, cmd1, cmd2]);
        debug_assert_eq!(data.len(), def.length);
        Self {
            data,
            def,
            quiet_time: DEFAULT_QUIET_TIME,
        }
    }

    /// Extended direct message; `data` fills userData1.. (at most 13 bytes),
    /// userData14 carries the checksum
    pub fn extended(to: InsteonAddress, flags: u8, cmd1: u8, cmd2: u8, user_data: &[u8]) -> Self {
        let def = &schema::SEND_EXTENDED_MESSAGE;
        let mut data = vec![START_BYTE, 0x62];
        data.extend_from_slice(&to.as_bytes());
        data.extend_from_slice(&[flags | 0x10, cmd1, cmd2]);
        let mut payload = [0u8; 14];
        for (slot, b) in payload.iter_mut().zip(user_data.iter().take(13)) {
            *slot = *b;
        }
        payload[13] = checksum(cmd1, cmd2, &payload[..13]);
        data.extend_from_slice(&payload);
        debug_assert_eq!(data.len(), def.length);
        Self {
            data,
            def,
            quiet_time: DEFAULT_QUIET_TIME,
        }
    }

    pub fn definition(&self) -> &'static MsgDefinition {
        self.def
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn quiet_time(&self) -> Duration {
        self.quiet_time
    }

    pub fn set_quiet_time(&mut self, quiet_time: Duration) {
        self.quiet_time = quiet_time;
    }

    pub fn with_quiet_time(mut self, quiet_time: Duration) -> Self {
        self.quiet_time = quiet_time;
        self
    }

    fn field(&self, name: &str) -> std::result::Result<&schema::Field, FieldError> {
        let field = self
            .def
            .field(name)
            .ok_or_else(|| FieldError::NotFound(name.to_string()))?;
        if field.offset + field.ty.width() > self.data.len() {
            return Err(FieldError::OutOfRange {
                name: name.to_string(),
                offset: field.offset,
                len: self.data.len(),
            });
        }
        Ok(field)
    }

    /// Read a byte field; bit fields return their masked and shifted value
    pub fn get_byte(&self, name: &str) -> std::result::Result<u8, FieldError> {
        let field = self.field(name)?;
        let raw = self.data[field.offset];
        match field.ty {
            FieldType::Byte => Ok(raw),
            FieldType::Bits { mask, shift } => Ok((raw & mask) >> shift),
            FieldType::Address => Err(FieldError::WrongType(name.to_string())),
        }
    }

    /// Alias of [`Msg::get_byte`] that reads better for sub-byte fields
    pub fn get_bits(&self, name: &str) -> std::result::Result<u8, FieldError> {
        self.get_byte(name)
    }

    pub fn get_address(&self, name: &str) -> std::result::Result<InsteonAddress, FieldError> {
        let field = self.field(name)?;
        if field.ty != FieldType::Address {
            return Err(FieldError::WrongType(name.to_string()));
        }
        InsteonAddress::from_slice(&self.data[field.offset..field.offset + 3])
            .ok_or_else(|| FieldError::WrongType(name.to_string()))
    }

    /// Two byte fields assembled big-endian
    pub fn get_int16(&self, high: &str, low: &str) -> std::result::Result<u16, FieldError> {
        Ok(u16::from_be_bytes([self.get_byte(high)?, self.get_byte(low)?]))
    }

    /// Three byte fields assembled big-endian
    pub fn get_int24(&self, b2: &str, b1: &str, b0: &str) -> std::result::Result<u32, FieldError> {
        Ok(u32::from_be_bytes([
            0,
            self.get_byte(b2)?,
            self.get_byte(b1)?,
            self.get_byte(b0)?,
        ]))
    }

    /// userData1..=14
    pub fn user_data(&self, index: usize) -> std::result::Result<u8, FieldError> {
        self.get_byte(&format!("userData{}", index))
    }

    pub fn set_byte(&mut self, name: &str, value: u8) -> std::result::Result<(), FieldError> {
        let field = *self.field(name)?;
        match field.ty {
            FieldType::Byte => self.data[field.offset] = value,
            FieldType::Bits { mask, shift } => {
                let cur = self.data[field.offset] & !mask;
                self.data[field.offset] = cur | ((value << shift) & mask);
            }
            FieldType::Address => return Err(FieldError::WrongType(name.to_string())),
        }
        Ok(())
    }

    pub fn set_address(
        &mut self,
        name: &str,
        address: InsteonAddress,
    ) -> std::result::Result<(), FieldError> {
        let field = *self.field(name)?;
        if field.ty != FieldType::Address {
            return Err(FieldError::WrongType(name.to_string()));
        }
        self.data[field.offset..field.offset + 3].copy_from_slice(&address.as_bytes());
        Ok(())
    }

    pub fn cmd(&self) -> u8 {
        self.def.cmd
    }

    pub fn is_inbound(&self) -> bool {
        self.def.direction == Direction::FromModem
    }

    pub fn is_extended(&self) -> bool {
        self.def.extended
    }

    /// Inbound message originating from an Insteon device (0x50/0x51)
    pub fn is_insteon_received(&self) -> bool {
        self.is_inbound() && matches!(self.def.cmd, 0x50 | 0x51)
    }

    /// Modem echo of something we sent, carrying ACK or NAK
    pub fn is_echo(&self) -> bool {
        self.is_inbound() && matches!(self.def.cmd, 0x62 | 0x63)
    }

    pub fn is_x10(&self) -> bool {
        self.is_inbound() && self.def.cmd == 0x52
    }

    pub fn is_ack(&self) -> bool {
        self.def.has_ack() && self.get_byte("ACK") == Ok(ACK)
    }

    pub fn is_nak(&self) -> bool {
        self.def.has_ack() && self.get_byte("ACK") == Ok(NAK)
    }

    pub fn msg_type(&self) -> Option<MsgType> {
        self.get_byte("messageFlags").ok().map(MsgType::from_flags)
    }

    pub fn is_ack_of_direct(&self) -> bool {
        self.is_insteon_received() && self.msg_type() == Some(MsgType::AckOfDirect)
    }

    pub fn is_nak_of_direct(&self) -> bool {
        self.is_insteon_received() && self.msg_type() == Some(MsgType::NakOfDirect)
    }

    pub fn is_broadcast(&self) -> bool {
        self.is_insteon_received()
            && matches!(
                self.msg_type(),
                Some(MsgType::Broadcast | MsgType::AllLinkBroadcast)
            )
    }

    pub fn is_all_link_broadcast(&self) -> bool {
        self.is_insteon_received() && self.msg_type() == Some(MsgType::AllLinkBroadcast)
    }

    pub fn is_cleanup(&self) -> bool {
        self.is_insteon_received() && self.msg_type() == Some(MsgType::AllLinkCleanup)
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.def.name)?;
        for b in &self.data {
            write!(f, " {:02X}", b)?;
        }
        Ok(())
    }
}

/// Insteon i2cs checksum over cmd1, cmd2 and userData1..13
pub fn checksum(cmd1: u8, cmd2: u8, data: &[u8]) -> u8 {
    let sum = data
        .iter()
        .fold(cmd1.wrapping_add(cmd2), |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

/// Something read off the serial stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    Msg(Msg),
    /// A lone NAK: the modem was busy and dropped our last write
    PureNak,
}

/// Reassembles frames from a serial byte stream
#[derive(Debug, Default)]
pub struct MsgReader {
    buf: BytesMut,
}

impl MsgReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes as they arrive
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete event, or None until more bytes arrive
    pub fn next_event(&mut self) -> Option<ReadEvent> {
        loop {
            let first = *self.buf.first()?;
            if first == NAK {
                self.buf.advance(1);
                return Some(ReadEvent::PureNak);
            }
            if first != START_BYTE {
                let skip = self
                    .buf
                    .iter()
                    .position(|&b| b == START_BYTE || b == NAK)
                    .unwrap_or(self.buf.len());
                warn!("dropping {} garbage bytes from modem stream", skip);
                self.buf.advance(skip);
                continue;
            }
            match schema::size_inbound(&self.buf) {
                FrameSize::NeedMore => return None,
                FrameSize::Unknown(cmd) => {
                    warn!("unknown message type 0x{:02x}, resyncing", cmd);
                    self.buf.advance(1);
                }
                FrameSize::Known(def) => {
                    if self.buf.len() < def.length {
                        return None;
                    }
                    let frame = self.buf.split_to(def.length);
                    match Msg::from_frame(&frame) {
                        Ok(msg) => {
                            trace!("read {}", msg);
                            return Some(ReadEvent::Msg(msg));
                        }
                        Err(e) => warn!("dropping undecodable frame: {}", e),
                    }
                }
            }
        }
    }

    /// Drain every complete event currently buffered
    pub fn drain(&mut self) -> Vec<ReadEvent> {
        std::iter::from_fn(|| self.next_event()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_frame(flags: u8, cmd1: u8, cmd2: u8) -> Vec<u8> {
        vec![
            0x02, 0x50, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, flags, cmd1, cmd2,
        ]
    }

    #[test]
    fn test_decode_standard_fields() {
        let msg = Msg::from_frame(&standard_frame(0x2B, 0x19, 0x7F)).unwrap();
        assert_eq!(msg.name(), "StandardMessageReceived");
        assert_eq!(
            msg.get_address("fromAddress").unwrap(),
            InsteonAddress::new(0x11, 0x22, 0x33)
        );
        assert_eq!(msg.get_byte("command1").unwrap(), 0x19);
        assert_eq!(msg.get_byte("command2").unwrap(), 0x7F);
        assert_eq!(msg.get_bits("messageType").unwrap(), 0x01);
        assert_eq!(msg.get_bits("hopsLeft").unwrap(), 0x02);
        assert_eq!(msg.get_bits("maxHops").unwrap(), 0x03);
        assert!(msg.is_ack_of_direct());
        assert!(!msg.is_extended());
    }

    #[test]
    fn test_missing_field_is_not_found() {
        let msg = Msg::from_frame(&standard_frame(0x0B, 0x11, 0xFF)).unwrap();
        assert_eq!(
            msg.get_byte("userData1"),
            Err(FieldError::NotFound("userData1".to_string()))
        );
        assert!(matches!(
            msg.get_byte("fromAddress"),
            Err(FieldError::WrongType(_))
        ));
    }

    #[test]
    fn test_int24_big_endian() {
        let mut frame = vec![0x02, 0x51, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x1B, 0x03, 0x00];
        frame.extend_from_slice(&[0x00, 0x01, 0x02, 0x03, 0x10, 0x20, 0, 0, 0, 0, 0, 0, 0, 0]);
        let msg = Msg::from_frame(&frame).unwrap();
        assert!(msg.is_extended());
        assert_eq!(
            msg.get_int24("userData2", "userData3", "userData4").unwrap(),
            0x010203
        );
        assert_eq!(msg.user_data(5).unwrap(), 0x10);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut frame = standard_frame(0x0B, 0x11, 0xFF);
        frame.push(0x00);
        assert!(matches!(
            Msg::from_frame(&frame),
            Err(InsteonError::InvalidLength { expected: 11, .. })
        ));
        assert!(matches!(
            Msg::from_frame(&[0x03, 0x50]),
            Err(InsteonError::InvalidStart(0x03))
        ));
    }

    #[test]
    fn test_extended_checksum() {
        let msg = Msg::extended(InsteonAddress::new(1, 2, 3), 0x1F, 0x2E, 0x00, &[0x01]);
        assert_eq!(msg.len(), 22);
        // -(0x2E + 0x00 + 0x01) & 0xff
        assert_eq!(msg.user_data(14).unwrap(), 0xD1);
        assert_eq!(msg.get_bits("extendedFlag").unwrap(), 1);
    }

    #[test]
    fn test_standard_outbound() {
        let msg = Msg::standard(InsteonAddress::new(0xAA, 0xBB, 0xCC), 0x0F, 0x19, 0x00);
        assert_eq!(
            msg.as_bytes(),
            &[0x02, 0x62, 0xAA, 0xBB, 0xCC, 0x0F, 0x19, 0x00]
        );
        assert!(!msg.is_inbound());
    }

    #[test]
    fn test_reader_reassembles_split_frames() {
        let mut reader = MsgReader::new();
        let frame = standard_frame(0x0B, 0x11, 0xFF);
        reader.extend(&[0xFF, 0x00]);
        reader.extend(&frame[..4]);
        assert!(reader.next_event().is_none());
        reader.extend(&frame[4..]);
        reader.extend(&[NAK]);
        let events = reader.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ReadEvent::Msg(m) if m.get_byte("command1") == Ok(0x11)));
        assert_eq!(events[1], ReadEvent::PureNak);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_reader_reads_echo_with_ack() {
        let mut reader = MsgReader::new();
        reader.extend(&[0x02, 0x62, 0xAA, 0xBB, 0xCC, 0x0F, 0x19, 0x00, ACK]);
        match reader.next_event() {
            Some(ReadEvent::Msg(msg)) => {
                assert!(msg.is_echo());
                assert!(msg.is_ack());
                assert!(!msg.is_nak());
            }
            other => panic!("expected echo, got {:?}", other),
        }
    }

    #[test]
    fn test_reader_resyncs_on_unknown_command() {
        let mut reader = MsgReader::new();
        reader.extend(&[0x02, 0x7E]);
        reader.extend(&standard_frame(0x0B, 0x13, 0x00));
        let events = reader.drain();
        assert_eq!(events.len(), 1);
    }
}
