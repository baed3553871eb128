//! PLM message definitions
//!
//! Every frame starts with `0x02` followed by a command byte that selects the
//! definition. Field offsets are fixed per definition:
//!
//! ```text
//! Standard message received (0x50), 11 bytes
//! ┌──────┬──────┬─────────────┬───────────┬───────┬──────┬──────┐
//! │ 0x02 │ 0x50 │ fromAddress │ toAddress │ flags │ cmd1 │ cmd2 │
//! └──────┴──────┴─────────────┴───────────┴───────┴──────┴──────┘
//!   0      1      2..5          5..8        8       9      10
//!
//! Extended message received (0x51), 25 bytes: as above + userData1..14 (11..25)
//!
//! Send echo (0x62): 0x02 0x62 toAddress flags cmd1 cmd2 [userData1..14] ACK
//!   flags bit 4 (0x10) selects 9 (standard) or 23 (extended) bytes
//! ```
//!
//! Sub-byte fields of `messageFlags` are exposed as bit fields.

/// Which way a frame travels relative to the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written by us to the modem
    ToModem,
    /// Read from the modem
    FromModem,
}

/// Storage type of a named field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// One unsigned byte
    Byte,
    /// Three byte Insteon address
    Address,
    /// Masked and shifted part of one byte
    Bits { mask: u8, shift: u8 },
}

impl FieldType {
    pub fn width(&self) -> usize {
        match self {
            FieldType::Address => 3,
            _ => 1,
        }
    }
}

/// A named field at a fixed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub ty: FieldType,
}

const fn byte(name: &'static str, offset: usize) -> Field {
    Field {
        name,
        offset,
        ty: FieldType::Byte,
    }
}

const fn addr(name: &'static str, offset: usize) -> Field {
    Field {
        name,
        offset,
        ty: FieldType::Address,
    }
}

const fn bits(name: &'static str, offset: usize, mask: u8, shift: u8) -> Field {
    Field {
        name,
        offset,
        ty: FieldType::Bits { mask, shift },
    }
}

/// Schema of one message type
#[derive(Debug, PartialEq, Eq)]
pub struct MsgDefinition {
    pub name: &'static str,
    pub cmd: u8,
    pub direction: Direction,
    pub extended: bool,
    pub length: usize,
    pub fields: &'static [Field],
}

impl MsgDefinition {
    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Does this definition carry an ACK/NAK byte from the modem
    pub fn has_ack(&self) -> bool {
        self.field("ACK").is_some()
    }
}

const STANDARD_RECEIVED: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    addr("fromAddress", 2),
    addr("toAddress", 5),
    byte("messageFlags", 8),
    bits("messageType", 8, 0xE0, 5),
    bits("extendedFlag", 8, 0x10, 4),
    bits("hopsLeft", 8, 0x0C, 2),
    bits("maxHops", 8, 0x03, 0),
    byte("command1", 9),
    byte("command2", 10),
];

const EXTENDED_RECEIVED: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    addr("fromAddress", 2),
    addr("toAddress", 5),
    byte("messageFlags", 8),
    bits("messageType", 8, 0xE0, 5),
    bits("extendedFlag", 8, 0x10, 4),
    bits("hopsLeft", 8, 0x0C, 2),
    bits("maxHops", 8, 0x03, 0),
    byte("command1", 9),
    byte("command2", 10),
    byte("userData1", 11),
    byte("userData2", 12),
    byte("userData3", 13),
    byte("userData4", 14),
    byte("userData5", 15),
    byte("userData6", 16),
    byte("userData7", 17),
    byte("userData8", 18),
    byte("userData9", 19),
    byte("userData10", 20),
    byte("userData11", 21),
    byte("userData12", 22),
    byte("userData13", 23),
    byte("userData14", 24),
];

const SEND_STANDARD: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    addr("toAddress", 2),
    byte("messageFlags", 5),
    bits("messageType", 5, 0xE0, 5),
    bits("extendedFlag", 5, 0x10, 4),
    bits("hopsLeft", 5, 0x0C, 2),
    bits("maxHops", 5, 0x03, 0),
    byte("command1", 6),
    byte("command2", 7),
];

const SEND_STANDARD_REPLY: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    addr("toAddress", 2),
    byte("messageFlags", 5),
    bits("messageType", 5, 0xE0, 5),
    bits("extendedFlag", 5, 0x10, 4),
    bits("hopsLeft", 5, 0x0C, 2),
    bits("maxHops", 5, 0x03, 0),
    byte("command1", 6),
    byte("command2", 7),
    byte("ACK", 8),
];

const SEND_EXTENDED: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    addr("toAddress", 2),
    byte("messageFlags", 5),
    bits("messageType", 5, 0xE0, 5),
    bits("extendedFlag", 5, 0x10, 4),
    bits("hopsLeft", 5, 0x0C, 2),
    bits("maxHops", 5, 0x03, 0),
    byte("command1", 6),
    byte("command2", 7),
    byte("userData1", 8),
    byte("userData2", 9),
    byte("userData3", 10),
    byte("userData4", 11),
    byte("userData5", 12),
    byte("userData6", 13),
    byte("userData7", 14),
    byte("userData8", 15),
    byte("userData9", 16),
    byte("userData10", 17),
    byte("userData11", 18),
    byte("userData12", 19),
    byte("userData13", 20),
    byte("userData14", 21),
];

const SEND_EXTENDED_REPLY: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    addr("toAddress", 2),
    byte("messageFlags", 5),
    bits("messageType", 5, 0xE0, 5),
    bits("extendedFlag", 5, 0x10, 4),
    bits("hopsLeft", 5, 0x0C, 2),
    bits("maxHops", 5, 0x03, 0),
    byte("command1", 6),
    byte("command2", 7),
    byte("userData1", 8),
    byte("userData2", 9),
    byte("userData3", 10),
    byte("userData4", 11),
    byte("userData5", 12),
    byte("userData6", 13),
    byte("userData7", 14),
    byte("userData8", 15),
    byte("userData9", 16),
    byte("userData10", 17),
    byte("userData11", 18),
    byte("userData12", 19),
    byte("userData13", 20),
    byte("userData14", 21),
    byte("ACK", 22),
];

const X10_RECEIVED: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    byte("rawX10", 2),
    byte("X10Flag", 3),
];

const X10_SEND_REPLY: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    byte("rawX10", 2),
    byte("X10Flag", 3),
    byte("ACK", 4),
];

const ALL_LINKING_COMPLETED: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    byte("LinkCode", 2),
    byte("ALLLinkGroup", 3),
    addr("LinkAddr", 4),
    byte("DeviceCategory", 7),
    byte("DeviceSubCategory", 8),
    byte("FirmwareVersion", 9),
];

const BUTTON_EVENT_REPORT: &[Field] = &[byte("Start", 0), byte("Cmd", 1), byte("buttonEvent", 2)];

const USER_RESET_DETECTED: &[Field] = &[byte("Start", 0), byte("Cmd", 1)];

const ALL_LINK_CLEANUP_FAILURE: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    byte("reserved", 2),
    byte("ALLLinkGroup", 3),
    addr("LinkAddr", 4),
];

const ALL_LINK_RECORD_RESPONSE: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    byte("RecordFlags", 2),
    byte("ALLLinkGroup", 3),
    addr("LinkAddr", 4),
    byte("LinkData1", 7),
    byte("LinkData2", 8),
    byte("LinkData3", 9),
];

const ACK_ONLY: &[Field] = &[byte("Start", 0), byte("Cmd", 1), byte("ACK", 2)];

const COMMAND_ONLY: &[Field] = &[byte("Start", 0), byte("Cmd", 1)];

const IM_INFO_REPLY: &[Field] = &[
    byte("Start", 0),
    byte("Cmd", 1),
    addr("IMAddress", 2),
    byte("DeviceCategory", 5),
    byte("DeviceSubCategory", 6),
    byte("FirmwareVersion", 7),
    byte("ACK", 8),
];

macro_rules! def {
    ($name:expr, $cmd:expr, $dir:ident, $ext:expr, $len:expr, $fields:expr) => {
        MsgDefinition {
            name: $name,
            cmd: $cmd,
            direction: Direction::$dir,
            extended: $ext,
            length: $len,
            fields: $fields,
        }
    };
}

/// Outbound standard direct message
pub static SEND_STANDARD_MESSAGE: MsgDefinition =
    def!("SendStandardMessage", 0x62, ToModem, false, 8, SEND_STANDARD);

/// Outbound extended direct message
pub static SEND_EXTENDED_MESSAGE: MsgDefinition =
    def!("SendExtendedMessage", 0x62, ToModem, true, 22, SEND_EXTENDED);

/// All known message definitions
pub static DEFINITIONS: &[&MsgDefinition] = &[
    &def!("StandardMessageReceived", 0x50, FromModem, false, 11, STANDARD_RECEIVED),
    &def!("ExtendedMessageReceived", 0x51, FromModem, true, 25, EXTENDED_RECEIVED),
    &def!("X10MessageReceived", 0x52, FromModem, false, 4, X10_RECEIVED),
    &def!("ALLLinkingCompleted", 0x53, FromModem, false, 10, ALL_LINKING_COMPLETED),
    &def!("ButtonEventReport", 0x54, FromModem, false, 3, BUTTON_EVENT_REPORT),
    &def!("UserResetDetected", 0x55, FromModem, false, 2, USER_RESET_DETECTED),
    &def!("ALLLinkCleanupFailureReport", 0x56, FromModem, false, 7, ALL_LINK_CLEANUP_FAILURE),
    &def!("ALLLinkRecordResponse", 0x57, FromModem, false, 10, ALL_LINK_RECORD_RESPONSE),
    &def!("ALLLinkCleanupStatusReport", 0x58, FromModem, false, 3, ACK_ONLY),
    &def!("GetIMInfoReply", 0x60, FromModem, false, 9, IM_INFO_REPLY),
    &def!("SendStandardMessageReply", 0x62, FromModem, false, 9, SEND_STANDARD_REPLY),
    &def!("SendExtendedMessageReply", 0x62, FromModem, true, 23, SEND_EXTENDED_REPLY),
    &def!("SendX10MessageReply", 0x63, FromModem, false, 5, X10_SEND_REPLY),
    &def!("GetFirstALLLinkRecordReply", 0x69, FromModem, false, 3, ACK_ONLY),
    &def!("GetNextALLLinkRecordReply", 0x6A, FromModem, false, 3, ACK_ONLY),
    &def!("GetIMInfo", 0x60, ToModem, false, 2, COMMAND_ONLY),
    &SEND_STANDARD_MESSAGE,
    &SEND_EXTENDED_MESSAGE,
    &def!("SendX10Message", 0x63, ToModem, false, 4, X10_RECEIVED),
    &def!("GetFirstALLLinkRecord", 0x69, ToModem, false, 2, COMMAND_ONLY),
    &def!("GetNextALLLinkRecord", 0x6A, ToModem, false, 2, COMMAND_ONLY),
];

/// Command bytes whose length depends on the extended flag of `messageFlags`
const FLAG_SIZED: u8 = 0x62;

/// Bytes needed before any inbound frame can be sized
pub const MIN_SIZED_LEN: usize = SEND_FLAGS_OFFSET + 1;

/// Offset of `messageFlags` in a send/echo frame
const SEND_FLAGS_OFFSET: usize = 5;

/// Find a definition by command byte, direction and extended flag
pub fn definition(cmd: u8, direction: Direction, extended: bool) -> Option<&'static MsgDefinition> {
    DEFINITIONS
        .iter()
        .find(|d| {
            d.cmd == cmd
                && d.direction == direction
                && (cmd != FLAG_SIZED || d.extended == extended)
        })
        .copied()
}

/// Outcome of sizing the frame at the head of a receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// Complete definition and length are known
    Known(&'static MsgDefinition),
    /// More bytes are needed before the frame can be sized
    NeedMore,
    /// The command byte is not a known inbound message
    Unknown(u8),
}

/// Size an inbound frame that starts at `buf[0] == 0x02`
pub fn size_inbound(buf: &[u8]) -> FrameSize {
    let Some(&cmd) = buf.get(1) else {
        return FrameSize::NeedMore;
    };
    let extended = if cmd == FLAG_SIZED {
        match buf.get(SEND_FLAGS_OFFSET) {
            Some(flags) => flags & 0x10 != 0,
            None => return FrameSize::NeedMore,
        }
    } else {
        false
    };
    match definition(cmd, Direction::FromModem, extended) {
        Some(def) => FrameSize::Known(def),
        None => FrameSize::Unknown(cmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_lengths_match_fields() {
        for def in DEFINITIONS {
            let end = def
                .fields
                .iter()
                .map(|f| f.offset + f.ty.width())
                .max()
                .unwrap();
            assert_eq!(end, def.length, "{} length mismatch", def.name);
        }
    }

    #[test]
    fn test_standard_and_extended_sizes() {
        let std = definition(0x50, Direction::FromModem, false).unwrap();
        assert_eq!(std.length, 11);
        let ext = definition(0x51, Direction::FromModem, true).unwrap();
        assert_eq!(ext.length, 25);
    }

    #[test]
    fn test_echo_sized_by_flag() {
        let std = [0x02, 0x62, 0x11, 0x22, 0x33, 0x0F];
        let ext = [0x02, 0x62, 0x11, 0x22, 0x33, 0x1F];
        match (size_inbound(&std), size_inbound(&ext)) {
            (FrameSize::Known(a), FrameSize::Known(b)) => {
                assert_eq!(a.length, 9);
                assert_eq!(b.length, 23);
            }
            other => panic!("unexpected sizing {:?}", other),
        }
        assert_eq!(size_inbound(&[0x02, 0x62, 0x11]), FrameSize::NeedMore);
        assert_eq!(size_inbound(&[0x02, 0x7f]), FrameSize::Unknown(0x7f));
    }
}
