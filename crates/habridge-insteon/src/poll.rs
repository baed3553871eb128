//! Poll message construction for device features

use crate::{HandlerParams, InsteonAddress, InsteonError, Msg, Result};

/// Builds the status query a feature sends when polled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PollHandler {
    /// Standard status request, cmd1 0x19 cmd2 0x00
    #[default]
    Default,
    /// Configurable standard or extended query
    Flex {
        cmd1: u8,
        cmd2: u8,
        extended: bool,
        data: [u8; 3],
    },
    NoPoll,
}

impl PollHandler {
    pub fn from_name(name: &str, params: &HandlerParams) -> Result<Self> {
        match name {
            "DefaultPollHandler" => Ok(PollHandler::Default),
            "NoPollHandler" => Ok(PollHandler::NoPoll),
            "FlexPollHandler" => {
                let cmd1 = params.byte("cmd1").ok_or_else(|| {
                    InsteonError::Catalog("FlexPollHandler requires cmd1".to_string())
                })?;
                Ok(PollHandler::Flex {
                    cmd1,
                    cmd2: params.byte("cmd2").unwrap_or(0),
                    extended: params.int_or("ext", 0) != 0,
                    data: [
                        params.byte("d1").unwrap_or(0),
                        params.byte("d2").unwrap_or(0),
                        params.byte("d3").unwrap_or(0),
                    ],
                })
            }
            other => Err(InsteonError::UnknownHandler(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PollHandler::Default => "DefaultPollHandler",
            PollHandler::Flex { .. } => "FlexPollHandler",
            PollHandler::NoPoll => "NoPollHandler",
        }
    }

    /// Poll message for a device, None if this feature is never polled
    pub fn make_msg(&self, address: InsteonAddress) -> Option<Msg> {
        match self {
            PollHandler::Default => Some(Msg::standard(address, 0x0F, 0x19, 0x00)),
            PollHandler::Flex {
                cmd1,
                cmd2,
                extended: false,
                ..
            } => Some(Msg::standard(address, 0x0F, *cmd1, *cmd2)),
            PollHandler::Flex {
                cmd1,
                cmd2,
                extended: true,
                data,
            } => Some(Msg::extended(address, 0x1F, *cmd1, *cmd2, data)),
            PollHandler::NoPoll => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: InsteonAddress = InsteonAddress::new(0x1A, 0x2B, 0x3C);

    #[test]
    fn test_default_poll_is_status_request() {
        let msg = PollHandler::Default.make_msg(ADDR).unwrap();
        assert_eq!(msg.as_bytes(), &[0x02, 0x62, 0x1A, 0x2B, 0x3C, 0x0F, 0x19, 0x00]);
    }

    #[test]
    fn test_flex_extended_poll() {
        let params = HandlerParams::new()
            .with("cmd1", "0x2e")
            .with("ext", 1)
            .with("d1", 1);
        let poll = PollHandler::from_name("FlexPollHandler", &params).unwrap();
        let msg = poll.make_msg(ADDR).unwrap();
        assert!(msg.is_extended());
        assert_eq!(msg.get_byte("command1").unwrap(), 0x2E);
        assert_eq!(msg.user_data(1).unwrap(), 0x01);
    }

    #[test]
    fn test_no_poll_and_bad_flex() {
        assert!(PollHandler::NoPoll.make_msg(ADDR).is_none());
        assert!(PollHandler::from_name("FlexPollHandler", &HandlerParams::new()).is_err());
    }
}
