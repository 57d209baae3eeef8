//! Channel event codes carried in CHANNEL_RESPONSE messages.
//!
//! Section 9.5.6 "Channel Response / Event Messages" of the ANT message
//! protocol document defines these. The same code space covers both command
//! status replies (where zero means success) and asynchronous RF events.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    ResponseNoError,
    RxSearchTimeout,
    RxFail,
    Tx,
    TransferRxFailed,
    TransferTxCompleted,
    TransferTxFailed,
    ChannelClosed,
    RxFailGoToSearch,
    ChannelCollision,
    TransferTxStart,
    ChannelInWrongState,
    ChannelNotOpened,
    ChannelIdNotSet,
    CloseAllChannels,
    TransferInProgress,
    TransferSequenceNumberError,
    TransferInError,
    InvalidMessage,
    InvalidNetworkNumber,
    InvalidParameterProvided,
    SerialQueueOverflow,
    QueueOverflow,
    /// Any code not listed above, kept verbatim for diagnostics.
    Other(u8),
}

impl ChannelEvent {
    pub fn from_u8(code: u8) -> Self {
        use ChannelEvent::*;
        match code {
            0 => ResponseNoError,
            1 => RxSearchTimeout,
            2 => RxFail,
            3 => Tx,
            4 => TransferRxFailed,
            5 => TransferTxCompleted,
            6 => TransferTxFailed,
            7 => ChannelClosed,
            8 => RxFailGoToSearch,
            9 => ChannelCollision,
            10 => TransferTxStart,
            21 => ChannelInWrongState,
            22 => ChannelNotOpened,
            24 => ChannelIdNotSet,
            25 => CloseAllChannels,
            31 => TransferInProgress,
            32 => TransferSequenceNumberError,
            33 => TransferInError,
            40 => InvalidMessage,
            41 => InvalidNetworkNumber,
            51 => InvalidParameterProvided,
            52 => SerialQueueOverflow,
            53 => QueueOverflow,
            other => Other(other),
        }
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ChannelEvent::*;
        let text = match self {
            ResponseNoError => "no error",
            RxSearchTimeout => "channel search timeout",
            RxFail => "rx fail",
            Tx => "broadcast tx complete",
            TransferRxFailed => "rx transfer fail",
            TransferTxCompleted => "tx complete",
            TransferTxFailed => "tx fail",
            ChannelClosed => "channel closed",
            RxFailGoToSearch => "dropped to search mode",
            ChannelCollision => "channel collision",
            TransferTxStart => "burst transfer start",
            ChannelInWrongState => "channel in wrong state",
            ChannelNotOpened => "channel not opened",
            ChannelIdNotSet => "channel id not set",
            CloseAllChannels => "all channels closed",
            TransferInProgress => "transfer in progress",
            TransferSequenceNumberError => "transfer sequence error",
            TransferInError => "burst transfer error",
            InvalidMessage => "invalid message",
            InvalidNetworkNumber => "invalid network number",
            InvalidParameterProvided => "invalid parameter",
            SerialQueueOverflow => "output serial overflow",
            QueueOverflow => "input serial overflow",
            Other(code) => return write!(f, "unknown channel event {code}"),
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(ChannelEvent::from_u8(0), ChannelEvent::ResponseNoError);
        assert_eq!(ChannelEvent::from_u8(5), ChannelEvent::TransferTxCompleted);
        assert_eq!(ChannelEvent::from_u8(7), ChannelEvent::ChannelClosed);
        assert_eq!(ChannelEvent::from_u8(8), ChannelEvent::RxFailGoToSearch);
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        assert_eq!(ChannelEvent::from_u8(0xC3), ChannelEvent::Other(0xC3));
        assert_eq!(
            ChannelEvent::from_u8(0xC3).to_string(),
            "unknown channel event 195"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelEvent::RxFail.to_string(), "rx fail");
        assert_eq!(
            ChannelEvent::RxFailGoToSearch.to_string(),
            "dropped to search mode"
        );
    }
}
