//! Stick controller: owns the USB transport, performs stick-level setup,
//! allocates channel numbers and routes asynchronous frames to channels.

use std::collections::VecDeque;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, instrument, trace, warn};

use crate::channel::{AntChannel, ChannelId, ChannelState};
use crate::error::AntError;
use crate::profiles::Profile;
use crate::protocol::constants::*;
use crate::protocol::{ChannelEvent, Frame};
use crate::transport::framed::FRAME_DEADLINE;
use crate::transport::{FrameReader, FrameWriter, UsbTransport};

/// Bound on reads during a synchronous exchange, so a stick that only
/// emits data frames cannot livelock a constructor.
const MAX_INTERNAL_READS: usize = 50;

/// Bound on reads while waiting for the startup notification after a
/// reset.
const RESET_ATTEMPTS: usize = 50;

/// Data frames observed during synchronous exchanges queue up here; cap
/// the queue so a chatty stick cannot grow it without bound.
const DELAYED_CAP: usize = 64;

/// The I/O half of the stick: everything a channel needs to submit frames
/// and run its own synchronous exchanges, split from the channel registry
/// so both can be borrowed at once.
pub struct StickIo<T: UsbTransport> {
    reader: FrameReader<T>,
    writer: FrameWriter<T>,
    delayed: VecDeque<Frame>,
    network: Option<u8>,
}

impl<T: UsbTransport> StickIo<T> {
    pub(crate) fn new(transport: Arc<T>) -> Self {
        Self {
            reader: FrameReader::new(Arc::clone(&transport)),
            writer: FrameWriter::new(transport),
            delayed: VecDeque::new(),
            network: None,
        }
    }

    pub(crate) fn write_frame(&mut self, frame: &Frame) -> Result<(), AntError> {
        self.writer.write_frame(frame)
    }

    /// Read frames until one is not data-bearing. Broadcasts, bursts and
    /// data-transmission channel responses arriving mid-exchange belong to
    /// the asynchronous flow; they are set aside for the tick.
    pub(crate) fn read_internal(&mut self) -> Result<Frame, AntError> {
        for _ in 0..MAX_INTERNAL_READS {
            let frame = self.reader.next_frame(FRAME_DEADLINE)?;
            if is_data_bearing(&frame) {
                if self.delayed.len() < DELAYED_CAP {
                    self.delayed.push_back(frame);
                } else {
                    warn!("delayed frame queue full, dropping frame");
                }
                continue;
            }
            return Ok(frame);
        }
        // Nothing but data frames; the awaited response never surfaced.
        Err(AntError::Timeout)
    }

    /// Validate the status reply that follows every synchronous channel
    /// command: right message kind, right channel, right command, zero
    /// status.
    pub(crate) fn check_channel_response(
        &self,
        frame: &Frame,
        channel: u8,
        command: u8,
    ) -> Result<(), AntError> {
        if frame.id != CHANNEL_RESPONSE {
            return Err(AntError::UnexpectedResponse {
                expected: CHANNEL_RESPONSE,
                got: frame.id,
            });
        }
        let [resp_channel, resp_command, status, ..] = frame.payload[..] else {
            return Err(AntError::Framing("short channel response"));
        };
        if resp_channel != channel || resp_command != command {
            return Err(AntError::UnexpectedResponse {
                expected: command,
                got: resp_command,
            });
        }
        if status != 0 {
            return Err(AntError::CommandFailed {
                channel,
                command,
                event: ChannelEvent::from_u8(status),
            });
        }
        Ok(())
    }

    /// Write one command frame and verify its channel response.
    fn command(&mut self, id: u8, payload: Vec<u8>, channel: u8) -> Result<(), AntError> {
        self.write_frame(&Frame::new(id, payload))?;
        let response = self.read_internal()?;
        self.check_channel_response(&response, channel, id)
    }
}

/// A frame belongs to the asynchronous data flow when it is broadcast or
/// burst data, or a channel response tied to data transmission (general
/// event, ack or burst status).
fn is_data_bearing(frame: &Frame) -> bool {
    match frame.id {
        BROADCAST_DATA | BURST_TRANSFER_DATA => true,
        CHANNEL_RESPONSE => matches!(
            frame.payload.get(1),
            Some(&0x01) | Some(&ACKNOWLEDGE_DATA) | Some(&BURST_TRANSFER_DATA)
        ),
        _ => false,
    }
}

/// The physical USB ANT stick. Owns the transport and all channels; the
/// `tick` method must be driven several times per channel period so
/// broadcasts are handled promptly and acknowledged writes go out inside
/// the master's listen window.
pub struct AntStick<T: UsbTransport> {
    io: StickIo<T>,
    serial_number: u32,
    version: String,
    max_channels: u8,
    max_networks: u8,
    channels: Vec<AntChannel>,
}

impl<T: UsbTransport> AntStick<T> {
    /// Take ownership of an opened transport, reset the stick and query
    /// its identity.
    #[instrument(skip(transport))]
    pub fn open(transport: T) -> Result<Self, AntError> {
        let mut stick = Self::attach(transport);
        stick.reset()?;
        stick.query_info()?;
        info!(
            serial = stick.serial_number,
            version = %stick.version,
            max_channels = stick.max_channels,
            max_networks = stick.max_networks,
            "ANT stick ready"
        );
        Ok(stick)
    }

    fn attach(transport: T) -> Self {
        Self {
            io: StickIo::new(Arc::new(transport)),
            serial_number: 0,
            version: String::new(),
            max_channels: 0,
            max_networks: 0,
            channels: Vec::new(),
        }
    }

    /// Reset the stick and discard anything queued from a previous user.
    /// Some sticks skip the startup notification after a reset yet work
    /// fine, so its absence is only a warning.
    pub fn reset(&mut self) -> Result<(), AntError> {
        self.io.write_frame(&Frame::new(RESET_SYSTEM, vec![0]))?;
        for _ in 0..RESET_ATTEMPTS {
            match self.io.read_internal() {
                Ok(frame) if frame.id == STARTUP_MESSAGE => {
                    self.io.delayed.clear();
                    return Ok(());
                }
                Ok(frame) => {
                    trace!(id = frame.id, "discarding frame while waiting for startup")
                }
                Err(AntError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        warn!("no startup notification after reset, continuing anyway");
        self.io.delayed.clear();
        Ok(())
    }

    /// Query serial number, firmware version and capabilities.
    fn query_info(&mut self) -> Result<(), AntError> {
        let serial = self.request(RESPONSE_SERIAL_NUMBER)?;
        if serial.payload.len() < 4 {
            return Err(AntError::Framing("short serial number response"));
        }
        self.serial_number = LittleEndian::read_u32(&serial.payload[..4]);

        let version = self.request(RESPONSE_VERSION)?;
        let text = version
            .payload
            .split(|&b| b == 0)
            .next()
            .unwrap_or_default();
        self.version = String::from_utf8_lossy(text).into_owned();

        let caps = self.request(RESPONSE_CAPABILITIES)?;
        let [max_channels, max_networks, ..] = caps.payload[..] else {
            return Err(AntError::Framing("short capabilities response"));
        };
        self.max_channels = max_channels;
        self.max_networks = max_networks;
        Ok(())
    }

    fn request(&mut self, message_id: u8) -> Result<Frame, AntError> {
        self.io
            .write_frame(&Frame::new(REQUEST_MESSAGE, vec![0, message_id]))?;
        let frame = self.io.read_internal()?;
        if frame.id != message_id {
            return Err(AntError::UnexpectedResponse {
                expected: message_id,
                got: frame.id,
            });
        }
        Ok(frame)
    }

    /// Install an 8-byte network key on network 0. Only one network is
    /// used at a time.
    pub fn set_network_key(&mut self, key: &[u8; 8]) -> Result<(), AntError> {
        let network = 0u8;
        self.io.network = None;
        let mut payload = vec![network];
        payload.extend_from_slice(key);
        // The stick acknowledges with the network id in the channel byte.
        self.io.command(SET_NETWORK_KEY, payload, network)?;
        self.io.network = Some(network);
        Ok(())
    }

    pub fn serial_number(&self) -> u32 {
        self.serial_number
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn max_channels(&self) -> u8 {
        self.max_channels
    }

    pub fn max_networks(&self) -> u8 {
        self.max_networks
    }

    pub fn channels(&self) -> impl Iterator<Item = &AntChannel> {
        self.channels.iter()
    }

    pub fn channel(&self, number: u8) -> Option<&AntChannel> {
        self.channels.iter().find(|c| c.number() == number)
    }

    pub fn channel_mut(&mut self, number: u8) -> Option<&mut AntChannel> {
        self.channels.iter_mut().find(|c| c.number() == number)
    }

    /// Lowest channel number not currently in use.
    fn next_channel_number(&self) -> Option<u8> {
        (0..self.max_channels).find(|n| self.channels.iter().all(|c| c.number() != *n))
    }

    /// Create a channel for `profile`, searching for `device_number`
    /// (zero pairs with any device of the profile's type). Runs the
    /// synchronous setup sequence; each step awaits a success response.
    pub fn open_channel(&mut self, profile: Profile, device_number: u32) -> Result<u8, AntError> {
        let number = self.next_channel_number().ok_or(AntError::Exhausted {
            max_channels: self.max_channels,
        })?;
        let params = profile.channel_params();
        let network = self.io.network.unwrap_or(0);

        debug!(
            channel = number,
            kind = %profile.kind(),
            device_number,
            "assigning channel"
        );

        self.io.command(
            ASSIGN_CHANNEL,
            vec![number, CHANNEL_TYPE_BIDIRECTIONAL_RECEIVE, network],
            number,
        )?;
        self.io.command(
            SET_CHANNEL_ID,
            vec![
                number,
                (device_number & 0xFF) as u8,
                ((device_number >> 8) & 0xFF) as u8,
                params.device_type,
                // High nibble carries the top 4 bits of the 20-bit device
                // number.
                ((device_number >> 12) & 0xF0) as u8,
            ],
            number,
        )?;
        self.io.command(
            SET_CHANNEL_PERIOD,
            vec![
                number,
                (params.period & 0xFF) as u8,
                (params.period >> 8) as u8,
            ],
            number,
        )?;
        self.io.command(
            SET_CHANNEL_SEARCH_TIMEOUT,
            vec![number, params.search_timeout],
            number,
        )?;
        self.io.command(
            SET_CHANNEL_RF_FREQ,
            vec![number, params.rf_frequency],
            number,
        )?;
        self.io.command(OPEN_CHANNEL, vec![number], number)?;

        let id = ChannelId::search(params.device_type, device_number);
        self.channels.push(AntChannel::new(number, id, profile));
        Ok(number)
    }

    /// Tear the channel down and free its number. The close/unassign
    /// exchange is best effort: release runs on error paths too and must
    /// not mask the originating fault.
    pub fn release_channel(&mut self, number: u8) {
        let Some(pos) = self.channels.iter().position(|c| c.number() == number) else {
            return;
        };
        let channel = self.channels.remove(pos);
        if channel.state() != ChannelState::Closed {
            if let Err(e) = self.close_on_wire(number) {
                warn!(channel = number, error = %e, "channel teardown failed");
            }
        }
    }

    fn close_on_wire(&mut self, number: u8) -> Result<(), AntError> {
        self.io.command(CLOSE_CHANNEL, vec![number], number)?;
        // The stick still owes us an EVENT_CHANNEL_CLOSED, which would
        // normally arrive through the tick; at teardown we only wait for
        // the command to be accepted before unassigning.
        self.io.command(UNASSIGN_CHANNEL, vec![number], number)
    }

    /// One step of the asynchronous loop: take a frame from the delayed
    /// queue or the wire and route it to its channel. Unknown channels
    /// drop the frame; a channel-fatal error closes that channel only.
    pub fn tick(&mut self) -> Result<(), AntError> {
        let frame = match self.io.delayed.pop_front() {
            Some(frame) => Some(frame),
            None => self.io.reader.try_next_frame()?,
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        let Some(mut channel_number) = frame.channel() else {
            trace!(id = frame.id, "dropping frame without channel byte");
            return Ok(());
        };
        if frame.id == BURST_TRANSFER_DATA {
            channel_number &= BURST_CHANNEL_MASK;
        }

        let Some(index) = self
            .channels
            .iter()
            .position(|c| c.number() == channel_number)
        else {
            trace!(channel = channel_number, id = frame.id, "dropping frame for unknown channel");
            return Ok(());
        };

        let channel = &mut self.channels[index];
        match channel.handle_frame(&frame, &mut self.io) {
            Ok(()) => Ok(()),
            Err(AntError::Transport(e)) => Err(AntError::Transport(e)),
            Err(e) => {
                warn!(channel = channel_number, error = %e, "channel error, closing channel");
                channel.force_close();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::profiles::{FitnessEquipment, HeartRateMonitor, ProfileKind};
    use crate::transport::MockTransport;

    fn queue_channel_response(mock: &MockTransport, channel: u8, command: u8, status: u8) {
        mock.queue_frame(CHANNEL_RESPONSE, &[channel, command, status]);
    }

    fn queue_stick_identity(mock: &MockTransport) {
        mock.queue_frame(RESPONSE_SERIAL_NUMBER, &[0x2A, 0x00, 0x00, 0x00]);
        mock.queue_frame(RESPONSE_VERSION, b"AP2USB1.05\0");
        mock.queue_frame(RESPONSE_CAPABILITIES, &[8, 3, 0, 0]);
    }

    fn queue_channel_setup(mock: &MockTransport, channel: u8) {
        for command in [
            ASSIGN_CHANNEL,
            SET_CHANNEL_ID,
            SET_CHANNEL_PERIOD,
            SET_CHANNEL_SEARCH_TIMEOUT,
            SET_CHANNEL_RF_FREQ,
            OPEN_CHANNEL,
        ] {
            queue_channel_response(mock, channel, command, 0);
        }
    }

    /// Open a stick over a shared handle to the mock, so the test can
    /// keep queueing traffic and inspecting writes afterwards.
    fn open_stick(mock: &MockTransport) -> AntStick<MockTransport> {
        mock.queue_frame(STARTUP_MESSAGE, &[0x20]);
        queue_stick_identity(mock);
        AntStick::open(mock.clone()).unwrap()
    }

    fn hr_profile() -> Profile {
        Profile::HeartRate(HeartRateMonitor::new(ManualClock::new()))
    }

    fn fec_profile() -> Profile {
        Profile::FitnessEquipment(FitnessEquipment::new(ManualClock::new()))
    }

    #[test]
    fn test_open_reads_identity() {
        let stick = open_stick(&MockTransport::new());
        assert_eq!(stick.serial_number(), 42);
        assert_eq!(stick.version(), "AP2USB1.05");
        assert_eq!(stick.max_channels(), 8);
        assert_eq!(stick.max_networks(), 3);
    }

    #[test]
    fn test_reset_succeeds_on_startup_message() {
        let mock = MockTransport::new();
        let mut stick = AntStick::attach(mock.clone());

        // A stale broadcast precedes the startup message; reset must not
        // leave it queued for the tick.
        mock.queue_frame(BROADCAST_DATA, &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        mock.queue_frame(STARTUP_MESSAGE, &[0x20]);
        stick.reset().unwrap();
        assert!(stick.io.delayed.is_empty());

        let frames = mock.written_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, RESET_SYSTEM);
    }

    #[test]
    fn test_reset_tolerates_missing_startup_message() {
        let mock = MockTransport::new();
        let mut stick = AntStick::attach(mock.clone());

        // The stick stays silent after the reset command.
        stick.reset().unwrap();

        // And still answers the identity queries afterwards.
        queue_stick_identity(&mock);
        stick.query_info().unwrap();
        assert_eq!(stick.serial_number(), 42);
    }

    #[test]
    fn test_set_network_key() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_response(&mock, 0, SET_NETWORK_KEY, 0);

        stick.set_network_key(&ANT_PLUS_NETWORK_KEY).unwrap();

        let frames = mock.written_frames();
        let key_frame = frames
            .iter()
            .find(|f| f.id == SET_NETWORK_KEY)
            .expect("network key frame");
        assert_eq!(key_frame.payload[0], 0);
        assert_eq!(&key_frame.payload[1..], &ANT_PLUS_NETWORK_KEY);
    }

    #[test]
    fn test_set_network_key_rejected() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        // Status 0x28: nonzero, command refused.
        queue_channel_response(&mock, 0, SET_NETWORK_KEY, 0x28);

        let err = stick.set_network_key(&ANT_PLUS_NETWORK_KEY).unwrap_err();
        assert!(matches!(err, AntError::CommandFailed { .. }));
    }

    #[test]
    fn test_open_channel_setup_sequence() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_response(&mock, 0, SET_NETWORK_KEY, 0);
        stick.set_network_key(&ANT_PLUS_NETWORK_KEY).unwrap();
        queue_channel_setup(&mock, 0);

        let number = stick.open_channel(hr_profile(), 0).unwrap();
        assert_eq!(number, 0);

        let frames = mock.written_frames();
        let setup: Vec<u8> = frames
            .iter()
            .skip_while(|f| f.id != ASSIGN_CHANNEL)
            .map(|f| f.id)
            .collect();
        assert_eq!(
            setup,
            vec![
                ASSIGN_CHANNEL,
                SET_CHANNEL_ID,
                SET_CHANNEL_PERIOD,
                SET_CHANNEL_SEARCH_TIMEOUT,
                SET_CHANNEL_RF_FREQ,
                OPEN_CHANNEL
            ]
        );

        let assign = frames.iter().find(|f| f.id == ASSIGN_CHANNEL).unwrap();
        assert_eq!(
            assign.payload,
            vec![0, CHANNEL_TYPE_BIDIRECTIONAL_RECEIVE, 0]
        );
        let set_id = frames.iter().find(|f| f.id == SET_CHANNEL_ID).unwrap();
        assert_eq!(set_id.payload, vec![0, 0, 0, heart_rate::DEVICE_TYPE, 0]);
        let period = frames.iter().find(|f| f.id == SET_CHANNEL_PERIOD).unwrap();
        assert_eq!(
            period.payload,
            vec![0, (8070u16 & 0xFF) as u8, (8070u16 >> 8) as u8]
        );

        let channel = stick.channel(0).unwrap();
        assert_eq!(channel.state(), ChannelState::Searching);
        assert_eq!(channel.profile().kind(), ProfileKind::HeartRate);
    }

    #[test]
    fn test_open_channel_encodes_20_bit_device_number() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);

        stick.open_channel(hr_profile(), 0xA_BC12).unwrap();

        let frames = mock.written_frames();
        let set_id = frames.iter().find(|f| f.id == SET_CHANNEL_ID).unwrap();
        assert_eq!(
            set_id.payload,
            vec![0, 0x12, 0xBC, heart_rate::DEVICE_TYPE, 0xA0]
        );
    }

    #[test]
    fn test_open_channel_failed_setup_propagates() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_response(&mock, 0, ASSIGN_CHANNEL, 0);
        // SET_CHANNEL_ID rejected: channel in wrong state.
        queue_channel_response(&mock, 0, SET_CHANNEL_ID, 21);

        let err = stick.open_channel(hr_profile(), 0).unwrap_err();
        assert!(matches!(
            err,
            AntError::CommandFailed {
                command: SET_CHANNEL_ID,
                ..
            }
        ));
        assert!(stick.channel(0).is_none());
    }

    #[test]
    fn test_channel_numbers_allocated_lowest_first() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        queue_channel_setup(&mock, 1);

        assert_eq!(stick.open_channel(hr_profile(), 0).unwrap(), 0);
        assert_eq!(stick.open_channel(fec_profile(), 0).unwrap(), 1);
    }

    #[test]
    fn test_channel_numbers_exhausted() {
        let mock = MockTransport::new();
        mock.queue_frame(STARTUP_MESSAGE, &[0x20]);
        mock.queue_frame(RESPONSE_SERIAL_NUMBER, &[1, 0, 0, 0]);
        mock.queue_frame(RESPONSE_VERSION, b"X\0");
        // A stick with a single channel.
        mock.queue_frame(RESPONSE_CAPABILITIES, &[1, 3, 0, 0]);
        let mut stick = AntStick::open(mock.clone()).unwrap();
        queue_channel_setup(&mock, 0);

        stick.open_channel(hr_profile(), 0).unwrap();
        let err = stick.open_channel(fec_profile(), 0).unwrap_err();
        assert!(matches!(err, AntError::Exhausted { max_channels: 1 }));
    }

    #[test]
    fn test_release_channel_frees_number() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        stick.open_channel(hr_profile(), 0).unwrap();

        // The close/unassign responses.
        queue_channel_response(&mock, 0, CLOSE_CHANNEL, 0);
        queue_channel_response(&mock, 0, UNASSIGN_CHANNEL, 0);
        stick.release_channel(0);
        assert!(stick.channel(0).is_none());

        queue_channel_setup(&mock, 0);
        assert_eq!(stick.open_channel(hr_profile(), 0).unwrap(), 0);
    }

    #[test]
    fn test_release_channel_swallows_wire_errors() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        stick.open_channel(hr_profile(), 0).unwrap();

        // No queued responses: the close exchange times out, but release
        // must not fail.
        stick.release_channel(0);
        assert!(stick.channel(0).is_none());
    }

    #[test]
    fn test_tick_routes_broadcast_to_channel() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        stick.open_channel(hr_profile(), 0).unwrap();

        mock.queue_frame(BROADCAST_DATA, &[0, 0, 0, 0, 0, 0, 0x78, 0x05, 0x48]);
        stick.tick().unwrap();

        let channel = stick.channel(0).unwrap();
        assert_eq!(channel.messages_received(), 1);
        let Profile::HeartRate(hrm) = channel.profile() else {
            panic!("expected heart rate profile");
        };
        assert_eq!(hrm.instant_heart_rate(), 72.0);
    }

    #[test]
    fn test_tick_drops_unknown_channel() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        stick.open_channel(hr_profile(), 0).unwrap();

        mock.queue_frame(BROADCAST_DATA, &[5, 0, 0, 0, 0, 0, 0, 0, 0]);
        stick.tick().unwrap();
        assert_eq!(stick.channel(0).unwrap().messages_received(), 0);
    }

    #[test]
    fn test_tick_masks_burst_channel_number() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        stick.open_channel(hr_profile(), 0).unwrap();

        // Burst frame for channel 0 with sequence bits set in the top
        // three bits of the channel byte; must route, not drop.
        mock.queue_frame(BURST_TRANSFER_DATA, &[0xA0, 1, 2, 3, 4, 5, 6, 7, 8]);
        stick.tick().unwrap();
        // Burst routing does not count as a received broadcast.
        assert_eq!(stick.channel(0).unwrap().messages_received(), 0);
        assert_eq!(stick.channel(0).unwrap().state(), ChannelState::Searching);
    }

    #[test]
    fn test_tick_drains_delayed_before_fresh_frames() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        stick.open_channel(hr_profile(), 0x3412).unwrap();

        // A broadcast sneaks in during a synchronous exchange: queue it
        // ahead of the awaited network key response so read_internal
        // diverts it.
        mock.queue_frame(BROADCAST_DATA, &[0, 0, 0, 0, 0, 0, 0, 1, 72]);
        queue_channel_response(&mock, 0, SET_NETWORK_KEY, 0);
        stick.set_network_key(&ANT_PLUS_NETWORK_KEY).unwrap();

        // The diverted broadcast is processed by the next tick, before
        // any fresh reads.
        stick.tick().unwrap();
        assert_eq!(stick.channel(0).unwrap().messages_received(), 1);
    }

    #[test]
    fn test_pairing_mismatch_closes_channel_only() {
        let mock = MockTransport::new();
        let mut stick = open_stick(&mock);
        queue_channel_setup(&mock, 0);
        stick.open_channel(hr_profile(), 0x1111).unwrap();

        // Channel id reply naming a different device.
        mock.queue_frame(
            RESPONSE_CHANNEL_ID,
            &[0, 0x22, 0x22, heart_rate::DEVICE_TYPE, 0x01],
        );
        stick.tick().unwrap();
        assert_eq!(stick.channel(0).unwrap().state(), ChannelState::Closed);
    }
}
