//! Channel state machine.
//!
//! A channel is a logical session between this host (always the slave) and
//! one remote sensor (the master). The stick routes frames here; the
//! channel tracks pairing state, serializes acknowledged writes against
//! the master's broadcast cadence, and hands decoded pages to its device
//! profile.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, trace, warn};

use crate::error::AntError;
use crate::profiles::{Profile, ProfileCtx};
use crate::protocol::constants::*;
use crate::protocol::{ChannelEvent, Frame};
use crate::stick::StickIo;
use crate::transport::UsbTransport;

/// Identifies the master we pair with. A `device_number` of zero searches
/// for any device of the given type; once paired the observed number is
/// adopted. The number is 20 bits wide: two bytes plus the high nibble of
/// the transmission-type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelId {
    pub transmission_type: u8,
    pub device_type: u8,
    pub device_number: u32,
}

impl ChannelId {
    pub fn search(device_type: u8, device_number: u32) -> Self {
        Self {
            transmission_type: 0,
            device_type,
            device_number,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type {:#04X} number {}",
            self.device_type, self.device_number
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Searching for a master.
    Searching,
    /// Paired; broadcasts flowing.
    Open,
    /// Terminal. The channel must be released and rebuilt.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Searching => write!(f, "searching"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// RF parameters of a channel, fixed per device profile.
#[derive(Debug, Clone, Copy)]
pub struct ChannelParams {
    pub device_type: u8,
    pub period: u16,
    pub search_timeout: u8,
    pub rf_frequency: u8,
}

/// A queued acknowledged-data message. The tag comes back with the
/// delivery outcome so profiles can tell which write resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckItem {
    pub tag: i32,
    pub payload: Vec<u8>,
}

/// FIFO of acknowledged writes. Acknowledged data can only be transmitted
/// in the listen window following a broadcast, one message at a time, so
/// submissions queue up here.
#[derive(Debug, Default)]
pub struct AckQueue {
    items: VecDeque<AckItem>,
}

impl AckQueue {
    pub fn push(&mut self, tag: i32, payload: Vec<u8>) {
        self.items.push_back(AckItem { tag, payload });
    }

    /// Ask the master to transmit data page `page_id` `transmit_count`
    /// times. A successful transmission of the request does not guarantee
    /// the master will answer; replies arrive as normal broadcasts.
    pub fn request_data_page(&mut self, page_id: u8, transmit_count: u8) {
        let payload = vec![
            DP_REQUEST_DATA_PAGE,
            0xFF, // slave serial LSB
            0xFF, // slave serial MSB
            0xFF, // descriptor 1
            0xFF, // descriptor 2
            transmit_count,
            page_id,
            0x01, // command type: request data page
        ];
        self.push(page_id as i32, payload);
    }

    pub fn front(&self) -> Option<&AckItem> {
        self.items.front()
    }

    pub fn pop(&mut self) -> Option<AckItem> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// One paired (or pairing) sensor session.
pub struct AntChannel {
    number: u8,
    id: ChannelId,
    state: ChannelState,
    acks: AckQueue,
    ack_outstanding: bool,
    id_request_outstanding: bool,
    messages_received: u64,
    messages_failed: u64,
    profile: Profile,
}

impl AntChannel {
    pub(crate) fn new(number: u8, id: ChannelId, profile: Profile) -> Self {
        Self {
            number,
            id,
            state: ChannelState::Searching,
            acks: AckQueue::default(),
            ack_outstanding: false,
            id_request_outstanding: false,
            messages_received: 0,
            messages_failed: 0,
            profile,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn channel_id(&self) -> ChannelId {
        self.id
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn messages_failed(&self) -> u64 {
        self.messages_failed
    }

    /// Number of acknowledged writes waiting to be dispatched.
    pub fn pending_acks(&self) -> usize {
        self.acks.len() + usize::from(self.ack_outstanding)
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Queue `payload` for transmission as acknowledged data. The message
    /// goes out at the next broadcast opportunity; the profile's ack-reply
    /// hook fires with `tag` and the delivery outcome. Failed transfers
    /// are not retried.
    pub fn send_ack(&mut self, tag: i32, payload: Vec<u8>) {
        self.acks.push(tag, payload);
    }

    /// Update the simulated track slope (FE-C channels only).
    pub fn set_slope(&mut self, slope: f64) {
        if let Profile::FitnessEquipment(fec) = &mut self.profile {
            fec.set_slope(slope, &mut self.acks);
        }
    }

    /// Update rider/bike parameters (FE-C channels only). Sent to the
    /// trainer at the next broadcast opportunity.
    pub fn set_user_params(&mut self, rider_weight_kg: f64, bike_weight_kg: f64, wheel_diameter_m: f64) {
        if let Profile::FitnessEquipment(fec) = &mut self.profile {
            fec.set_user_params(rider_weight_kg, bike_weight_kg, wheel_diameter_m);
        }
    }

    /// Force the channel into its terminal state without touching the
    /// wire. Used when a channel-fatal error was already reported.
    pub(crate) fn force_close(&mut self) {
        self.change_state(ChannelState::Closed);
    }

    /// Process one frame routed to this channel by the stick.
    pub(crate) fn handle_frame<T: UsbTransport>(
        &mut self,
        frame: &Frame,
        io: &mut StickIo<T>,
    ) -> Result<(), AntError> {
        if self.state == ChannelState::Closed {
            trace!(channel = self.number, "dropping frame for closed channel");
            return Ok(());
        }

        match frame.id {
            CHANNEL_RESPONSE => self.on_channel_response(frame, io),
            BROADCAST_DATA => self.on_broadcast(frame, io),
            RESPONSE_CHANNEL_ID => self.on_channel_id(frame),
            other => {
                debug!(channel = self.number, id = other, "ignoring message");
                Ok(())
            }
        }
    }

    fn on_broadcast<T: UsbTransport>(
        &mut self,
        frame: &Frame,
        io: &mut StickIo<T>,
    ) -> Result<(), AntError> {
        let Some(page) = frame.payload.get(1..) else {
            warn!(channel = self.number, "dropping empty broadcast");
            return Ok(());
        };
        if page.len() < 8 {
            warn!(channel = self.number, len = page.len(), "dropping short broadcast");
            return Ok(());
        }

        // First broadcast while searching for "any device": ask the stick
        // who is talking to us. One request outstanding at a time.
        if self.id.device_number == 0 && !self.id_request_outstanding {
            io.write_frame(&Frame::new(
                REQUEST_MESSAGE,
                vec![self.number, SET_CHANNEL_ID],
            ))?;
            self.id_request_outstanding = true;
        }

        self.maybe_send_ack(io)?;

        let mut ctx = ProfileCtx {
            device_number: self.id.device_number,
            acks: &mut self.acks,
        };
        self.profile.on_broadcast(page, &mut ctx);
        self.messages_received += 1;
        Ok(())
    }

    /// Send the front of the ack queue, if any and none is outstanding.
    fn maybe_send_ack<T: UsbTransport>(&mut self, io: &mut StickIo<T>) -> Result<(), AntError> {
        if self.ack_outstanding {
            return Ok(());
        }
        if let Some(item) = self.acks.front() {
            let mut payload = Vec::with_capacity(item.payload.len() + 1);
            payload.push(self.number);
            payload.extend_from_slice(&item.payload);
            io.write_frame(&Frame::new(ACKNOWLEDGE_DATA, payload))?;
            self.ack_outstanding = true;
        }
        Ok(())
    }

    fn on_channel_response<T: UsbTransport>(
        &mut self,
        frame: &Frame,
        io: &mut StickIo<T>,
    ) -> Result<(), AntError> {
        let [_, msg_id, code, ..] = frame.payload[..] else {
            warn!(channel = self.number, "dropping short channel response");
            return Ok(());
        };

        // msg_id 1 marks a general RF event; anything else is the status
        // reply to a command, which the synchronous exchanges consume
        // before we ever get here.
        if msg_id != 1 {
            debug!(
                channel = self.number,
                command = msg_id,
                code,
                "unexpected command reply"
            );
            return Ok(());
        }

        let event = ChannelEvent::from_u8(code);
        match event {
            ChannelEvent::RxFail => {
                self.messages_failed += 1;
                Ok(())
            }
            ChannelEvent::RxSearchTimeout => {
                // The stick follows up with EVENT_CHANNEL_CLOSED; nothing
                // to do yet.
                Ok(())
            }
            ChannelEvent::ChannelClosed => {
                if self.state != ChannelState::Closed {
                    self.change_state(ChannelState::Closed);
                    io.write_frame(&Frame::new(UNASSIGN_CHANNEL, vec![self.number]))?;
                    let response = io.read_internal()?;
                    io.check_channel_response(&response, self.number, UNASSIGN_CHANNEL)?;
                }
                Ok(())
            }
            ChannelEvent::RxFailGoToSearch => {
                // Lost the master; it must identify itself again.
                self.id.device_number = 0;
                self.change_state(ChannelState::Searching);
                Ok(())
            }
            ChannelEvent::ResponseNoError => Ok(()),
            other if self.ack_outstanding => {
                // Delivery outcome for the acknowledged message in flight.
                if let Some(item) = self.acks.pop() {
                    self.ack_outstanding = false;
                    let mut ctx = ProfileCtx {
                        device_number: self.id.device_number,
                        acks: &mut self.acks,
                    };
                    self.profile.on_ack_reply(item.tag, other, &mut ctx);
                }
                Ok(())
            }
            other => {
                debug!(channel = self.number, event = %other, "unhandled channel event");
                Ok(())
            }
        }
    }

    fn on_channel_id(&mut self, frame: &Frame) -> Result<(), AntError> {
        let [channel, number_lsb, number_msb, device_type, transmission, ..] = frame.payload[..]
        else {
            warn!(channel = self.number, "dropping short channel id reply");
            return Ok(());
        };
        if channel != self.number {
            return Err(AntError::Framing("channel id reply routed to wrong channel"));
        }

        // The high nibble of the transmission-type byte holds the top 4
        // bits of the 20 bit device number.
        let device_number = u32::from(number_lsb)
            | u32::from(number_msb) << 8
            | u32::from((transmission >> 4) & 0x0F) << 16;

        if self.id.device_type == 0 {
            self.id.device_type = device_type;
        } else if self.id.device_type != device_type {
            return Err(AntError::PairingMismatch {
                channel: self.number,
                expected: self.id.device_type as u32,
                observed: device_type as u32,
            });
        }

        if self.id.device_number == 0 {
            self.id.device_number = device_number;
        } else if self.id.device_number != device_number {
            return Err(AntError::PairingMismatch {
                channel: self.number,
                expected: self.id.device_number,
                observed: device_number,
            });
        }

        self.id.transmission_type = transmission & 0x03;

        // Early replies may arrive before the master's number is known;
        // only a non-zero number means we are paired.
        if self.id.device_number != 0 {
            self.change_state(ChannelState::Open);
        }
        self.id_request_outstanding = false;
        Ok(())
    }

    fn change_state(&mut self, new_state: ChannelState) {
        if self.state != new_state {
            debug!(
                channel = self.number,
                from = %self.state,
                to = %new_state,
                "channel state change"
            );
            let old = self.state;
            self.state = new_state;
            self.profile.on_state_changed(old, new_state);
        }
    }
}
