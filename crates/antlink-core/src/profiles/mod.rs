//! Device profiles: decoders/encoders for specific ANT+ sensor types.
//!
//! The channel state machine owns the shared plumbing (pairing, ack
//! serialization, counters) and calls into the profile through three
//! hooks. Profiles are a closed set, modeled as an enum rather than trait
//! objects; profile state lives in the variants.

pub mod fitness_equipment;
pub mod heart_rate;

use std::fmt;

use crate::channel::{AckQueue, ChannelParams, ChannelState};
use crate::protocol::ChannelEvent;

pub use fitness_equipment::FitnessEquipment;
pub use heart_rate::HeartRateMonitor;

/// What a profile hook is allowed to touch on its channel: the pairing
/// status and the outbound ack queue.
pub struct ProfileCtx<'a> {
    /// Device number of the paired master, zero while still searching.
    pub device_number: u32,
    pub acks: &'a mut AckQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    HeartRate,
    FitnessEquipment,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileKind::HeartRate => write!(f, "heart rate monitor"),
            ProfileKind::FitnessEquipment => write!(f, "fitness equipment"),
        }
    }
}

pub enum Profile {
    HeartRate(HeartRateMonitor),
    FitnessEquipment(FitnessEquipment),
}

impl Profile {
    pub fn kind(&self) -> ProfileKind {
        match self {
            Profile::HeartRate(_) => ProfileKind::HeartRate,
            Profile::FitnessEquipment(_) => ProfileKind::FitnessEquipment,
        }
    }

    /// RF parameters from the profile's device profile document.
    pub fn channel_params(&self) -> ChannelParams {
        match self {
            Profile::HeartRate(_) => HeartRateMonitor::channel_params(),
            Profile::FitnessEquipment(_) => FitnessEquipment::channel_params(),
        }
    }

    /// Called with the eight data-page bytes of every broadcast received
    /// on the channel.
    pub(crate) fn on_broadcast(&mut self, page: &[u8], ctx: &mut ProfileCtx<'_>) {
        match self {
            Profile::HeartRate(hrm) => hrm.on_broadcast(page),
            Profile::FitnessEquipment(fec) => fec.on_broadcast(page, ctx),
        }
    }

    /// Called with the delivery outcome of an acknowledged write.
    pub(crate) fn on_ack_reply(&mut self, tag: i32, event: ChannelEvent, ctx: &mut ProfileCtx<'_>) {
        match self {
            Profile::HeartRate(_) => {}
            Profile::FitnessEquipment(fec) => fec.on_ack_reply(tag, event, ctx),
        }
    }

    /// Called when the channel state actually changes.
    pub(crate) fn on_state_changed(&mut self, old_state: ChannelState, new_state: ChannelState) {
        match self {
            Profile::HeartRate(hrm) => hrm.on_state_changed(old_state, new_state),
            Profile::FitnessEquipment(fec) => fec.on_state_changed(old_state, new_state),
        }
    }
}
