//! Protocol constants for the ANT message protocol and the ANT+ device
//! profiles implemented by this crate.
//!
//! Message ids and channel events follow the "ANT Message Protocol and
//! Usage" document; data page numbers come from the individual ANT+ device
//! profile documents.

// ============================================================================
// Device Identification
// ============================================================================

/// Dynastream Innovations vendor id, used by all ANT USB sticks.
pub const ANT_VENDOR_ID: u16 = 0x0FCF;

/// USB1 stick product id.
pub const ANT_USB1_PRODUCT_ID: u16 = 0x1008;
/// USB2/mini stick product id.
pub const ANT_USB2_PRODUCT_ID: u16 = 0x1009;

/// All supported product ids for device discovery. The first match wins.
pub const SUPPORTED_PIDS: &[u16] = &[ANT_USB1_PRODUCT_ID, ANT_USB2_PRODUCT_ID];

/// The public ANT+ network key, installed on network 0.
pub const ANT_PLUS_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];

// ============================================================================
// Framing
// ============================================================================

/// Every frame starts with this byte.
pub const SYNC_BYTE: u8 = 0xA4;

/// sync + length + id + checksum.
pub const FRAME_OVERHEAD: usize = 4;

// ============================================================================
// Message Ids (Host -> Stick, configuration and control)
// ============================================================================

pub const UNASSIGN_CHANNEL: u8 = 0x41;
pub const ASSIGN_CHANNEL: u8 = 0x42;
pub const SET_CHANNEL_PERIOD: u8 = 0x43;
pub const SET_CHANNEL_SEARCH_TIMEOUT: u8 = 0x44;
pub const SET_CHANNEL_RF_FREQ: u8 = 0x45;
pub const SET_NETWORK_KEY: u8 = 0x46;
pub const RESET_SYSTEM: u8 = 0x4A;
pub const OPEN_CHANNEL: u8 = 0x4B;
pub const CLOSE_CHANNEL: u8 = 0x4C;
pub const REQUEST_MESSAGE: u8 = 0x4D;
pub const SET_CHANNEL_ID: u8 = 0x51;

// ============================================================================
// Message Ids (Data, both directions)
// ============================================================================

pub const BROADCAST_DATA: u8 = 0x4E;
pub const ACKNOWLEDGE_DATA: u8 = 0x4F;
pub const BURST_TRANSFER_DATA: u8 = 0x50;

// ============================================================================
// Message Ids (Stick -> Host)
// ============================================================================

pub const CHANNEL_RESPONSE: u8 = 0x40;
pub const STARTUP_MESSAGE: u8 = 0x6F;
pub const SERIAL_ERROR_MESSAGE: u8 = 0xAE;

// Replies to REQUEST_MESSAGE.
pub const RESPONSE_CHANNEL_ID: u8 = 0x51;
pub const RESPONSE_VERSION: u8 = 0x3E;
pub const RESPONSE_CAPABILITIES: u8 = 0x54;
pub const RESPONSE_SERIAL_NUMBER: u8 = 0x61;

// ============================================================================
// Channel assignment
// ============================================================================

/// The only channel type we assign. The stick is always the slave end of a
/// bidirectional receive channel; the sensor is the master.
pub const CHANNEL_TYPE_BIDIRECTIONAL_RECEIVE: u8 = 0x00;

/// Burst frames carry a sequence number in the top 3 bits of the channel
/// byte; mask it off before routing.
pub const BURST_CHANNEL_MASK: u8 = 0x1F;

// ============================================================================
// Heart Rate device profile
// ============================================================================

pub mod heart_rate {
    pub const DEVICE_TYPE: u8 = 0x78;
    pub const CHANNEL_PERIOD: u16 = 8070;
    pub const CHANNEL_FREQUENCY: u8 = 57;
    pub const SEARCH_TIMEOUT: u8 = 30;
}

// ============================================================================
// Fitness Equipment (FE-C) device profile
// ============================================================================

pub mod fitness_equipment {
    pub const DEVICE_TYPE: u8 = 0x11;
    pub const CHANNEL_PERIOD: u16 = 8192;
    pub const CHANNEL_FREQUENCY: u8 = 57;
    pub const SEARCH_TIMEOUT: u8 = 30;

    // Data pages. 0x10/0x19/0x36 are inbound broadcasts, the rest are sent
    // as acknowledged data.
    pub const DP_GENERAL: u8 = 0x10;
    pub const DP_TRAINER_SPECIFIC: u8 = 0x19;
    pub const DP_BASIC_RESISTANCE: u8 = 0x30;
    pub const DP_TARGET_POWER: u8 = 0x31;
    pub const DP_WIND_RESISTANCE: u8 = 0x32;
    pub const DP_TRACK_RESISTANCE: u8 = 0x33;
    pub const DP_FE_CAPABILITIES: u8 = 0x36;
    pub const DP_USER_CONFIG: u8 = 0x37;
}

/// Common page used to ask a master to transmit a specific data page.
pub const DP_REQUEST_DATA_PAGE: u8 = 0x46;
