//! ANT+ heart rate monitor profile.
//!
//! Based on the "ANT+ Device Profile - Heart Rate" document. Only the
//! instantaneous heart rate is exposed; averaged HR recovery for missed
//! broadcasts and R-R interval handling are not implemented.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::channel::{ChannelParams, ChannelState};
use crate::clock::Clock;
use crate::protocol::constants::heart_rate::*;

/// Measurements older than this read as zero.
const STALE_TIMEOUT_MS: u64 = 5000;

pub struct HeartRateMonitor {
    clock: Arc<dyn Clock>,

    // Old straps predate data pages; page numbers are only meaningful
    // once the high bit of the page byte has been seen toggling.
    page_toggle_seen: bool,
    last_page_high_bit: Option<bool>,
    data_page: u8,

    last_measurement_time: u16,
    measurement_time: u16,
    heart_beats: u8,
    instant_heart_rate: u8,
    updated_at_ms: u64,
}

impl HeartRateMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            page_toggle_seen: false,
            last_page_high_bit: None,
            data_page: 0,
            last_measurement_time: 0,
            measurement_time: 0,
            heart_beats: 0,
            instant_heart_rate: 0,
            updated_at_ms: 0,
        }
    }

    pub fn channel_params() -> ChannelParams {
        ChannelParams {
            device_type: DEVICE_TYPE,
            period: CHANNEL_PERIOD,
            search_timeout: SEARCH_TIMEOUT,
            rf_frequency: CHANNEL_FREQUENCY,
        }
    }

    /// Beats per minute from the latest broadcast, or zero when the value
    /// is stale.
    pub fn instant_heart_rate(&self) -> f64 {
        if self.clock.now_ms().saturating_sub(self.updated_at_ms) > STALE_TIMEOUT_MS {
            0.0
        } else {
            self.instant_heart_rate as f64
        }
    }

    /// Beat event time of the latest broadcast, in 1/1024 s units.
    pub fn measurement_time(&self) -> u16 {
        self.measurement_time
    }

    /// Running beat counter from the strap.
    pub fn heart_beats(&self) -> u8 {
        self.heart_beats
    }

    pub(crate) fn on_broadcast(&mut self, page: &[u8]) {
        let high_bit = page[0] & 0x80 != 0;
        if let Some(last) = self.last_page_high_bit {
            if last != high_bit {
                self.page_toggle_seen = true;
            }
        }
        self.last_page_high_bit = Some(high_bit);
        if self.page_toggle_seen {
            self.data_page = page[0] & 0x7F;
        }

        // The last three informational bytes are the same on every data
        // page, so extraction does not depend on the page number.
        self.last_measurement_time = self.measurement_time;
        self.measurement_time = LittleEndian::read_u16(&page[4..6]);
        self.heart_beats = page[6];
        self.instant_heart_rate = page[7];
        self.updated_at_ms = self.clock.now_ms();
    }

    pub(crate) fn on_state_changed(&mut self, _old: ChannelState, new_state: ChannelState) {
        if new_state != ChannelState::Open {
            self.last_measurement_time = 0;
            self.measurement_time = 0;
            self.heart_beats = 0;
            self.instant_heart_rate = 0;
            self.updated_at_ms = 0;
        }
    }
}
