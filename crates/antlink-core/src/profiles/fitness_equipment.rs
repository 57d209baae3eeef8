//! ANT+ fitness equipment (FE-C) profile.
//!
//! Based on the "ANT+ Device Profile - Fitness Equipment" document. Reads
//! speed, cadence and power from a trainer and controls it through
//! acknowledged writes: user configuration (page 0x37) and track
//! resistance (page 0x33).

use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

use crate::channel::{ChannelParams, ChannelState};
use crate::clock::Clock;
use crate::profiles::ProfileCtx;
use crate::protocol::constants::fitness_equipment::*;
use crate::protocol::ChannelEvent;

/// Measurements older than this read as zero.
const STALE_TIMEOUT_MS: u64 = 5000;

/// How many times the master is asked to repeat a requested page.
const PAGE_TRANSMIT_COUNT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipmentType {
    Unknown,
    General,
    Treadmill,
    Elliptical,
    StationaryBike,
    Rower,
    Climber,
    NordicSkier,
    Trainer,
}

impl EquipmentType {
    fn from_u8(value: u8) -> Self {
        match value {
            16 => EquipmentType::General,
            19 => EquipmentType::Treadmill,
            20 => EquipmentType::Elliptical,
            21 => EquipmentType::StationaryBike,
            22 => EquipmentType::Rower,
            23 => EquipmentType::Climber,
            24 => EquipmentType::NordicSkier,
            25 => EquipmentType::Trainer,
            _ => EquipmentType::Unknown,
        }
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EquipmentType::Unknown => "unknown",
            EquipmentType::General => "general",
            EquipmentType::Treadmill => "treadmill",
            EquipmentType::Elliptical => "elliptical",
            EquipmentType::StationaryBike => "stationary bike",
            EquipmentType::Rower => "rower",
            EquipmentType::Climber => "climber",
            EquipmentType::NordicSkier => "nordic skier",
            EquipmentType::Trainer => "trainer",
        };
        f.write_str(name)
    }
}

/// Equipment state reported in the high nibble of the last page byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Reserved,
    Asleep,
    Ready,
    InUse,
    Finished,
}

impl TrainerState {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => TrainerState::Asleep,
            2 => TrainerState::Ready,
            3 => TrainerState::InUse,
            4 => TrainerState::Finished,
            _ => TrainerState::Reserved,
        }
    }
}

/// Target power status, meaningful in target power mode only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    AtTargetPower,
    SpeedTooLow,
    SpeedTooHigh,
    PowerLimitReached,
}

impl SimulationState {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => SimulationState::SpeedTooLow,
            2 => SimulationState::SpeedTooHigh,
            3 => SimulationState::PowerLimitReached,
            _ => SimulationState::AtTargetPower,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CapabilitiesStatus {
    Unknown,
    Requested,
    Received,
}

pub struct FitnessEquipment {
    clock: Arc<dyn Clock>,

    // User configuration, written to the trainer as page 0x37.
    update_user_config: bool,
    user_weight_kg: f64,
    bike_weight_kg: f64,
    wheel_diameter_m: f64,

    // Simulation mode parameters, written as page 0x33.
    slope: f64,
    rolling_resistance: f64,

    // Capabilities reported by the trainer via page 0x36.
    capabilities_status: CapabilitiesStatus,
    max_resistance_newtons: u16,
    basic_resistance_control: bool,
    target_power_control: bool,
    simulation_control: bool,

    // Calibration / configuration status from page 0x19.
    zero_offset_calibration_required: bool,
    spin_down_calibration_required: bool,
    user_configuration_required: bool,

    equipment_type: EquipmentType,
    trainer_state: TrainerState,
    simulation_state: SimulationState,

    instant_power_watts: f64,
    power_updated_at_ms: u64,
    instant_speed_ms: f64,
    speed_updated_at_ms: u64,
    speed_is_virtual: bool,
    instant_cadence_rpm: f64,
    cadence_updated_at_ms: u64,
}

impl FitnessEquipment {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            update_user_config: true,
            // Reasonable defaults until the caller provides real values.
            user_weight_kg: 75.0,
            bike_weight_kg: 10.0,
            wheel_diameter_m: 0.668,
            slope: 0.0,
            // Recommended by the device profile for asphalt road.
            rolling_resistance: 0.004,
            capabilities_status: CapabilitiesStatus::Unknown,
            max_resistance_newtons: 0,
            basic_resistance_control: false,
            target_power_control: false,
            simulation_control: false,
            zero_offset_calibration_required: false,
            spin_down_calibration_required: false,
            user_configuration_required: false,
            equipment_type: EquipmentType::Unknown,
            trainer_state: TrainerState::Reserved,
            simulation_state: SimulationState::AtTargetPower,
            instant_power_watts: 0.0,
            power_updated_at_ms: 0,
            instant_speed_ms: 0.0,
            speed_updated_at_ms: 0,
            speed_is_virtual: false,
            instant_cadence_rpm: 0.0,
            cadence_updated_at_ms: 0,
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

    fn stale(&self, updated_at_ms: u64) -> bool {
        self.clock.now_ms().saturating_sub(updated_at_ms) > STALE_TIMEOUT_MS
    }

    /// Watts, or zero when stale.
    pub fn instant_power(&self) -> f64 {
        if self.stale(self.power_updated_at_ms) {
            0.0
        } else {
            self.instant_power_watts
        }
    }

    /// Meters per second, or zero when stale.
    pub fn instant_speed(&self) -> f64 {
        if self.stale(self.speed_updated_at_ms) {
            0.0
        } else {
            self.instant_speed_ms
        }
    }

    /// RPM, or zero when stale.
    pub fn instant_cadence(&self) -> f64 {
        if self.stale(self.cadence_updated_at_ms) {
            0.0
        } else {
            self.instant_cadence_rpm
        }
    }

    /// Whether the reported speed is simulated rather than measured.
    pub fn speed_is_virtual(&self) -> bool {
        self.speed_is_virtual
    }

    pub fn equipment_type(&self) -> EquipmentType {
        self.equipment_type
    }

    pub fn trainer_state(&self) -> TrainerState {
        self.trainer_state
    }

    pub fn simulation_state(&self) -> SimulationState {
        self.simulation_state
    }

    /// Maximum applicable resistance in Newtons, zero until page 0x36 has
    /// been received.
    pub fn max_resistance(&self) -> u16 {
        self.max_resistance_newtons
    }

    pub fn supports_basic_resistance(&self) -> bool {
        self.basic_resistance_control
    }

    pub fn supports_target_power(&self) -> bool {
        self.target_power_control
    }

    pub fn supports_simulation(&self) -> bool {
        self.simulation_control
    }

    pub fn user_configuration_required(&self) -> bool {
        self.user_configuration_required
    }

    /// Record new rider/bike parameters; the user config page goes out at
    /// the next broadcast opportunity.
    pub fn set_user_params(&mut self, rider_weight_kg: f64, bike_weight_kg: f64, wheel_diameter_m: f64) {
        self.user_weight_kg = rider_weight_kg;
        self.bike_weight_kg = bike_weight_kg;
        self.wheel_diameter_m = wheel_diameter_m;
        self.update_user_config = true;
    }

    /// Update the simulated grade and push it to the trainer immediately.
    pub fn set_slope(&mut self, slope: f64, acks: &mut crate::channel::AckQueue) {
        info!(slope, "setting track slope");
        self.slope = slope;
        self.send_track_resistance(acks);
    }

    pub(crate) fn on_broadcast(&mut self, page: &[u8], ctx: &mut ProfileCtx<'_>) {
        match page[0] {
            DP_GENERAL => self.process_general_page(page),
            DP_TRAINER_SPECIFIC => self.process_trainer_specific_page(page),
            DP_FE_CAPABILITIES => self.process_capabilities_page(page),
            other => debug!(page = other, "unhandled data page"),
        }

        if ctx.device_number == 0 {
            // Nothing is requested until we know who we are paired with.
        } else if self.capabilities_status == CapabilitiesStatus::Unknown {
            ctx.acks
                .request_data_page(DP_FE_CAPABILITIES, PAGE_TRANSMIT_COUNT);
            self.capabilities_status = CapabilitiesStatus::Requested;
        } else if self.update_user_config && self.capabilities_status == CapabilitiesStatus::Received
        {
            self.send_user_config(ctx.acks);
        }
    }

    pub(crate) fn on_ack_reply(
        &mut self,
        tag: i32,
        event: ChannelEvent,
        ctx: &mut ProfileCtx<'_>,
    ) {
        if event == ChannelEvent::TransferTxCompleted {
            return;
        }
        // The transfer failed; re-arm whatever state drives that request.
        // The channel itself never retries.
        match tag {
            t if t == DP_FE_CAPABILITIES as i32 => {
                self.capabilities_status = CapabilitiesStatus::Unknown;
            }
            t if t == DP_USER_CONFIG as i32 => {
                self.update_user_config = true;
            }
            t if t == DP_TRACK_RESISTANCE as i32 => {
                self.send_track_resistance(ctx.acks);
            }
            _ => {}
        }
    }

    pub(crate) fn on_state_changed(&mut self, _old: ChannelState, new_state: ChannelState) {
        if new_state != ChannelState::Open {
            self.capabilities_status = CapabilitiesStatus::Unknown;
            self.max_resistance_newtons = 0;
            self.basic_resistance_control = false;
            self.target_power_control = false;
            self.simulation_control = false;

            self.zero_offset_calibration_required = false;
            self.spin_down_calibration_required = false;
            self.user_configuration_required = false;

            self.instant_power_watts = 0.0;
            self.power_updated_at_ms = 0;
            self.instant_speed_ms = 0.0;
            self.speed_updated_at_ms = 0;
            self.speed_is_virtual = false;
            self.instant_cadence_rpm = 0.0;
            self.cadence_updated_at_ms = 0;
            self.trainer_state = TrainerState::Reserved;
            self.simulation_state = SimulationState::AtTargetPower;
        }
    }

    /// Page 0x10: equipment type, speed, capability bits, state.
    fn process_general_page(&mut self, page: &[u8]) {
        self.equipment_type = EquipmentType::from_u8(page[1] & 0x1F);
        self.instant_speed_ms = f64::from(LittleEndian::read_u16(&page[4..6])) * 0.001;
        self.speed_updated_at_ms = self.clock.now_ms();

        // Low nibble holds capability bits (bit 3 is the lap toggle, which
        // we ignore); high nibble the equipment state.
        let capabilities = page[7] & 0x0F;
        self.speed_is_virtual = capabilities & 0x03 != 0;
        self.trainer_state = TrainerState::from_bits(page[7] >> 4);
    }

    /// Page 0x19: cadence, 12-bit instantaneous power, status flags.
    fn process_trainer_specific_page(&mut self, page: &[u8]) {
        self.instant_cadence_rpm = page[2] as f64;
        self.cadence_updated_at_ms = self.clock.now_ms();

        let power_lsb = page[5];
        let power_msb = page[6] & 0x0F;
        self.instant_power_watts = f64::from(u16::from(power_msb) << 8 | u16::from(power_lsb));
        self.power_updated_at_ms = self.clock.now_ms();

        let trainer_status = page[6] >> 4;
        self.zero_offset_calibration_required = trainer_status & 0x01 != 0;
        self.spin_down_calibration_required = trainer_status & 0x02 != 0;
        self.user_configuration_required = trainer_status & 0x04 != 0;
        self.update_user_config = self.update_user_config || self.user_configuration_required;

        let flags = page[7] & 0x0F;
        self.simulation_state = SimulationState::from_bits(flags);
        self.trainer_state = TrainerState::from_bits(page[7] >> 4);
    }

    /// Page 0x36: max resistance and supported control modes. The trainer
    /// may send this page more than once.
    fn process_capabilities_page(&mut self, page: &[u8]) {
        let max_resistance = LittleEndian::read_u16(&page[5..7]);
        let capabilities = page[7];
        let basic = capabilities & 0x01 != 0;
        let target_power = capabilities & 0x02 != 0;
        let simulation = capabilities & 0x04 != 0;

        if self.capabilities_status != CapabilitiesStatus::Received
            || basic != self.basic_resistance_control
            || target_power != self.target_power_control
            || simulation != self.simulation_control
        {
            self.capabilities_status = CapabilitiesStatus::Received;
            self.max_resistance_newtons = max_resistance;
            self.basic_resistance_control = basic;
            self.target_power_control = target_power;
            self.simulation_control = simulation;
            info!(
                max_resistance_newtons = max_resistance,
                basic_resistance = basic,
                target_power,
                simulation,
                "trainer capabilities"
            );
        }
    }

    /// Page 0x37: rider weight in 0.01 kg, bike weight in 0.05 kg (12
    /// bits), wheel diameter as whole centimeters plus a millimeter
    /// offset.
    fn send_user_config(&mut self, acks: &mut crate::channel::AckQueue) {
        info!(
            rider_weight_kg = self.user_weight_kg,
            bike_weight_kg = self.bike_weight_kg,
            wheel_diameter_m = self.wheel_diameter_m,
            "sending user configuration"
        );
        let rider = (self.user_weight_kg * 100.0).round() as u16;
        let bike = (self.bike_weight_kg * 20.0).round() as u16;
        let wheel_cm = (self.wheel_diameter_m * 100.0) as u16;
        let wheel_mm = (self.wheel_diameter_m * 1000.0).round() as u16 - wheel_cm * 10;

        let payload = vec![
            DP_USER_CONFIG,
            (rider & 0xFF) as u8,
            (rider >> 8) as u8,
            0xFF, // reserved
            (wheel_mm & 0x0F) as u8 | (((bike & 0x0F) as u8) << 4),
            ((bike >> 4) & 0xFF) as u8,
            (wheel_cm & 0xFF) as u8,
            0x00, // gear ratio: invalid / unused
        ];
        acks.push(DP_USER_CONFIG as i32, payload);
        self.update_user_config = false;
    }

    /// Page 0x33: grade offset by 200% in 0.01% units, rolling resistance
    /// coefficient scaled by 5e-7.
    fn send_track_resistance(&self, acks: &mut crate::channel::AckQueue) {
        let raw_slope = ((self.slope + 200.0) * 100.0).round() as u16;
        let raw_rr = (self.rolling_resistance * 5e5) as u8;
        let payload = vec![
            DP_TRACK_RESISTANCE,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            (raw_slope & 0xFF) as u8,
            (raw_slope >> 8) as u8,
            raw_rr,
        ];
        acks.push(DP_TRACK_RESISTANCE as i32, payload);
    }
}
