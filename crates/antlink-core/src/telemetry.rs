//! TCP telemetry fan-out.
//!
//! Clients connect and receive a newline-terminated `TELEMETRY` line with
//! the latest sampled measurements; they can send commands
//! (`SET-SLOPE <grade>`, `SET-USER <rider-kg> <bike-kg> <wheel-m>`) back.
//! Everything is non-blocking and driven from the same cooperative loop
//! as the stick tick.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::channel::ChannelState;
use crate::clock::Clock;
use crate::events::{AntEvent, AntObserver};
use crate::profiles::{Profile, ProfileKind};
use crate::stick::AntStick;
use crate::transport::UsbTransport;

/// Minimum spacing between telemetry lines.
const SAMPLE_INTERVAL_MS: u64 = 100;

/// A "current" reading from the sensors. Values come from different
/// channels and may not be perfectly in sync; absent fields mean the
/// sensor is not paired or its data is stale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub power: Option<f64>,
    pub speed: Option<f64>,
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut field = |f: &mut fmt::Formatter<'_>, label: &str, value: Option<f64>| {
            if let Some(v) = value {
                if !first {
                    write!(f, ";")?;
                }
                first = false;
                write!(f, "{label}: {v}")?;
            }
            Ok(())
        };
        field(f, "HR", self.heart_rate)?;
        field(f, "CAD", self.cadence)?;
        field(f, "PWR", self.power)?;
        field(f, "SPD", self.speed)
    }
}

/// Commands accepted from telemetry clients.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    SetSlope(f64),
    SetUser {
        rider_weight_kg: f64,
        bike_weight_kg: f64,
        wheel_diameter_m: f64,
    },
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "SET-SLOPE" => {
            let slope = words.next()?.parse().ok()?;
            Some(Command::SetSlope(slope))
        }
        "SET-USER" => {
            let rider_weight_kg = words.next()?.parse().ok()?;
            let bike_weight_kg = words.next()?.parse().ok()?;
            let wheel_diameter_m = words.next()?.parse().ok()?;
            Some(Command::SetUser {
                rider_weight_kg,
                bike_weight_kg,
                wheel_diameter_m,
            })
        }
        _ => None,
    }
}

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    inbuf: Vec<u8>,
    dead: bool,
}

pub struct TelemetryServer {
    listener: TcpListener,
    clients: Vec<Client>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AntObserver>,
    last_sample_ms: u64,
}

impl TelemetryServer {
    /// Bind the listener; port 0 picks an ephemeral port.
    pub fn bind(
        port: u16,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn AntObserver>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            clients: Vec::new(),
            clock,
            observer,
            last_sample_ms: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// One server step: accept, read commands, apply them to the stick,
    /// and fan the latest sample out.
    pub fn tick<T: UsbTransport>(&mut self, stick: &mut AntStick<T>) {
        self.accept_clients();

        let commands = self.collect_commands();
        for command in commands {
            self.apply_command(command, stick);
        }

        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_sample_ms) >= SAMPLE_INTERVAL_MS {
            self.last_sample_ms = now;
            let sample = sample(stick);
            self.broadcast(&sample);
        }

        self.reap_dead_clients();
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(peer = %peer, error = %e, "rejecting client");
                        continue;
                    }
                    self.observer.on_event(&AntEvent::ClientConnected { peer });
                    self.clients.push(Client {
                        stream,
                        peer,
                        inbuf: Vec::new(),
                        dead: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn collect_commands(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        for client in &mut self.clients {
            let mut chunk = [0u8; 256];
            loop {
                match client.stream.read(&mut chunk) {
                    Ok(0) => {
                        client.dead = true;
                        break;
                    }
                    Ok(n) => client.inbuf.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        debug!(peer = %client.peer, error = %e, "client read failed");
                        client.dead = true;
                        break;
                    }
                }
            }
            while let Some(newline) = client.inbuf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = client.inbuf.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line[..line.len() - 1]);
                match parse_command(line.trim()) {
                    Some(command) => commands.push(command),
                    None => debug!(peer = %client.peer, line = %line, "ignoring command"),
                }
            }
        }
        commands
    }

    fn apply_command<T: UsbTransport>(&self, command: Command, stick: &mut AntStick<T>) {
        let Some(number) = stick
            .channels()
            .find(|c| c.profile().kind() == ProfileKind::FitnessEquipment)
            .map(|c| c.number())
        else {
            debug!("no fitness equipment channel for command");
            return;
        };
        let Some(channel) = stick.channel_mut(number) else {
            return;
        };
        match command {
            Command::SetSlope(slope) => {
                self.observer.on_event(&AntEvent::SlopeRequested { slope });
                channel.set_slope(slope);
            }
            Command::SetUser {
                rider_weight_kg,
                bike_weight_kg,
                wheel_diameter_m,
            } => {
                self.observer.on_event(&AntEvent::UserParamsRequested {
                    rider_weight_kg,
                    bike_weight_kg,
                    wheel_diameter_m,
                });
                channel.set_user_params(rider_weight_kg, bike_weight_kg, wheel_diameter_m);
            }
        }
    }

    fn broadcast(&mut self, sample: &Telemetry) {
        let line = format!("TELEMETRY {sample}\n");
        for client in &mut self.clients {
            match client.stream.write_all(line.as_bytes()) {
                Ok(()) => {}
                // A slow client just misses this sample.
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!(peer = %client.peer, error = %e, "client write failed");
                    client.dead = true;
                }
            }
        }
    }

    fn reap_dead_clients(&mut self) {
        for client in self.clients.iter().filter(|c| c.dead) {
            self.observer
                .on_event(&AntEvent::ClientDisconnected { peer: client.peer });
        }
        self.clients.retain(|c| !c.dead);
    }
}

/// Read the latest values from every open channel.
pub fn sample<T: UsbTransport>(stick: &AntStick<T>) -> Telemetry {
    let mut out = Telemetry::default();
    for channel in stick.channels() {
        if channel.state() != ChannelState::Open {
            continue;
        }
        match channel.profile() {
            Profile::HeartRate(hrm) => {
                out.heart_rate = Some(hrm.instant_heart_rate());
            }
            Profile::FitnessEquipment(fec) => {
                out.cadence = Some(fec.instant_cadence());
                out.power = Some(fec.instant_power());
                out.speed = Some(fec.instant_speed());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::NullObserver;
    use crate::profiles::FitnessEquipment;
    use crate::protocol::constants::*;
    use crate::transport::MockTransport;
    use std::io::BufRead;
    use std::time::Duration;

    #[test]
    fn test_telemetry_line_format() {
        let t = Telemetry {
            heart_rate: Some(146.0),
            cadence: Some(78.0),
            power: Some(214.0),
            speed: Some(4.2),
        };
        assert_eq!(t.to_string(), "HR: 146;CAD: 78;PWR: 214;SPD: 4.2");

        let partial = Telemetry {
            heart_rate: None,
            cadence: Some(78.0),
            power: None,
            speed: Some(4.2),
        };
        assert_eq!(partial.to_string(), "CAD: 78;SPD: 4.2");
        assert_eq!(Telemetry::default().to_string(), "");
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("SET-SLOPE 3.5"), Some(Command::SetSlope(3.5)));
        assert_eq!(
            parse_command("SET-USER 80 9.5 0.7"),
            Some(Command::SetUser {
                rider_weight_kg: 80.0,
                bike_weight_kg: 9.5,
                wheel_diameter_m: 0.7,
            })
        );
        assert_eq!(parse_command("SET-SLOPE"), None);
        assert_eq!(parse_command("SET-SLOPE x"), None);
        assert_eq!(parse_command("NOISE 1 2 3"), None);
        assert_eq!(parse_command(""), None);
    }

    fn stick_with_fec(mock: &MockTransport) -> AntStick<MockTransport> {
        mock.queue_frame(STARTUP_MESSAGE, &[0x20]);
        mock.queue_frame(RESPONSE_SERIAL_NUMBER, &[1, 0, 0, 0]);
        mock.queue_frame(RESPONSE_VERSION, b"X\0");
        mock.queue_frame(RESPONSE_CAPABILITIES, &[8, 3, 0, 0]);
        for command in [
            ASSIGN_CHANNEL,
            SET_CHANNEL_ID,
            SET_CHANNEL_PERIOD,
            SET_CHANNEL_SEARCH_TIMEOUT,
            SET_CHANNEL_RF_FREQ,
            OPEN_CHANNEL,
        ] {
            mock.queue_frame(CHANNEL_RESPONSE, &[0, command, 0]);
        }
        let mut stick = AntStick::open(mock.clone()).unwrap();
        stick
            .open_channel(
                Profile::FitnessEquipment(FitnessEquipment::new(ManualClock::new())),
                0x3412,
            )
            .unwrap();
        stick
    }

    #[test]
    fn test_slope_command_reaches_trainer() {
        let mock = MockTransport::new();
        let mut stick = stick_with_fec(&mock);
        let clock = ManualClock::new();
        let mut server =
            TelemetryServer::bind(0, clock.clone(), Arc::new(NullObserver)).unwrap();
        let addr = server.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client.write_all(b"SET-SLOPE 3.5\n").unwrap();
        client.flush().unwrap();

        // Drive the server until the command has been read and applied.
        let mut applied = false;
        for _ in 0..100 {
            server.tick(&mut stick);
            if stick.channel(0).unwrap().pending_acks() > 0 {
                applied = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(applied, "slope command never queued a write");

        // The next broadcast dispatches the queued track resistance page.
        mock.clear_writes();
        mock.queue_frame(BROADCAST_DATA, &[0, 0x19, 0, 90, 0, 0, 0xC8, 0x00, 0x30]);
        stick.tick().unwrap();

        let acks: Vec<_> = mock
            .written_frames()
            .into_iter()
            .filter(|f| f.id == ACKNOWLEDGE_DATA)
            .collect();
        assert_eq!(acks.len(), 1);
        // Page 0x33 with (3.5 + 200) / 0.01 = 20350 = 0x4F7E little
        // endian in payload bytes 6 and 7 (after the channel byte).
        assert_eq!(acks[0].payload[1], fitness_equipment::DP_TRACK_RESISTANCE);
        assert_eq!(acks[0].payload[6], 0x7E);
        assert_eq!(acks[0].payload[7], 0x4F);
    }

    #[test]
    fn test_client_receives_telemetry_line() {
        let mock = MockTransport::new();
        let mut stick = stick_with_fec(&mock);
        let clock = ManualClock::new();
        let mut server =
            TelemetryServer::bind(0, clock.clone(), Arc::new(NullObserver)).unwrap();
        let addr = server.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // Keep the clock moving so every tick is a fresh sample interval,
        // whichever tick ends up accepting the client.
        for _ in 0..10 {
            clock.advance(200);
            server.tick(&mut stick);
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut lines = std::io::BufReader::new(client);
        let mut line = String::new();
        lines.read_line(&mut line).unwrap();
        assert!(line.starts_with("TELEMETRY"), "got {line:?}");
    }
}
