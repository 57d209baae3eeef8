//! nusb-based USB transport.
//!
//! Keeps at most one IN and one OUT transfer in flight. A read that times
//! out leaves its transfer pending; the next read waits on the same
//! transfer instead of submitting another one.

use std::sync::Mutex;
use std::time::Duration;

use nusb::transfer::{Bulk, In, Out, TransferError};
use nusb::{list_devices, Endpoint, MaybeFuture};
use tracing::{debug, info, instrument, warn};

use super::traits::{TransportError as Error, UsbTransport};
use crate::protocol::constants::{ANT_VENDOR_ID, SUPPORTED_PIDS};

/// Size of a single bulk IN transfer. ANT frames are at most 259 bytes but
/// in practice much smaller; 128 matches the stick's packet cadence.
const READ_SIZE: usize = 128;

pub struct NusbTransport {
    // Endpoint I/O needs &mut; the trait is &self so callers can share the
    // transport between the reader and writer halves.
    ep_in: Mutex<Endpoint<Bulk, In>>,
    ep_out: Mutex<Endpoint<Bulk, Out>>,
    in_addr: u8,
    out_addr: u8,
    pid: u16,
}

impl NusbTransport {
    /// Open the first ANT stick found on the bus.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, Error> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| Error::OpenFailed(e.to_string()))?
            .find(|d| {
                d.vendor_id() == ANT_VENDOR_ID && SUPPORTED_PIDS.contains(&d.product_id())
            })
            .ok_or(Error::DeviceNotFound { vid: ANT_VENDOR_ID })?;

        let pid = device_info.product_id();
        info!(
            vendor_id = %format!("{:04X}", ANT_VENDOR_ID),
            product_id = %format!("{:04X}", pid),
            "Found ANT stick"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| Error::OpenFailed(e.to_string()))?;

        // The sticks expose a single configuration; make sure it is active
        // before claiming anything.
        match device.active_configuration() {
            Ok(config) if config.configuration_value() == 1 => {}
            _ => {
                if let Err(e) = device.set_configuration(1).wait() {
                    warn!(error = %e, "could not select configuration 1");
                }
            }
        }

        // A previous user may have left transfers half-finished; knock the
        // device back to a known state. Not every platform supports this,
        // so a failure is not fatal.
        if let Err(e) = device.reset().wait() {
            warn!(error = %e, "device reset failed");
        }

        // On Linux the stick may be bound to a serial driver; detach it.
        let interface = device
            .detach_and_claim_interface(0)
            .wait()
            .map_err(|e| Error::ClaimInterfaceFailed {
                interface: 0,
                message: e.to_string(),
            })?;

        let (in_addr, out_addr) = find_bulk_endpoints(&device)?;

        let mut ep_in = interface
            .endpoint::<Bulk, In>(in_addr)
            .map_err(|e| Error::OpenFailed(e.to_string()))?;
        let mut ep_out = interface
            .endpoint::<Bulk, Out>(out_addr)
            .map_err(|e| Error::OpenFailed(e.to_string()))?;

        // Clear halts left over from a previous user of the stick.
        if let Err(e) = ep_in.clear_halt().wait() {
            warn!(error = %e, endpoint = %format!("{in_addr:#04X}"), "clear halt failed");
        }
        if let Err(e) = ep_out.clear_halt().wait() {
            warn!(error = %e, endpoint = %format!("{out_addr:#04X}"), "clear halt failed");
        }

        info!(
            in_ep = %format!("{in_addr:#04X}"),
            out_ep = %format!("{out_addr:#04X}"),
            "ANT stick opened"
        );

        Ok(Self {
            ep_in: Mutex::new(ep_in),
            ep_out: Mutex::new(ep_out),
            in_addr,
            out_addr,
            pid,
        })
    }
}

fn find_bulk_endpoints(device: &nusb::Device) -> Result<(u8, u8), Error> {
    let mut in_addr = None;
    let mut out_addr = None;

    for config in device.configurations() {
        for iface in config.interfaces() {
            if iface.interface_number() != 0 {
                continue;
            }
            for alt in iface.alt_settings() {
                for ep in alt.endpoints() {
                    if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                        if ep.direction() == nusb::transfer::Direction::In {
                            in_addr = Some(ep.address());
                        } else {
                            out_addr = Some(ep.address());
                        }
                    }
                }
            }
        }
    }

    let in_addr = in_addr.ok_or(Error::EndpointNotFound { direction: "IN" })?;
    let out_addr = out_addr.ok_or(Error::EndpointNotFound { direction: "OUT" })?;
    Ok((in_addr, out_addr))
}

fn map_transfer_error(err: TransferError, endpoint: u8) -> Error {
    match err {
        TransferError::Stall => Error::Stall { endpoint },
        TransferError::Disconnected => Error::Disconnected,
        other => Error::ReadFailed(other.to_string()),
    }
}

impl UsbTransport for NusbTransport {
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, Error> {
        let mut ep = self.ep_in.lock().unwrap();

        // One transfer outstanding at a time: only submit when nothing is
        // pending from an earlier timed-out wait.
        if ep.pending() == 0 {
            let buf = ep.allocate(READ_SIZE.min(max_len.max(1)));
            ep.submit(buf);
        }

        let Some(completion) = ep.wait_next_complete(timeout) else {
            return Err(Error::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        };

        completion
            .status
            .map_err(|e| map_transfer_error(e, self.in_addr))?;

        let data = completion.buffer[..].to_vec();
        debug!(bytes_read = data.len(), "bulk IN complete");
        Ok(data)
    }

    fn write(&self, data: &[u8], timeout: Duration) -> Result<(), Error> {
        let mut ep = self.ep_out.lock().unwrap();

        let mut buf = ep.allocate(data.len());
        buf.extend_from_slice(data);
        ep.submit(buf);

        let Some(completion) = ep.wait_next_complete(timeout) else {
            // Abandon the transfer; the drain on drop will collect it.
            ep.cancel_all();
            return Err(Error::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        };

        match completion.status {
            Ok(()) => {
                debug!(bytes_written = data.len(), "bulk OUT complete");
                Ok(())
            }
            Err(TransferError::Stall) => {
                if let Err(e) = ep.clear_halt().wait() {
                    warn!(error = %e, "clear halt after stall failed");
                }
                Err(Error::Stall {
                    endpoint: self.out_addr,
                })
            }
            Err(TransferError::Disconnected) => Err(Error::Disconnected),
            Err(other) => Err(Error::WriteFailed(other.to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        // nusb reports disconnection through transfer status; assume
        // attached until a transfer says otherwise.
        true
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

impl Drop for NusbTransport {
    fn drop(&mut self) {
        // Cancel in-flight transfers and drain their completions so the
        // buffers outlive the hardware's use of them.
        let mut ep_in = self.ep_in.lock().unwrap();
        ep_in.cancel_all();
        while ep_in.pending() > 0 {
            if ep_in.wait_next_complete(Duration::from_millis(100)).is_none() {
                warn!(endpoint = "IN", "transfer did not resolve at teardown");
                break;
            }
        }

        let mut ep_out = self.ep_out.lock().unwrap();
        ep_out.cancel_all();
        while ep_out.pending() > 0 {
            if ep_out.wait_next_complete(Duration::from_millis(100)).is_none() {
                warn!(endpoint = "OUT", "transfer did not resolve at teardown");
                break;
            }
        }
    }
}
