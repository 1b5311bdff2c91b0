//! Serial RTU implementation of [`ModbusContext`].
//!
//! Frames are generated and validated through `rmodbus`; the serial port is
//! driven through `serialport`. One context owns one port exclusively.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rmodbus::client::ModbusRequest;
use rmodbus::ModbusProto;

use super::{ContextFactory, ErrorCode, ModbusContext, ModbusError, RegisterKind};
use crate::config::{BusConfig, DeviceConfig, Parity};
use crate::registers::RegisterIndex;
use crate::utils::strerror::os_error_message;

/// Response wait budget for a single read.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Extra settle time before re-reading an incomplete response. Modbus RTU
/// frames may arrive fragmented at low baud rates.
const INTER_FRAME_DELAY: Duration = Duration::from_millis(10);

pub struct RtuContext {
    port_name: String,
    baud: u32,
    parity: serialport::Parity,
    data_bits: serialport::DataBits,
    stop_bits: serialport::StopBits,
    inter_device_delay: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
    current_slave: Option<u8>,
    // Pacing state: wire silence owed to the device used last.
    pace_delay: Duration,
    last_use: Option<Instant>,
    last_slave: Option<u8>,
}

impl RtuContext {
    pub fn new(port_name: &str, bus: &BusConfig) -> Result<Self, ModbusError> {
        Ok(Self {
            port_name: port_name.to_string(),
            baud: bus.baud,
            parity: match bus.parity {
                Parity::Even => serialport::Parity::Even,
                Parity::Odd => serialport::Parity::Odd,
                Parity::None => serialport::Parity::None,
            },
            data_bits: match bus.data_bits {
                5 => serialport::DataBits::Five,
                6 => serialport::DataBits::Six,
                7 => serialport::DataBits::Seven,
                8 => serialport::DataBits::Eight,
                other => {
                    return Err(ModbusError::new(
                        ErrorCode::Unknown,
                        format!("unsupported data bits {other}"),
                    ))
                }
            },
            stop_bits: match bus.stop_bits {
                1 => serialport::StopBits::One,
                2 => serialport::StopBits::Two,
                other => {
                    return Err(ModbusError::new(
                        ErrorCode::Unknown,
                        format!("unsupported stop bits {other}"),
                    ))
                }
            },
            inter_device_delay: bus.inter_device_delay,
            port: None,
            current_slave: None,
            pace_delay: Duration::ZERO,
            last_use: None,
            last_slave: None,
        })
    }

    /// A [`ContextFactory`] producing serial RTU contexts.
    pub fn factory() -> ContextFactory {
        Arc::new(|port_name, bus| {
            RtuContext::new(port_name, bus).map(|context| Box::new(context) as Box<dyn ModbusContext>)
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, ModbusError> {
        self.port
            .as_mut()
            .ok_or_else(|| ModbusError::new(ErrorCode::PortGone, "context is not connected"))
    }

    // Honour the bus inter-device delay and the per-device retry pacing
    // before touching the wire again.
    fn pace(&mut self, slave: u8) {
        let Some(last_use) = self.last_use else {
            return;
        };
        let wanted = if self.last_slave != Some(slave) {
            self.inter_device_delay
        } else {
            self.pace_delay
        };
        let elapsed = last_use.elapsed();
        if elapsed < wanted {
            std::thread::sleep(wanted - elapsed);
        }
    }

    fn wire_error(error: &std::io::Error) -> ModbusError {
        let code = match error.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ErrorCode::Timeout,
            std::io::ErrorKind::NotFound | std::io::ErrorKind::BrokenPipe => ErrorCode::PortGone,
            _ => ErrorCode::Unknown,
        };
        ModbusError::new(code, os_error_message(error))
    }

    fn frame_error(error: rmodbus::ErrorKind) -> ModbusError {
        let code = match error {
            rmodbus::ErrorKind::IllegalFunction => ErrorCode::IllegalFunction,
            rmodbus::ErrorKind::IllegalDataAddress => ErrorCode::IllegalDataAddress,
            rmodbus::ErrorKind::IllegalDataValue => ErrorCode::IllegalDataValue,
            rmodbus::ErrorKind::SlaveDeviceFailure => ErrorCode::SlaveDeviceFailure,
            rmodbus::ErrorKind::Acknowledge => ErrorCode::Acknowledge,
            rmodbus::ErrorKind::SlaveDeviceBusy => ErrorCode::SlaveDeviceBusy,
            rmodbus::ErrorKind::NegativeAcknowledge => ErrorCode::NegativeAcknowledge,
            rmodbus::ErrorKind::MemoryParityError => ErrorCode::MemoryParity,
            rmodbus::ErrorKind::FrameCRCError => ErrorCode::BadCrc,
            rmodbus::ErrorKind::FrameBroken => ErrorCode::BadData,
            rmodbus::ErrorKind::CommunicationError => ErrorCode::BadData,
            _ => ErrorCode::Unknown,
        };
        ModbusError::new(code, error.to_string())
    }
}

impl ModbusContext for RtuContext {
    fn connect(&mut self) -> Result<(), ModbusError> {
        let port = serialport::new(&self.port_name, self.baud)
            .parity(self.parity)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .timeout(RESPONSE_TIMEOUT)
            .open()
            .map_err(|error| {
                ModbusError::new(ErrorCode::PortGone, format!("{}: {}", self.port_name, error))
            })?;
        self.port = Some(port);
        log::debug!("Opened serial port {}", self.port_name);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("Closed serial port {}", self.port_name);
        }
        self.current_slave = None;
        self.last_use = None;
        self.last_slave = None;
    }

    fn select_device(&mut self, device: &DeviceConfig) -> Result<(), ModbusError> {
        self.port_mut()?;
        self.current_slave = Some(device.slave_id);
        self.pace_delay = device.retry_delay;
        Ok(())
    }

    fn read_registers(
        &mut self,
        addr: RegisterIndex,
        kind: RegisterKind,
        count: usize,
        dest: &mut [u16],
    ) -> Result<usize, ModbusError> {
        let Some(slave) = self.current_slave else {
            return Err(ModbusError::new(ErrorCode::Unknown, "no device selected"));
        };
        debug_assert!(count <= dest.len());
        let addr = u16::try_from(addr)
            .map_err(|_| ModbusError::new(ErrorCode::IllegalDataAddress, format!("address {addr}")))?;
        let count_u16 = u16::try_from(count)
            .map_err(|_| ModbusError::new(ErrorCode::IllegalDataValue, format!("count {count}")))?;

        self.pace(slave);

        let mut request = ModbusRequest::new(slave, ModbusProto::Rtu);
        let mut frame = Vec::with_capacity(8);
        match kind {
            RegisterKind::Holding => request
                .generate_get_holdings(addr, count_u16, &mut frame)
                .map_err(Self::frame_error)?,
            RegisterKind::Input => request
                .generate_get_inputs(addr, count_u16, &mut frame)
                .map_err(Self::frame_error)?,
        }

        // Normal response: addr + func + byte count + payload + CRC.
        let expected_len = 5 + 2 * count;
        let io_result = (|| {
            let port = self
                .port
                .as_mut()
                .ok_or_else(|| ModbusError::new(ErrorCode::PortGone, "context is not connected"))?;
            port.write_all(&frame).map_err(|error| Self::wire_error(&error))?;
            port.flush().map_err(|error| Self::wire_error(&error))?;

            let mut response = vec![0u8; expected_len];
            let mut total = 0;
            loop {
                let read = match port.read(&mut response[total..]) {
                    Ok(read) => read,
                    Err(error) if total > 0 && error.kind() == std::io::ErrorKind::TimedOut => 0,
                    Err(error) => return Err(Self::wire_error(&error)),
                };
                total += read;
                if total >= 5 && response[1] & 0x80 != 0 {
                    // Exception responses are five bytes.
                    response.truncate(5);
                    break;
                }
                if total == expected_len {
                    break;
                }
                if read == 0 {
                    // The frame stopped short; hand whatever arrived to the
                    // parser.
                    response.truncate(total);
                    break;
                }
                std::thread::sleep(INTER_FRAME_DELAY);
            }
            Ok(response)
        })();
        self.note_use();
        let response = io_result?;

        if response.is_empty() {
            // The peer refused without an error.
            return Ok(0);
        }

        request.parse_ok(&response).map_err(Self::frame_error)?;

        let values: Vec<u16> = response[3..response.len() - 2]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        let actually_read = values.len().min(count);
        dest[..actually_read].copy_from_slice(&values[..actually_read]);
        Ok(actually_read)
    }
}

impl RtuContext {
    fn note_use(&mut self) {
        self.last_use = Some(Instant::now());
        self.last_slave = self.current_slave;
    }
}

impl Drop for RtuContext {
    fn drop(&mut self) {
        self.close();
    }
}
