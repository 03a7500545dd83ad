//! USB/IP protocol structs
//!
//! This module contains declarations of all structs used in the USB/IP protocol,
//! as well as functions to decode them from a byte stream and encode them into
//! byte vectors. Nothing here keeps state: callers own the receive buffer and
//! feed it in as often as they like, getting back either a complete message
//! together with the number of bytes it used, or the number of bytes still
//! needed.
//!
//! They are based on the [Linux kernel documentation](https://docs.kernel.org/usb/usbip_protocol.html).

use crate::{
    DeviceRecord, Direction, ProtocolError, UsbInterface, DEVICE_RECORD_SIZE,
    INTERFACE_RECORD_SIZE,
};

/// USB/IP protocol version
///
/// This is currently the only supported version of USB/IP
/// for this library.
pub const USBIP_VERSION: u16 = 0x0111;

/// Command code: Retrieve the list of exported USB devices
pub const OP_REQ_DEVLIST: u16 = 0x8005;
/// Command code: import a remote USB device
pub const OP_REQ_IMPORT: u16 = 0x8003;
/// Reply code: The list of exported USB devices
pub const OP_REP_DEVLIST: u16 = 0x0005;
/// Reply code: Reply to import
pub const OP_REP_IMPORT: u16 = 0x0003;

/// Command code: Submit an URB
pub const USBIP_CMD_SUBMIT: u16 = 0x0001;
/// Command code: Unlink an URB
pub const USBIP_CMD_UNLINK: u16 = 0x0002;
/// Reply code: Reply for submitting an URB
pub const USBIP_RET_SUBMIT: u16 = 0x0003;
/// Reply code: Reply for URB unlink
pub const USBIP_RET_UNLINK: u16 = 0x0004;

/// Direction field of the URB header
pub const USBIP_DIR_OUT: u32 = 0;
pub const USBIP_DIR_IN: u32 = 1;

/// Size of the header shared by DEVLIST and IMPORT messages
pub const OP_HEADER_SIZE: usize = 8;
/// Size of every URB PDU before its payload
pub const URB_PDU_SIZE: usize = 48;
/// Size of the header common to all URB PDUs
pub const URB_BASIC_HEADER_SIZE: usize = 20;
pub const ISO_PACKET_DESCRIPTOR_SIZE: usize = 16;
/// Length of the NUL padded busid field
pub const BUSID_SIZE: usize = 32;

/// Largest transfer buffer accepted from a client
pub const MAX_TRANSFER_LENGTH: u32 = 4 * 1024 * 1024;

const IMPORT_REQUEST_SIZE: usize = OP_HEADER_SIZE + BUSID_SIZE;

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Outcome of decoding from a possibly incomplete buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A whole message, occupying the first `consumed` bytes
    Complete { value: T, consumed: usize },
    /// The buffer must hold at least this many bytes in total
    NeedMoreBytes(usize),
}

impl<T> Decoded<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        match self {
            Decoded::Complete { value, consumed } => Decoded::Complete {
                value: f(value),
                consumed,
            },
            Decoded::NeedMoreBytes(n) => Decoded::NeedMoreBytes(n),
        }
    }
}

/// Header of DEVLIST and IMPORT messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub version: u16,
    pub command: u16,
    pub status: u32,
}

impl OpHeader {
    pub fn new(command: u16, status: u32) -> Self {
        Self {
            version: USBIP_VERSION,
            command,
            status,
        }
    }

    pub fn to_bytes(&self) -> [u8; OP_HEADER_SIZE] {
        let mut result = [0u8; OP_HEADER_SIZE];
        result[0..2].copy_from_slice(&self.version.to_be_bytes());
        result[2..4].copy_from_slice(&self.command.to_be_bytes());
        result[4..8].copy_from_slice(&self.status.to_be_bytes());
        result
    }
}

/// Read the 8 byte header of a DEVLIST or IMPORT message
pub fn decode_op_header(bytes: &[u8]) -> Result<OpHeader, ProtocolError> {
    if bytes.len() < OP_HEADER_SIZE {
        return Err(ProtocolError::MalformedHeader);
    }
    Ok(OpHeader {
        version: be_u16(bytes, 0),
        command: be_u16(bytes, 2),
        status: be_u32(bytes, 4),
    })
}

/// Common header for all context sensitive packets
///
/// All commands/responses which rely on a device being attached
/// to a client use this header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIpHeaderBasic {
    pub command: u32,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
}

impl UsbIpHeaderBasic {
    /// Converts a byte array into a [UsbIpHeaderBasic].
    pub fn from_bytes(bytes: &[u8; URB_BASIC_HEADER_SIZE]) -> Self {
        UsbIpHeaderBasic {
            command: be_u32(bytes, 0),
            seqnum: be_u32(bytes, 4),
            devid: be_u32(bytes, 8),
            direction: be_u32(bytes, 12),
            ep: be_u32(bytes, 16),
        }
    }

    /// Converts the [UsbIpHeaderBasic] into a byte array.
    pub fn to_bytes(&self) -> [u8; URB_BASIC_HEADER_SIZE] {
        let mut result = [0u8; URB_BASIC_HEADER_SIZE];
        result[0..4].copy_from_slice(&self.command.to_be_bytes());
        result[4..8].copy_from_slice(&self.seqnum.to_be_bytes());
        result[8..12].copy_from_slice(&self.devid.to_be_bytes());
        result[12..16].copy_from_slice(&self.direction.to_be_bytes());
        result[16..20].copy_from_slice(&self.ep.to_be_bytes());
        result
    }

    /// Only meaningful once the header went through [UsbIpCommand::decode]
    pub fn direction(&self) -> Direction {
        if self.direction == USBIP_DIR_IN {
            Direction::In
        } else {
            Direction::Out
        }
    }

    fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header: &[u8; URB_BASIC_HEADER_SIZE] = bytes
            .get(..URB_BASIC_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProtocolError::MalformedHeader)?;
        let header = Self::from_bytes(header);
        if header.direction != USBIP_DIR_OUT && header.direction != USBIP_DIR_IN {
            return Err(ProtocolError::InvalidDirection(header.direction));
        }
        Ok(header)
    }
}

/// Fixed part of a CMD_SUBMIT, without the payload that may follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSubmitHeader {
    pub header: UsbIpHeaderBasic,
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    pub setup: [u8; 8],
}

impl CmdSubmitHeader {
    // The kernel docs specifies that this should be set to 0xFFFFFFFF for all
    // non-ISO packets, however the actual implementation resorts to 0x00000000
    // https://stackoverflow.com/questions/76899798/usb-ip-what-is-the-size-of-the-iso-packet-descriptor
    pub fn is_iso(&self) -> bool {
        self.number_of_packets != 0 && self.number_of_packets != 0xFFFFFFFF
    }

    /// Bytes of OUT data following the header
    pub fn data_length(&self) -> usize {
        match self.header.direction() {
            Direction::Out => self.transfer_buffer_length as usize,
            Direction::In => 0,
        }
    }

    pub fn iso_length(&self) -> usize {
        if self.is_iso() {
            self.number_of_packets as usize * ISO_PACKET_DESCRIPTOR_SIZE
        } else {
            0
        }
    }

    /// Size of the whole command on the wire
    pub fn total_length(&self) -> usize {
        URB_PDU_SIZE + self.data_length() + self.iso_length()
    }
}

/// Decode an OP_REQ_DEVLIST
pub fn decode_devlist_request(bytes: &[u8]) -> Result<Decoded<UsbIpCommand>, ProtocolError> {
    if bytes.len() < OP_HEADER_SIZE {
        return Ok(Decoded::NeedMoreBytes(OP_HEADER_SIZE));
    }
    let header = decode_op_header(bytes)?;
    Ok(Decoded::Complete {
        value: UsbIpCommand::OpReqDevlist {
            status: header.status,
        },
        consumed: OP_HEADER_SIZE,
    })
}

/// Decode an OP_REQ_IMPORT
pub fn decode_import_request(bytes: &[u8]) -> Result<Decoded<UsbIpCommand>, ProtocolError> {
    if bytes.len() < IMPORT_REQUEST_SIZE {
        return Ok(Decoded::NeedMoreBytes(IMPORT_REQUEST_SIZE));
    }
    let header = decode_op_header(bytes)?;
    let mut busid = [0; BUSID_SIZE];
    busid.copy_from_slice(&bytes[OP_HEADER_SIZE..IMPORT_REQUEST_SIZE]);
    Ok(Decoded::Complete {
        value: UsbIpCommand::OpReqImport {
            status: header.status,
            busid,
        },
        consumed: IMPORT_REQUEST_SIZE,
    })
}

/// Decode the 48 byte fixed part of a CMD_SUBMIT.
///
/// The header is validated enough that [CmdSubmitHeader::total_length] can be
/// trusted to frame the rest of the command.
pub fn decode_cmd_submit_header(
    bytes: &[u8],
) -> Result<Decoded<CmdSubmitHeader>, ProtocolError> {
    if bytes.len() < URB_PDU_SIZE {
        return Ok(Decoded::NeedMoreBytes(URB_PDU_SIZE));
    }
    let header = UsbIpHeaderBasic::parse(bytes)?;
    let mut setup = [0; 8];
    setup.copy_from_slice(&bytes[40..48]);
    let submit = CmdSubmitHeader {
        header,
        transfer_flags: be_u32(bytes, 20),
        transfer_buffer_length: be_u32(bytes, 24),
        start_frame: be_u32(bytes, 28),
        number_of_packets: be_u32(bytes, 32),
        interval: be_u32(bytes, 36),
        setup,
    };
    if submit.header.direction() == Direction::Out
        && submit.transfer_buffer_length > MAX_TRANSFER_LENGTH
    {
        return Err(ProtocolError::TransferTooLarge(submit.transfer_buffer_length));
    }
    if submit.iso_length() > MAX_TRANSFER_LENGTH as usize {
        return Err(ProtocolError::TransferTooLarge(submit.number_of_packets));
    }
    Ok(Decoded::Complete {
        value: submit,
        consumed: URB_PDU_SIZE,
    })
}

/// Decode a CMD_UNLINK, which is always exactly 48 bytes
pub fn decode_cmd_unlink_header(bytes: &[u8]) -> Result<Decoded<UsbIpCommand>, ProtocolError> {
    if bytes.len() < URB_PDU_SIZE {
        return Ok(Decoded::NeedMoreBytes(URB_PDU_SIZE));
    }
    let header = UsbIpHeaderBasic::parse(bytes)?;
    Ok(Decoded::Complete {
        value: UsbIpCommand::UsbIpCmdUnlink {
            header,
            unlink_seqnum: be_u32(bytes, 20),
        },
        consumed: URB_PDU_SIZE,
    })
}

/// Client side commands from the Virtual Host Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbIpCommand {
    OpReqDevlist {
        status: u32,
    },
    OpReqImport {
        status: u32,
        busid: [u8; BUSID_SIZE],
    },
    UsbIpCmdSubmit {
        header: UsbIpHeaderBasic,
        transfer_flags: u32,
        transfer_buffer_length: u32,
        start_frame: u32,
        number_of_packets: u32,
        interval: u32,
        setup: [u8; 8],
        data: Vec<u8>,
        iso_packet_descriptor: Vec<u8>,
    },
    UsbIpCmdUnlink {
        header: UsbIpHeaderBasic,
        unlink_seqnum: u32,
    },
}

impl UsbIpCommand {
    /// Decode the first command in `bytes`.
    ///
    /// The leading u16 tells the two message families apart: DEVLIST and
    /// IMPORT start with [USBIP_VERSION], while URB commands start with the
    /// zero high half of their u32 command code.
    pub fn decode(bytes: &[u8]) -> Result<Decoded<UsbIpCommand>, ProtocolError> {
        if bytes.len() < 4 {
            return Ok(Decoded::NeedMoreBytes(OP_HEADER_SIZE));
        }
        let version = be_u16(bytes, 0);
        let command = be_u16(bytes, 2);

        match (version, command) {
            (USBIP_VERSION, OP_REQ_DEVLIST) => decode_devlist_request(bytes),
            (USBIP_VERSION, OP_REQ_IMPORT) => decode_import_request(bytes),
            (0, USBIP_CMD_SUBMIT) => {
                let submit = match decode_cmd_submit_header(bytes)? {
                    Decoded::Complete { value, .. } => value,
                    Decoded::NeedMoreBytes(n) => return Ok(Decoded::NeedMoreBytes(n)),
                };
                let total = submit.total_length();
                if bytes.len() < total {
                    return Ok(Decoded::NeedMoreBytes(total));
                }
                let data_end = URB_PDU_SIZE + submit.data_length();
                Ok(Decoded::Complete {
                    value: UsbIpCommand::UsbIpCmdSubmit {
                        header: submit.header,
                        transfer_flags: submit.transfer_flags,
                        transfer_buffer_length: submit.transfer_buffer_length,
                        start_frame: submit.start_frame,
                        number_of_packets: submit.number_of_packets,
                        interval: submit.interval,
                        setup: submit.setup,
                        data: bytes[URB_PDU_SIZE..data_end].to_vec(),
                        iso_packet_descriptor: bytes[data_end..total].to_vec(),
                    },
                    consumed: total,
                })
            }
            (0, USBIP_CMD_UNLINK) => decode_cmd_unlink_header(bytes),
            (0, _) => Err(ProtocolError::UnknownCommand(command.into())),
            (USBIP_VERSION, _) => Err(ProtocolError::UnknownCommand(command.into())),
            _ => Err(ProtocolError::UnknownVersion(version)),
        }
    }

    /// Converts the [UsbIpCommand] into a byte vector
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            UsbIpCommand::OpReqDevlist { status } => {
                OpHeader::new(OP_REQ_DEVLIST, status).to_bytes().to_vec()
            }
            UsbIpCommand::OpReqImport { status, busid } => {
                let mut result = Vec::with_capacity(IMPORT_REQUEST_SIZE);
                result.extend_from_slice(&OpHeader::new(OP_REQ_IMPORT, status).to_bytes());
                result.extend_from_slice(&busid);
                result
            }
            UsbIpCommand::UsbIpCmdSubmit {
                ref header,
                transfer_flags,
                transfer_buffer_length,
                start_frame,
                number_of_packets,
                interval,
                setup,
                ref data,
                ref iso_packet_descriptor,
            } => {
                let mut result =
                    Vec::with_capacity(URB_PDU_SIZE + data.len() + iso_packet_descriptor.len());
                result.extend_from_slice(&header.to_bytes());
                result.extend_from_slice(&transfer_flags.to_be_bytes());
                result.extend_from_slice(&transfer_buffer_length.to_be_bytes());
                result.extend_from_slice(&start_frame.to_be_bytes());
                result.extend_from_slice(&number_of_packets.to_be_bytes());
                result.extend_from_slice(&interval.to_be_bytes());
                result.extend_from_slice(&setup);
                result.extend_from_slice(data);
                result.extend_from_slice(iso_packet_descriptor);
                result
            }
            UsbIpCommand::UsbIpCmdUnlink {
                ref header,
                unlink_seqnum,
            } => {
                let mut result = Vec::with_capacity(URB_PDU_SIZE);
                result.extend_from_slice(&header.to_bytes());
                result.extend_from_slice(&unlink_seqnum.to_be_bytes());
                result.extend_from_slice(&[0; 24]);
                result
            }
        }
    }
}

/// Server side responses from the USB Host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbIpResponse {
    OpRepDevlist {
        status: u32,
        devices: Vec<DeviceRecord>,
    },
    OpRepImport {
        status: u32,
        device: Option<DeviceRecord>,
    },
    UsbIpRetSubmit {
        header: UsbIpHeaderBasic,
        status: i32,
        actual_length: u32,
        start_frame: u32,
        number_of_packets: u32,
        error_count: u32,
        transfer_buffer: Vec<u8>,
        iso_packet_descriptor: Vec<u8>,
    },
    UsbIpRetUnlink {
        header: UsbIpHeaderBasic,
        status: i32,
    },
}

impl UsbIpResponse {
    /// Converts the [UsbIpResponse] into a byte vector
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::OpRepDevlist {
                status,
                ref devices,
            } => {
                let mut result = Vec::with_capacity(
                    OP_HEADER_SIZE
                        + 4
                        + devices
                            .iter()
                            .map(|d| {
                                DEVICE_RECORD_SIZE + d.interfaces.len() * INTERFACE_RECORD_SIZE
                            })
                            .sum::<usize>(),
                );
                result.extend_from_slice(&OpHeader::new(OP_REP_DEVLIST, status).to_bytes());
                result.extend_from_slice(&(devices.len() as u32).to_be_bytes());
                for dev in devices {
                    result.extend_from_slice(&dev.to_bytes_with_interfaces());
                }
                result
            }
            Self::OpRepImport { status, ref device } => {
                let mut result = Vec::with_capacity(OP_HEADER_SIZE + DEVICE_RECORD_SIZE);
                result.extend_from_slice(&OpHeader::new(OP_REP_IMPORT, status).to_bytes());
                if let Some(device) = device {
                    result.extend_from_slice(&device.to_bytes());
                }
                result
            }
            Self::UsbIpRetSubmit {
                ref header,
                status,
                actual_length,
                start_frame,
                number_of_packets,
                error_count,
                ref transfer_buffer,
                ref iso_packet_descriptor,
            } => {
                let mut result = Vec::with_capacity(
                    URB_PDU_SIZE + transfer_buffer.len() + iso_packet_descriptor.len(),
                );

                debug_assert!(header.command == u32::from(USBIP_RET_SUBMIT));

                result.extend_from_slice(&header.to_bytes());
                result.extend_from_slice(&status.to_be_bytes());
                result.extend_from_slice(&actual_length.to_be_bytes());
                result.extend_from_slice(&start_frame.to_be_bytes());
                result.extend_from_slice(&number_of_packets.to_be_bytes());
                result.extend_from_slice(&error_count.to_be_bytes());
                result.extend_from_slice(&[0; 8]);
                result.extend_from_slice(transfer_buffer);
                result.extend_from_slice(iso_packet_descriptor);
                result
            }
            Self::UsbIpRetUnlink { ref header, status } => {
                let mut result = Vec::with_capacity(URB_PDU_SIZE);

                debug_assert!(header.command == u32::from(USBIP_RET_UNLINK));

                result.extend_from_slice(&header.to_bytes());
                result.extend_from_slice(&status.to_be_bytes());
                result.extend_from_slice(&[0; 24]);
                result
            }
        }
    }

    /// Decode the first response in `bytes`, as a client would.
    ///
    /// A RET_SUBMIT carries `actual_length` bytes of payload when its header
    /// direction is IN. An OP_REP_IMPORT carries a device record only when its
    /// status is [ST_OK](crate::ST_OK).
    pub fn decode(bytes: &[u8]) -> Result<Decoded<UsbIpResponse>, ProtocolError> {
        if bytes.len() < 4 {
            return Ok(Decoded::NeedMoreBytes(OP_HEADER_SIZE));
        }
        let version = be_u16(bytes, 0);
        let command = be_u16(bytes, 2);

        match (version, command) {
            (USBIP_VERSION, OP_REP_DEVLIST) => Self::decode_devlist(bytes),
            (USBIP_VERSION, OP_REP_IMPORT) => {
                if bytes.len() < OP_HEADER_SIZE {
                    return Ok(Decoded::NeedMoreBytes(OP_HEADER_SIZE));
                }
                let header = decode_op_header(bytes)?;
                if header.status != crate::ST_OK {
                    return Ok(Decoded::Complete {
                        value: Self::OpRepImport {
                            status: header.status,
                            device: None,
                        },
                        consumed: OP_HEADER_SIZE,
                    });
                }
                let total = OP_HEADER_SIZE + DEVICE_RECORD_SIZE;
                let record: &[u8; DEVICE_RECORD_SIZE] = match bytes
                    .get(OP_HEADER_SIZE..total)
                    .and_then(|b| b.try_into().ok())
                {
                    Some(record) => record,
                    None => return Ok(Decoded::NeedMoreBytes(total)),
                };
                let (device, _) = DeviceRecord::from_bytes(record);
                Ok(Decoded::Complete {
                    value: Self::OpRepImport {
                        status: header.status,
                        device: Some(device),
                    },
                    consumed: total,
                })
            }
            (0, USBIP_RET_SUBMIT) => {
                if bytes.len() < URB_PDU_SIZE {
                    return Ok(Decoded::NeedMoreBytes(URB_PDU_SIZE));
                }
                let header = UsbIpHeaderBasic::parse(bytes)?;
                let actual_length = be_u32(bytes, 24);
                let number_of_packets = be_u32(bytes, 32);
                let payload = match header.direction() {
                    Direction::In => actual_length as usize,
                    Direction::Out => 0,
                };
                let iso = if number_of_packets != 0 && number_of_packets != 0xFFFFFFFF {
                    number_of_packets as usize * ISO_PACKET_DESCRIPTOR_SIZE
                } else {
                    0
                };
                let total = URB_PDU_SIZE + payload + iso;
                if bytes.len() < total {
                    return Ok(Decoded::NeedMoreBytes(total));
                }
                Ok(Decoded::Complete {
                    value: Self::UsbIpRetSubmit {
                        header,
                        status: be_u32(bytes, 20) as i32,
                        actual_length,
                        start_frame: be_u32(bytes, 28),
                        number_of_packets,
                        error_count: be_u32(bytes, 36),
                        transfer_buffer: bytes[URB_PDU_SIZE..URB_PDU_SIZE + payload].to_vec(),
                        iso_packet_descriptor: bytes[URB_PDU_SIZE + payload..total].to_vec(),
                    },
                    consumed: total,
                })
            }
            (0, USBIP_RET_UNLINK) => {
                if bytes.len() < URB_PDU_SIZE {
                    return Ok(Decoded::NeedMoreBytes(URB_PDU_SIZE));
                }
                Ok(Decoded::Complete {
                    value: Self::UsbIpRetUnlink {
                        header: UsbIpHeaderBasic::parse(bytes)?,
                        status: be_u32(bytes, 20) as i32,
                    },
                    consumed: URB_PDU_SIZE,
                })
            }
            (0, _) | (USBIP_VERSION, _) => Err(ProtocolError::UnknownCommand(command.into())),
            _ => Err(ProtocolError::UnknownVersion(version)),
        }
    }

    fn decode_devlist(bytes: &[u8]) -> Result<Decoded<UsbIpResponse>, ProtocolError> {
        let mut offset = OP_HEADER_SIZE + 4;
        if bytes.len() < offset {
            return Ok(Decoded::NeedMoreBytes(offset));
        }
        let header = decode_op_header(bytes)?;
        let device_count = be_u32(bytes, OP_HEADER_SIZE);

        let mut devices = Vec::new();
        for _ in 0..device_count {
            let record_end = offset + DEVICE_RECORD_SIZE;
            let record: &[u8; DEVICE_RECORD_SIZE] =
                match bytes.get(offset..record_end).and_then(|b| b.try_into().ok()) {
                    Some(record) => record,
                    None => return Ok(Decoded::NeedMoreBytes(record_end)),
                };
            let (mut device, num_interfaces) = DeviceRecord::from_bytes(record);
            let interfaces_end = record_end + num_interfaces as usize * INTERFACE_RECORD_SIZE;
            if bytes.len() < interfaces_end {
                return Ok(Decoded::NeedMoreBytes(interfaces_end));
            }
            device.interfaces = bytes[record_end..interfaces_end]
                .chunks_exact(INTERFACE_RECORD_SIZE)
                .map(|entry| UsbInterface {
                    interface_class: entry[0],
                    interface_subclass: entry[1],
                    interface_protocol: entry[2],
                })
                .collect();
            devices.push(device);
            offset = interfaces_end;
        }

        Ok(Decoded::Complete {
            value: Self::OpRepDevlist {
                status: header.status,
                devices,
            },
            consumed: offset,
        })
    }

    /// Constructs a OP_REP_DEVLIST response
    pub fn op_rep_devlist(devices: &[DeviceRecord]) -> Self {
        Self::OpRepDevlist {
            status: crate::ST_OK,
            devices: devices.to_vec(),
        }
    }

    /// Constructs a successful OP_REP_IMPORT response
    pub fn op_rep_import_success(device: &DeviceRecord) -> Self {
        Self::OpRepImport {
            status: crate::ST_OK,
            device: Some(device.clone()),
        }
    }

    /// Constructs a failed OP_REP_IMPORT response
    pub fn op_rep_import_fail(status: u32) -> Self {
        Self::OpRepImport {
            status,
            device: None,
        }
    }

    /// Constructs a USBIP_RET_SUBMIT response answering `request`
    pub fn usbip_ret_submit(
        request: &UsbIpHeaderBasic,
        status: i32,
        actual_length: u32,
        transfer_buffer: Vec<u8>,
    ) -> Self {
        Self::UsbIpRetSubmit {
            header: UsbIpHeaderBasic {
                command: USBIP_RET_SUBMIT.into(),
                ..request.clone()
            },
            status,
            actual_length,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
            transfer_buffer,
            iso_packet_descriptor: vec![],
        }
    }

    /// Constructs a USBIP_RET_UNLINK response answering `request`
    pub fn usbip_ret_unlink(request: &UsbIpHeaderBasic, status: i32) -> Self {
        Self::UsbIpRetUnlink {
            header: UsbIpHeaderBasic {
                command: USBIP_RET_UNLINK.into(),
                ..request.clone()
            },
            status,
        }
    }
}

/// Encode an OP_REP_DEVLIST listing `devices` with their interfaces
pub fn encode_devlist_response(devices: &[DeviceRecord]) -> Vec<u8> {
    UsbIpResponse::op_rep_devlist(devices).to_bytes()
}

/// Encode an OP_REP_IMPORT: the device record on success, the `ST_*` status otherwise
pub fn encode_import_response(result: Result<&DeviceRecord, u32>) -> Vec<u8> {
    match result {
        Ok(device) => UsbIpResponse::op_rep_import_success(device).to_bytes(),
        Err(status) => UsbIpResponse::op_rep_import_fail(status).to_bytes(),
    }
}

/// Encode a USBIP_RET_SUBMIT answering `request`
pub fn encode_submit_response(
    request: &UsbIpHeaderBasic,
    status: i32,
    actual_length: u32,
    transfer_buffer: &[u8],
) -> Vec<u8> {
    UsbIpResponse::usbip_ret_submit(request, status, actual_length, transfer_buffer.to_vec())
        .to_bytes()
}

/// Encode a USBIP_RET_UNLINK answering `request`
pub fn encode_unlink_response(request: &UsbIpHeaderBasic, status: i32) -> Vec<u8> {
    UsbIpResponse::usbip_ret_unlink(request, status).to_bytes()
}
