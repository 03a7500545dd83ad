use super::*;

/// Recipient field of bmRequestType
const RECIPIENT_MASK: u8 = 0x1F;
/// Type field of bmRequestType: standard, class or vendor
const TYPE_MASK: u8 = 0x60;

/// Recipient of a control request
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Parse the SETUP packet of control transfers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    /// Parse a [SetupPacket] from raw setup packet
    pub fn parse(setup: &[u8; 8]) -> SetupPacket {
        SetupPacket {
            request_type: setup[0],
            request: setup[1],
            value: u16::from_le_bytes([setup[2], setup[3]]),
            index: u16::from_le_bytes([setup[4], setup[5]]),
            length: u16::from_le_bytes([setup[6], setup[7]]),
        }
    }

    /// Direction of the data stage
    pub fn direction(&self) -> Direction {
        if self.request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Direction of the control pipe carrying this request.
    ///
    /// Requests without a data stage always travel on the OUT pipe, whatever
    /// bmRequestType says.
    pub fn pipe_direction(&self) -> Direction {
        if self.length == 0 {
            Direction::Out
        } else {
            self.direction()
        }
    }

    pub fn recipient(&self) -> Option<Recipient> {
        num_traits::FromPrimitive::from_u8(self.request_type & RECIPIENT_MASK)
    }

    /// The request, if this is one of the standard requests of chapter 9
    pub fn standard_request(&self) -> Option<StandardRequest> {
        if self.request_type & TYPE_MASK != 0 {
            return None;
        }
        num_traits::FromPrimitive::from_u8(self.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_descriptor() {
        let setup = SetupPacket::parse(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00]);
        assert_eq!(setup.direction(), Direction::In);
        assert_eq!(setup.recipient(), Some(Recipient::Device));
        assert_eq!(setup.standard_request(), Some(StandardRequest::GetDescriptor));
        assert_eq!(setup.value, 0x0100);
        assert_eq!(setup.length, 0x40);
    }

    #[test]
    fn class_requests_are_not_standard() {
        // CDC SET_LINE_CODING to interface 0
        let setup = SetupPacket::parse(&[0x21, 0x20, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00]);
        assert_eq!(setup.direction(), Direction::Out);
        assert_eq!(setup.recipient(), Some(Recipient::Interface));
        assert_eq!(setup.standard_request(), None);
    }

    #[test]
    fn clear_halt_targets_endpoint() {
        let setup = SetupPacket::parse(&[0x02, 0x01, 0x00, 0x00, 0x81, 0x00, 0x00, 0x00]);
        assert_eq!(setup.recipient(), Some(Recipient::Endpoint));
        assert_eq!(setup.standard_request(), Some(StandardRequest::ClearFeature));
        assert_eq!(setup.value, FEATURE_ENDPOINT_HALT);
        assert_eq!(setup.index, 0x81);
        assert_eq!(setup.pipe_direction(), Direction::Out);
    }

    #[test]
    fn zero_length_in_request_uses_out_pipe() {
        let setup = SetupPacket::parse(&[0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(setup.direction(), Direction::In);
        assert_eq!(setup.pipe_direction(), Direction::Out);
    }
}
