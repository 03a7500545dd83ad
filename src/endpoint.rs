use super::*;

/// Number of endpoint numbers a USB device can use (0..=15)
pub const MAX_ENDPOINTS: u8 = 16;

/// Bit folded into an [EndpointIndex] for IN endpoints
pub const ENDPOINT_INDEX_IN_BIT: u8 = 0x10;

/// Endpoint slots per device: every endpoint number in both directions
pub const ENDPOINT_SLOTS: usize = 2 * MAX_ENDPOINTS as usize;

/// Direction bit of a wire endpoint address
const ENDPOINT_ADDRESS_IN_BIT: u8 = 0x80;

/// An endpoint number and direction folded into one small integer.
///
/// `index = number | (IN ? 0x10 : 0)`, so every device has
/// [ENDPOINT_SLOTS] distinct indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointIndex(u8);

impl EndpointIndex {
    /// Returns `None` when `number` is not a valid endpoint number
    pub fn new(number: u8, direction: Direction) -> Option<Self> {
        if number >= MAX_ENDPOINTS {
            return None;
        }
        Some(match direction {
            Direction::In => Self(number | ENDPOINT_INDEX_IN_BIT),
            Direction::Out => Self(number),
        })
    }

    /// Build from a wire endpoint address such as `0x81`
    pub fn from_address(address: u8) -> Option<Self> {
        let direction = if address & ENDPOINT_ADDRESS_IN_BIT != 0 {
            Direction::In
        } else {
            Direction::Out
        };
        Self::new(address & !ENDPOINT_ADDRESS_IN_BIT, direction)
    }

    /// Build from a raw index, e.g. one read back out of the transfer table
    pub fn from_raw(index: u8) -> Option<Self> {
        if (index as usize) < ENDPOINT_SLOTS {
            Some(Self(index))
        } else {
            None
        }
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn number(self) -> u8 {
        self.0 & !ENDPOINT_INDEX_IN_BIT
    }

    pub fn direction(self) -> Direction {
        if self.0 & ENDPOINT_INDEX_IN_BIT != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// The wire endpoint address, e.g. `0x81` for endpoint 1 IN
    pub fn address(self) -> u8 {
        match self.direction() {
            Direction::In => self.number() | ENDPOINT_ADDRESS_IN_BIT,
            Direction::Out => self.number(),
        }
    }

    pub fn is_ep0(self) -> bool {
        self.number() == 0
    }
}

impl std::fmt::Display for EndpointIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_direction_into_high_bit() {
        let ep = EndpointIndex::new(3, Direction::In).unwrap();
        assert_eq!(ep.raw(), 0x13);
        assert_eq!(ep.number(), 3);
        assert_eq!(ep.direction(), Direction::In);
        assert_eq!(ep.address(), 0x83);

        let ep = EndpointIndex::new(0, Direction::Out).unwrap();
        assert_eq!(ep.raw(), 0);
        assert!(ep.is_ep0());
        assert_eq!(ep.address(), 0x00);
    }

    #[test]
    fn wire_address_maps_back() {
        for address in [0x00, 0x80, 0x02, 0x81, 0x0F, 0x8F] {
            let ep = EndpointIndex::from_address(address).unwrap();
            assert_eq!(ep.address(), address);
        }
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        assert!(EndpointIndex::new(16, Direction::Out).is_none());
        assert!(EndpointIndex::from_address(0x90).is_none());
        assert!(EndpointIndex::from_raw(32).is_none());
        assert_eq!(EndpointIndex::from_raw(31).unwrap().address(), 0x8F);
    }
}
