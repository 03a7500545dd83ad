use super::*;

/// A USB transfer handed to the host stack and not yet answered
#[derive(Debug, PartialEq, Eq)]
pub struct PendingTransfer {
    /// Session that submitted it and will receive the RET_SUBMIT
    pub session: SessionHandle,
    /// Echoed verbatim in the response
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    /// transfer_buffer_length of the request
    pub length: u32,
    /// Receive buffer, present only for IN transfers
    pub in_buffer: Option<Vec<u8>>,
}

/// Identifies one admission into the [TransferTable].
///
/// Tokens are never reused, so a completion carrying the token of a transfer
/// that was unlinked or torn down can not be taken for a newer transfer on
/// the same endpoint.
pub type TransferToken = u64;

#[derive(Debug)]
struct Slot {
    token: TransferToken,
    transfer: PendingTransfer,
}

/// Fixed-capacity map of `(device, endpoint)` to the transfer in flight there.
///
/// This is the single place where the one-transfer-per-endpoint rule is
/// enforced. A slot that is torn down simply becomes empty, so a completion
/// arriving late finds nothing (or a newer token) and is discarded.
#[derive(Debug)]
pub struct TransferTable {
    slots: Box<[Option<Slot>]>,
    next_token: TransferToken,
}

impl TransferTable {
    pub fn new(max_devices: u8) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(max_devices as usize * ENDPOINT_SLOTS, || None);
        Self {
            slots: slots.into_boxed_slice(),
            next_token: 1,
        }
    }

    fn slot(&self, address: DeviceAddress, endpoint: EndpointIndex) -> Option<usize> {
        let device = (address as usize).checked_sub(1)?;
        let index = device * ENDPOINT_SLOTS + endpoint.raw() as usize;
        if index < self.slots.len() {
            Some(index)
        } else {
            None
        }
    }

    /// Admit `transfer`, returning the token its completion must carry
    pub fn try_insert(
        &mut self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
        transfer: PendingTransfer,
    ) -> std::result::Result<TransferToken, SlotError> {
        let index = self.slot(address, endpoint).ok_or(SlotError::OutOfRange)?;
        let slot = &mut self.slots[index];
        if let Some(pending) = slot {
            debug!(
                "Transfer collision on device {} ep {}: seq {} still pending, rejecting seq {}",
                address, endpoint, pending.transfer.seqnum, transfer.seqnum
            );
            return Err(SlotError::Busy);
        }
        let token = self.next_token;
        self.next_token += 1;
        *slot = Some(Slot { token, transfer });
        Ok(token)
    }

    /// Remove and return the transfer pending on `(address, endpoint)`
    pub fn take(
        &mut self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
    ) -> Option<PendingTransfer> {
        let index = self.slot(address, endpoint)?;
        self.slots[index].take().map(|slot| slot.transfer)
    }

    /// Like [TransferTable::take], but only if the pending transfer was
    /// admitted under `token`
    pub fn take_completed(
        &mut self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
        token: TransferToken,
    ) -> Option<PendingTransfer> {
        let index = self.slot(address, endpoint)?;
        let slot = &mut self.slots[index];
        let pending = slot.as_ref()?;
        if pending.token != token {
            debug!(
                "Stale completion on device {} ep {}: token {} does not match seq {}",
                address, endpoint, token, pending.transfer.seqnum
            );
            return None;
        }
        slot.take().map(|slot| slot.transfer)
    }

    pub fn get(
        &self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
    ) -> Option<&PendingTransfer> {
        let index = self.slot(address, endpoint)?;
        self.slots[index].as_ref().map(|slot| &slot.transfer)
    }

    /// Locate the endpoint on which `session` has `seqnum` pending
    pub fn find_by_seqnum(
        &self,
        address: DeviceAddress,
        session: SessionHandle,
        seqnum: u32,
    ) -> Option<EndpointIndex> {
        let first = self.slot(address, EndpointIndex::from_raw(0)?)?;
        self.slots[first..first + ENDPOINT_SLOTS]
            .iter()
            .position(|slot| {
                slot.as_ref().map_or(false, |slot| {
                    slot.transfer.session == session && slot.transfer.seqnum == seqnum
                })
            })
            .and_then(|offset| EndpointIndex::from_raw(offset as u8))
    }

    /// Discard every transfer owned by `session`, returning how many there were
    pub fn drain_for_session(&mut self, session: SessionHandle) -> usize {
        let mut drained = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot, Some(s) if s.transfer.session == session) {
                if let Some(Slot { transfer, .. }) = slot.take() {
                    debug!(
                        "Discarding seq {} on device {} of closed session {}",
                        transfer.seqnum,
                        index / ENDPOINT_SLOTS + 1,
                        session
                    );
                    drained += 1;
                }
            }
        }
        drained
    }

    /// Discard every transfer pending on `address`
    pub fn drain_for_device(&mut self, address: DeviceAddress) -> usize {
        let first = match EndpointIndex::from_raw(0).and_then(|ep| self.slot(address, ep)) {
            Some(first) => first,
            None => return 0,
        };
        self.slots[first..first + ENDPOINT_SLOTS]
            .iter_mut()
            .filter_map(Option::take)
            .inspect(|slot| {
                debug!(
                    "Discarding seq {} of removed device {}",
                    slot.transfer.seqnum, address
                )
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
