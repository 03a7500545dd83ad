//! Per-command handling, run with the server state locked
use super::ServerState;
use crate::host::{HostController, HostResult};
use crate::usbip_protocol::{
    encode_devlist_response, encode_import_response, encode_submit_response,
    encode_unlink_response, CmdSubmitHeader, UsbIpCommand, UsbIpHeaderBasic, MAX_TRANSFER_LENGTH,
    USBIP_DIR_IN, USBIP_DIR_OUT, USBIP_RET_SUBMIT,
};
use crate::*;

pub(super) struct Engine<'a> {
    state: &'a mut ServerState,
    host: &'a dyn HostController,
    bus_number: u32,
}

impl<'a> Engine<'a> {
    pub(super) fn new(
        state: &'a mut ServerState,
        host: &'a dyn HostController,
        bus_number: u32,
    ) -> Self {
        Self {
            state,
            host,
            bus_number,
        }
    }

    fn reply(&self, handle: SessionHandle, response: Vec<u8>) {
        if let Some(session) = self.state.clients.get(handle) {
            session.send(response);
        }
    }

    /// The device `handle` has imported, if it is attached
    fn attached_device(&self, handle: SessionHandle) -> Option<DeviceAddress> {
        let session = self.state.clients.get(handle)?;
        match session.state {
            SessionState::Attached => session.attached_device,
            _ => None,
        }
    }

    pub(super) fn dispatch(&mut self, handle: SessionHandle, command: UsbIpCommand) {
        trace!("[{}] Got USB/IP command {:?}", handle, command);
        match command {
            UsbIpCommand::OpReqDevlist { .. } => self.devlist(handle),
            UsbIpCommand::OpReqImport { busid, .. } => self.import(handle, &busid),
            UsbIpCommand::UsbIpCmdSubmit {
                header,
                transfer_flags,
                transfer_buffer_length,
                start_frame,
                number_of_packets,
                interval,
                setup,
                data,
                ..
            } => self.submit(
                handle,
                CmdSubmitHeader {
                    header,
                    transfer_flags,
                    transfer_buffer_length,
                    start_frame,
                    number_of_packets,
                    interval,
                    setup,
                },
                data,
            ),
            UsbIpCommand::UsbIpCmdUnlink {
                header,
                unlink_seqnum,
            } => self.unlink(handle, &header, unlink_seqnum),
        }
    }

    fn devlist(&mut self, handle: SessionHandle) {
        info!("[{}] Got OP_REQ_DEVLIST", handle);
        let records: Vec<_> = self
            .state
            .devices
            .list()
            .map(|device| device.record(self.bus_number))
            .collect();
        self.reply(handle, encode_devlist_response(&records));
        debug!("[{}] Sent OP_REP_DEVLIST with {} devices", handle, records.len());
    }

    fn import(&mut self, handle: SessionHandle, busid: &[u8]) {
        let busid_str = String::from_utf8_lossy(busid);
        info!(
            "[{}] Got OP_REQ_IMPORT for {}",
            handle,
            busid_str.trim_end_matches('\0')
        );
        let response = self.try_import(handle, busid);
        if let Err(status) = response {
            warn!("[{}] Import refused with status {}", handle, status);
        }
        let response = encode_import_response(response.as_ref().map_err(|status| *status));
        self.reply(handle, response);
    }

    fn try_import(
        &mut self,
        handle: SessionHandle,
        busid: &[u8],
    ) -> std::result::Result<DeviceRecord, u32> {
        let session = self.state.clients.get(handle).ok_or(ST_ERROR)?;
        if session.state != SessionState::Unattached {
            return Err(ST_NA);
        }
        let address = parse_bus_id(busid, self.bus_number).ok_or(ST_NODEV)?;
        let device = self.state.devices.find_mut(address).ok_or(ST_NODEV)?;
        if device.attached {
            return Err(ST_CONNREFUSED);
        }
        device.attached = true;
        let record = device.record(self.bus_number);

        let session = self.state.clients.get_mut(handle).ok_or(ST_ERROR)?;
        session.state = SessionState::Attached;
        session.attached_device = Some(address);
        info!("[{}] Attached to device {}", handle, record.bus_id);
        Ok(record)
    }

    fn submit(&mut self, handle: SessionHandle, request: CmdSubmitHeader, data: Vec<u8>) {
        let header = &request.header;
        trace!(
            "[{}] CMD_SUBMIT seq {} ep {} dir {} len {}",
            handle,
            header.seqnum,
            header.ep,
            header.direction,
            request.transfer_buffer_length
        );
        if let Err(status) = self.try_submit(handle, &request, data) {
            debug!(
                "[{}] CMD_SUBMIT seq {} rejected with {}",
                handle, header.seqnum, status
            );
            self.reply(handle, encode_submit_response(header, status, 0, &[]));
        }
    }

    /// Admit a transfer and hand it to the host stack.
    ///
    /// On error nothing stays in the transfer table and the caller answers
    /// with the returned status right away.
    fn try_submit(
        &mut self,
        handle: SessionHandle,
        request: &CmdSubmitHeader,
        data: Vec<u8>,
    ) -> std::result::Result<(), i32> {
        let header = &request.header;
        let address = self.attached_device(handle).ok_or(-errno::ENODEV)?;
        if header.devid & 0xFFFF != address as u32 {
            return Err(-errno::EPERM);
        }
        if header.ep >= MAX_ENDPOINTS as u32 {
            return Err(-errno::EINVAL);
        }
        if request.is_iso() {
            return Err(-errno::EOPNOTSUPP);
        }

        let number = header.ep as u8;
        let setup = SetupPacket::parse(&request.setup);
        // the default pipe is keyed by where its data stage goes
        let pipe = if number == 0 {
            setup.pipe_direction()
        } else {
            header.direction()
        };
        let endpoint = EndpointIndex::new(number, pipe).ok_or(-errno::EINVAL)?;

        let length = request.transfer_buffer_length;
        let in_buffer = match header.direction() {
            Direction::In if length > 0 => {
                if length > MAX_TRANSFER_LENGTH {
                    return Err(-errno::ENOMEM);
                }
                let mut buffer = Vec::new();
                buffer
                    .try_reserve_exact(length as usize)
                    .map_err(|_| -errno::ENOMEM)?;
                Some(buffer)
            }
            _ => None,
        };

        let pending = PendingTransfer {
            session: handle,
            seqnum: header.seqnum,
            devid: header.devid,
            direction: header.direction(),
            length,
            in_buffer,
        };
        let token = self
            .state
            .transfers
            .try_insert(address, endpoint, pending)
            .map_err(|err| match err {
                SlotError::Busy => -errno::EBUSY,
                SlotError::OutOfRange => -errno::EINVAL,
            })?;

        let submitted = if endpoint.is_ep0() {
            self.host
                .submit_control(address, token, request.setup, &data, length)
        } else {
            self.host
                .submit_bulk_or_interrupt(address, endpoint, token, &data, length)
        };
        if !submitted {
            warn!(
                "[{}] Host refused seq {} on device {} ep {}",
                handle, header.seqnum, address, endpoint
            );
            self.state.transfers.take(address, endpoint);
            return Err(-errno::EIO);
        }
        Ok(())
    }

    fn unlink(&mut self, handle: SessionHandle, header: &UsbIpHeaderBasic, unlink_seqnum: u32) {
        debug!(
            "[{}] CMD_UNLINK seq {} for seq {}",
            handle, header.seqnum, unlink_seqnum
        );
        let found = self.attached_device(handle).and_then(|address| {
            let endpoint = self
                .state
                .transfers
                .find_by_seqnum(address, handle, unlink_seqnum)?;
            Some((address, endpoint))
        });
        let status = match found {
            Some((address, endpoint)) => {
                self.state.transfers.take(address, endpoint);
                self.host.request_halt_clear(address, endpoint);
                info!(
                    "[{}] Unlinked seq {} on device {} ep {}",
                    handle, unlink_seqnum, address, endpoint
                );
                0
            }
            None => -errno::ENOENT,
        };
        self.reply(handle, encode_unlink_response(header, status));
    }

    /// Answer the transfer submitted under `token`, if it is still pending.
    ///
    /// Completions of unlinked or torn down transfers find an empty slot or a
    /// newer token and are dropped.
    pub(super) fn complete_transfer(
        &mut self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
        token: TransferToken,
        result: HostResult,
        actual_length: u32,
        data: Option<Vec<u8>>,
    ) {
        let pending = match self.state.transfers.take_completed(address, endpoint, token) {
            Some(pending) => pending,
            None => {
                debug!(
                    "Discarding completion on device {} ep {}, no matching transfer",
                    address, endpoint
                );
                return;
            }
        };

        let (actual_length, payload) = match (pending.in_buffer, result) {
            (Some(mut buffer), HostResult::Success) => {
                let data = data.unwrap_or_default();
                let received = data.len().min(pending.length as usize);
                buffer.extend_from_slice(&data[..received]);
                (buffer.len() as u32, buffer)
            }
            (Some(_), _) => (0, vec![]),
            (None, _) => (actual_length, vec![]),
        };

        let header = UsbIpHeaderBasic {
            command: USBIP_RET_SUBMIT.into(),
            seqnum: pending.seqnum,
            devid: pending.devid,
            direction: match pending.direction {
                Direction::In => USBIP_DIR_IN,
                Direction::Out => USBIP_DIR_OUT,
            },
            ep: endpoint.number().into(),
        };
        trace!(
            "[{}] RET_SUBMIT seq {} status {} actual {}",
            pending.session,
            pending.seqnum,
            result.status(),
            actual_length
        );
        self.reply(
            pending.session,
            encode_submit_response(&header, result.status(), actual_length, &payload),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::super::UsbIpServer;
    use super::*;
    use crate::host::HostEvent;
    use crate::usbip_protocol::{UsbIpResponse, USBIP_CMD_SUBMIT, USBIP_CMD_UNLINK};
    use crate::util::tests::*;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    const GET_DESCRIPTOR: [u8; 8] = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
    const SET_IDLE: [u8; 8] = [0x21, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

    fn header(command: u16, seqnum: u32, devid: u32, direction: u32, ep: u32) -> UsbIpHeaderBasic {
        UsbIpHeaderBasic {
            command: command.into(),
            seqnum,
            devid,
            direction,
            ep,
        }
    }

    fn submit(
        seqnum: u32,
        direction: u32,
        ep: u32,
        length: u32,
        setup: [u8; 8],
        data: Vec<u8>,
    ) -> Vec<u8> {
        UsbIpCommand::UsbIpCmdSubmit {
            header: header(USBIP_CMD_SUBMIT, seqnum, 0x0001_0001, direction, ep),
            transfer_flags: 0,
            transfer_buffer_length: length,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup,
            data,
            iso_packet_descriptor: vec![],
        }
        .to_bytes()
    }

    fn unlink(seqnum: u32, unlink_seqnum: u32) -> Vec<u8> {
        UsbIpCommand::UsbIpCmdUnlink {
            header: header(USBIP_CMD_UNLINK, seqnum, 0x0001_0001, USBIP_DIR_OUT, 0),
            unlink_seqnum,
        }
        .to_bytes()
    }

    /// Complete the latest transfer the host was handed on that endpoint
    fn complete(
        server: &UsbIpServer,
        host: &MockHost,
        number: u8,
        direction: Direction,
        result: HostResult,
        actual_length: u32,
        data: Option<Vec<u8>>,
    ) {
        let endpoint = EndpointIndex::new(number, direction).unwrap();
        server.handle_host_event(HostEvent::TransferComplete {
            address: 1,
            endpoint,
            token: host.token_for(1, endpoint),
            result,
            actual_length,
            data,
        });
    }

    /// Server with device 1 mounted and imported by one session
    fn attached() -> (
        UsbIpServer,
        Arc<MockHost>,
        SessionHandle,
        UnboundedReceiver<SessionMessage>,
    ) {
        setup_test_logger();
        let (server, host) = new_server(4);
        mount(&server, 1, 0x1234, 0x5678);
        let (handle, mut rx) = connect(&server);
        server.on_bytes_received(handle, &op_req_import("1-1")).unwrap();
        assert!(matches!(
            next_response(&mut rx),
            UsbIpResponse::OpRepImport { status: ST_OK, .. }
        ));
        (server, host, handle, rx)
    }

    fn ret_submit(rx: &mut UnboundedReceiver<SessionMessage>) -> (u32, i32, u32, Vec<u8>) {
        match next_response(rx) {
            UsbIpResponse::UsbIpRetSubmit {
                header,
                status,
                actual_length,
                transfer_buffer,
                ..
            } => (header.seqnum, status, actual_length, transfer_buffer),
            other => panic!("expected RET_SUBMIT, got {:?}", other),
        }
    }

    fn ret_unlink(rx: &mut UnboundedReceiver<SessionMessage>) -> (u32, i32) {
        match next_response(rx) {
            UsbIpResponse::UsbIpRetUnlink { header, status } => (header.seqnum, status),
            other => panic!("expected RET_UNLINK, got {:?}", other),
        }
    }

    #[test]
    fn devlist_on_empty_registry() {
        setup_test_logger();
        let (server, _host) = new_server(4);
        let (handle, mut rx) = connect(&server);
        server
            .on_bytes_received(handle, &UsbIpCommand::OpReqDevlist { status: 0 }.to_bytes())
            .unwrap();
        assert_eq!(
            next_response(&mut rx),
            UsbIpResponse::OpRepDevlist {
                status: ST_OK,
                devices: vec![]
            }
        );
    }

    #[test]
    fn import_marks_device_attached() {
        let (server, _host, handle, mut rx) = attached();
        assert!(server.devices()[0].attached);

        server
            .on_bytes_received(handle, &UsbIpCommand::OpReqDevlist { status: 0 }.to_bytes())
            .unwrap();
        match next_response(&mut rx) {
            UsbIpResponse::OpRepDevlist { devices, .. } => {
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0].bus_id, "1-1");
                assert_eq!(devices[0].vendor_id, 0x1234);
                assert_eq!(devices[0].product_id, 0x5678);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn import_unknown_busids() {
        setup_test_logger();
        let (server, _host) = new_server(4);
        mount(&server, 1, 0x1234, 0x5678);
        let (handle, mut rx) = connect(&server);
        for busid in ["1-2", "2-1", "garbage"] {
            server.on_bytes_received(handle, &op_req_import(busid)).unwrap();
            assert_eq!(
                next_response(&mut rx),
                UsbIpResponse::OpRepImport {
                    status: ST_NODEV,
                    device: None
                }
            );
        }
        assert!(!server.devices()[0].attached);
    }

    #[test]
    fn second_importer_is_refused() {
        let (server, _host, _first, _first_rx) = attached();
        let (second, mut rx) = connect(&server);
        server.on_bytes_received(second, &op_req_import("1-1")).unwrap();
        assert_eq!(
            next_response(&mut rx),
            UsbIpResponse::OpRepImport {
                status: ST_CONNREFUSED,
                device: None
            }
        );
    }

    #[test]
    fn import_twice_is_not_applicable() {
        let (server, _host, handle, mut rx) = attached();
        server.on_bytes_received(handle, &op_req_import("1-1")).unwrap();
        assert_eq!(
            next_response(&mut rx),
            UsbIpResponse::OpRepImport {
                status: ST_NA,
                device: None
            }
        );
    }

    #[test]
    fn control_out_round_trip() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(42, USBIP_DIR_OUT, 0, 0, SET_IDLE, vec![]))
            .unwrap();
        assert_eq!(
            host.calls(),
            vec![HostCall::Control {
                address: 1,
                token: 1,
                setup: SET_IDLE,
                out_data: vec![],
                length: 0,
            }]
        );
        assert_eq!(server.pending_transfers(), 1);

        complete(&server, &host, 0, Direction::Out, HostResult::Success, 0, None);
        assert_eq!(ret_submit(&mut rx), (42, 0, 0, vec![]));
        assert_eq!(server.pending_transfers(), 0);

        // already answered, so there is nothing to unlink
        server.on_bytes_received(handle, &unlink(43, 42)).unwrap();
        assert_eq!(ret_unlink(&mut rx), (43, -errno::ENOENT));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn control_in_returns_payload() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(7, USBIP_DIR_IN, 0, 18, GET_DESCRIPTOR, vec![]))
            .unwrap();
        assert!(matches!(
            host.calls()[0],
            HostCall::Control { length: 18, .. }
        ));

        let descriptor: Vec<u8> = (0..18).collect();
        complete(
            &server,
            &host,
            0,
            Direction::In,
            HostResult::Success,
            18,
            Some(descriptor.clone()),
        );
        assert_eq!(ret_submit(&mut rx), (7, 0, 18, descriptor));
    }

    #[test]
    fn in_payload_is_clamped_to_request() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(1, USBIP_DIR_IN, 1, 4, [0; 8], vec![]))
            .unwrap();
        complete(
            &server,
            &host,
            1,
            Direction::In,
            HostResult::Success,
            8,
            Some(vec![1, 2, 3, 4, 5, 6, 7, 8]),
        );
        assert_eq!(ret_submit(&mut rx), (1, 0, 4, vec![1, 2, 3, 4]));
    }

    #[test]
    fn failed_in_has_no_payload() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(1, USBIP_DIR_IN, 2, 64, [0; 8], vec![]))
            .unwrap();
        complete(&server, &host, 2, Direction::In, HostResult::Stalled, 0, None);
        assert_eq!(ret_submit(&mut rx), (1, -errno::EPIPE, 0, vec![]));
    }

    #[test]
    fn bulk_out_reports_stack_length() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(5, USBIP_DIR_OUT, 2, 3, [0; 8], vec![1, 2, 3]))
            .unwrap();
        assert_eq!(
            host.calls(),
            vec![HostCall::Transfer {
                address: 1,
                endpoint: EndpointIndex::new(2, Direction::Out).unwrap(),
                token: 1,
                out_data: vec![1, 2, 3],
                length: 3,
            }]
        );
        complete(&server, &host, 2, Direction::Out, HostResult::Timeout, 2, None);
        assert_eq!(ret_submit(&mut rx), (5, -errno::ETIMEDOUT, 2, vec![]));
    }

    #[test]
    fn second_submit_on_endpoint_is_busy() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(1, USBIP_DIR_IN, 1, 8, [0; 8], vec![]))
            .unwrap();
        server
            .on_bytes_received(handle, &submit(2, USBIP_DIR_IN, 1, 8, [0; 8], vec![]))
            .unwrap();
        assert_eq!(ret_submit(&mut rx), (2, -errno::EBUSY, 0, vec![]));
        assert_eq!(host.calls().len(), 1);

        // the other direction of the same number is free
        server
            .on_bytes_received(handle, &submit(3, USBIP_DIR_OUT, 1, 1, [0; 8], vec![9]))
            .unwrap();
        assert_eq!(server.pending_transfers(), 2);
    }

    #[test]
    fn submit_rejections() {
        let (server, host, handle, mut rx) = attached();

        let mut wrong_device = submit(1, USBIP_DIR_IN, 1, 8, [0; 8], vec![]);
        wrong_device[8..12].copy_from_slice(&0x0001_0002u32.to_be_bytes());
        server.on_bytes_received(handle, &wrong_device).unwrap();
        assert_eq!(ret_submit(&mut rx).1, -errno::EPERM);

        server
            .on_bytes_received(handle, &submit(2, USBIP_DIR_IN, 16, 8, [0; 8], vec![]))
            .unwrap();
        assert_eq!(ret_submit(&mut rx).1, -errno::EINVAL);

        server
            .on_bytes_received(
                handle,
                &submit(3, USBIP_DIR_IN, 1, MAX_TRANSFER_LENGTH + 1, [0; 8], vec![]),
            )
            .unwrap();
        assert_eq!(ret_submit(&mut rx).1, -errno::ENOMEM);

        let iso = UsbIpCommand::UsbIpCmdSubmit {
            header: header(USBIP_CMD_SUBMIT, 4, 0x0001_0001, USBIP_DIR_IN, 3),
            transfer_flags: 0,
            transfer_buffer_length: 8,
            start_frame: 0,
            number_of_packets: 1,
            interval: 1,
            setup: [0; 8],
            data: vec![],
            iso_packet_descriptor: vec![0; 16],
        };
        server.on_bytes_received(handle, &iso.to_bytes()).unwrap();
        assert_eq!(ret_submit(&mut rx).1, -errno::EOPNOTSUPP);

        assert!(host.calls().is_empty());
        assert_eq!(server.pending_transfers(), 0);
    }

    #[test]
    fn submit_without_import() {
        setup_test_logger();
        let (server, host) = new_server(4);
        mount(&server, 1, 0x1234, 0x5678);
        let (handle, mut rx) = connect(&server);
        server
            .on_bytes_received(handle, &submit(1, USBIP_DIR_IN, 1, 8, [0; 8], vec![]))
            .unwrap();
        assert_eq!(ret_submit(&mut rx), (1, -errno::ENODEV, 0, vec![]));
        server.on_bytes_received(handle, &unlink(2, 1)).unwrap();
        assert_eq!(ret_unlink(&mut rx), (2, -errno::ENOENT));
        assert!(host.calls().is_empty());
    }

    #[test]
    fn refused_submission_is_rolled_back() {
        let (server, host, handle, mut rx) = attached();
        host.reject_submissions(true);
        server
            .on_bytes_received(handle, &submit(1, USBIP_DIR_IN, 1, 8, [0; 8], vec![]))
            .unwrap();
        assert_eq!(ret_submit(&mut rx), (1, -errno::EIO, 0, vec![]));
        assert_eq!(server.pending_transfers(), 0);

        host.reject_submissions(false);
        server
            .on_bytes_received(handle, &submit(2, USBIP_DIR_IN, 1, 8, [0; 8], vec![]))
            .unwrap();
        assert_eq!(server.pending_transfers(), 1);
    }

    #[test]
    fn unlink_pending_transfer() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(10, USBIP_DIR_IN, 1, 8, [0; 8], vec![]))
            .unwrap();
        server.on_bytes_received(handle, &unlink(11, 10)).unwrap();
        assert_eq!(ret_unlink(&mut rx), (11, 0));
        assert_eq!(
            host.calls()[1],
            HostCall::HaltClear {
                address: 1,
                endpoint: EndpointIndex::new(1, Direction::In).unwrap(),
            }
        );

        // the aborted transfer completing later produces nothing
        complete(&server, &host, 1, Direction::In, HostResult::Failed, 0, None);
        assert!(rx.try_recv().is_err());
        assert_eq!(server.pending_transfers(), 0);
    }

    #[test]
    fn unlinked_completion_does_not_answer_resubmission() {
        let (server, host, handle, mut rx) = attached();
        let endpoint = EndpointIndex::new(1, Direction::In).unwrap();
        server
            .on_bytes_received(handle, &submit(10, USBIP_DIR_IN, 1, 4, [0; 8], vec![]))
            .unwrap();
        let unlinked = host.token_for(1, endpoint);
        server.on_bytes_received(handle, &unlink(11, 10)).unwrap();
        assert_eq!(ret_unlink(&mut rx), (11, 0));

        server
            .on_bytes_received(handle, &submit(12, USBIP_DIR_IN, 1, 4, [0; 8], vec![]))
            .unwrap();
        let resubmitted = host.token_for(1, endpoint);
        assert_ne!(unlinked, resubmitted);

        // the read that could not be aborted finishes first
        server.handle_host_event(HostEvent::TransferComplete {
            address: 1,
            endpoint,
            token: unlinked,
            result: HostResult::Success,
            actual_length: 4,
            data: Some(vec![0xAA; 4]),
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(server.pending_transfers(), 1);

        server.handle_host_event(HostEvent::TransferComplete {
            address: 1,
            endpoint,
            token: resubmitted,
            result: HostResult::Success,
            actual_length: 4,
            data: Some(vec![0xBB; 4]),
        });
        assert_eq!(ret_submit(&mut rx), (12, 0, 4, vec![0xBB; 4]));
        assert_eq!(server.pending_transfers(), 0);
    }

    #[test]
    fn disconnect_mid_transfer() {
        let (server, host, handle, mut rx) = attached();
        server
            .on_bytes_received(handle, &submit(1, USBIP_DIR_IN, 1, 8, [0; 8], vec![]))
            .unwrap();
        server.close_session(handle);
        assert!(!server.devices()[0].attached);

        complete(&server, &host, 1, Direction::In, HostResult::Success, 8, Some(vec![0; 8]));
        assert!(rx.try_recv().is_err());
        assert_eq!(server.pending_transfers(), 0);
    }

    #[test]
    fn commands_split_across_reads() {
        let (server, host, handle, mut rx) = attached();
        let mut bytes = submit(1, USBIP_DIR_OUT, 2, 4, [0; 8], vec![1, 2, 3, 4]);
        bytes.extend(UsbIpCommand::OpReqDevlist { status: 0 }.to_bytes());
        for byte in &bytes {
            server.on_bytes_received(handle, &[*byte]).unwrap();
        }
        assert_eq!(host.calls().len(), 1);
        assert!(matches!(
            next_response(&mut rx),
            UsbIpResponse::OpRepDevlist { .. }
        ));
    }

    #[test]
    fn framing_error_after_valid_command() {
        let (server, host, handle, _rx) = attached();
        let mut bytes = submit(1, USBIP_DIR_OUT, 2, 1, [0; 8], vec![1]);
        bytes.extend_from_slice(&[0x01, 0x10, 0x80, 0x05, 0, 0, 0, 0]);
        assert!(matches!(
            server.on_bytes_received(handle, &bytes),
            Err(Error::Protocol(ProtocolError::UnknownVersion(0x0110)))
        ));
        // the command ahead of the garbage was still handled
        assert_eq!(host.calls().len(), 1);
    }
}
