//! The link-layer connection state machine.
//!
//! One `Connection` is one endpoint (central or peripheral) of one physical
//! link. It is fully event-driven: every call to [`Connection::run`] executes
//! whatever is due at `now` and returns the absolute time of the next thing
//! the endpoint wants to do. PHY indications arrive through
//! [`Connection::on_rx_start`] and [`Connection::on_rx_end`]; outgoing
//! transmissions, delivered payloads, and observable events accumulate in
//! drain buffers the owning node collects after each step.
//!
//! A connection event runs every `interval` microseconds, offset by the
//! connection offset. The central opens each event with a transmission; the
//! peripheral opens listening. Within the event the endpoints alternate
//! Tx/Rx separated by TIFS until the continuation predicate fails, then both
//! sleep until the next event boundary.

use tracing::{debug, warn};

use crate::channel::{select_channel, ChannelMap};
use crate::config::ConnectionConfig;
use crate::events::{DisconnectReason, LinkEvent};
use crate::phy::{RxFrame, Transmission};
use crate::queue::TxQueue;
use crate::stats::ConnectionStats;
use crate::time::{Duration, Timestamp};
use crate::types::{
    PhyMode, Role, SeqBit, LLID_CONTROL, LLID_DATA_CONTINUATION, LLID_DATA_START, TIFS,
};
use crate::wire::{decode_frame, encode_frame, ControlPdu, DataPdu};

/// Connection FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Terminal: the connection left the active set.
    Standby,
    /// Radiating a packet.
    Transmit,
    /// Listening for the peer.
    Receive,
    /// Waiting for the next event boundary.
    Sleep,
}

/// What to do when the next wake time arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeAction {
    /// Open the next connection event.
    StartEvent,
    /// Begin a transmission (TIFS gap elapsed).
    StartTx,
    /// Current transmission ends; open the listen window.
    FinishTx,
    /// Listen window expired without a reception.
    ListenTimeout,
    /// Standby; nothing will ever be due.
    None,
}

/// The payload sitting in the retransmit buffer.
#[derive(Clone, Debug)]
struct InFlight {
    llid: u8,
    payload: Vec<u8>,
    /// Source timestamp riding along for the peer's latency accounting.
    app_timestamp: Option<Timestamp>,
    /// True for the classification control PDU awaiting acknowledgement.
    is_control: bool,
}

/// A payload delivered to the upper layer.
#[derive(Clone, Debug)]
pub struct Delivered {
    pub payload: Vec<u8>,
    pub at: Timestamp,
}

/// One endpoint of a connection.
pub struct Connection {
    config: ConnectionConfig,
    role: Role,
    state: LinkState,
    wake_action: WakeAction,
    next_wake: Timestamp,

    // Sequence machine
    sn: SeqBit,
    nesn: SeqBit,
    last_tx: Option<InFlight>,
    round_trip_start: Timestamp,

    // Event bookkeeping. `event_index` counts events monotonically for
    // timing; the protocol-visible counter is its low 16 bits.
    event_index: u64,
    started: bool,
    event_start: Timestamp,
    current_channel: u8,
    crc_fail_streak: u8,
    tx_more_data: bool,
    rx_more_data: bool,
    phy_rx_failed: bool,
    ev_tx_packets: u32,
    ev_rx_packets: u32,
    ev_crc_failed: u32,

    // Listen window
    listen_from: Timestamp,
    listen_deadline: Timestamp,
    rx_in_progress: bool,

    // Supervision
    supervision_deadline: Timestamp,

    // Channel map and the update procedure
    used_channels: ChannelMap,
    channels_classified: bool,
    classification_sent: bool,
    channel_update_ack: bool,
    update_in_progress: bool,
    pending_map: Option<ChannelMap>,
    update_instant: u16,

    queue: TxQueue,
    stats: ConnectionStats,
    tx_power_dbm: i8,

    // Drain buffers collected by the owning node
    outgoing: Vec<Transmission>,
    events: Vec<LinkEvent>,
    delivered: Vec<Delivered>,
}

impl Connection {
    pub fn new(config: ConnectionConfig, role: Role, tx_power_dbm: i8) -> Self {
        let queue = TxQueue::with_capacity(config.queue_capacity);
        let used_channels = config.initial_channels;
        let supervision_deadline = Timestamp::ZERO + config.supervision_timeout;
        let first_event = Timestamp::ZERO + config.offset;
        Self {
            config,
            role,
            state: LinkState::Sleep,
            wake_action: WakeAction::StartEvent,
            next_wake: first_event,
            sn: SeqBit::default(),
            nesn: SeqBit::default(),
            last_tx: None,
            round_trip_start: Timestamp::ZERO,
            event_index: 0,
            started: false,
            event_start: first_event,
            current_channel: 0,
            crc_fail_streak: 0,
            tx_more_data: false,
            rx_more_data: false,
            phy_rx_failed: false,
            ev_tx_packets: 0,
            ev_rx_packets: 0,
            ev_crc_failed: 0,
            listen_from: Timestamp::ZERO,
            listen_deadline: Timestamp::ZERO,
            rx_in_progress: false,
            supervision_deadline,
            used_channels,
            channels_classified: false,
            classification_sent: false,
            channel_update_ack: false,
            update_in_progress: false,
            pending_map: None,
            update_instant: 0,
            queue,
            stats: ConnectionStats::default(),
            tx_power_dbm,
            outgoing: Vec::new(),
            events: Vec::new(),
            delivered: Vec::new(),
        }
    }

    // Accessors ------------------------------------------------------------

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != LinkState::Standby
    }

    /// Protocol-visible connection event counter (wraps at 65 535).
    pub fn event_counter(&self) -> u16 {
        self.event_index as u16
    }

    pub fn used_channels(&self) -> ChannelMap {
        self.used_channels
    }

    pub fn current_channel(&self) -> u8 {
        self.current_channel
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn next_wake(&self) -> Timestamp {
        self.next_wake
    }

    pub fn update_in_progress(&self) -> bool {
        self.update_in_progress
    }

    pub fn channel_update_acked(&self) -> bool {
        self.channel_update_ack
    }

    // Drains ---------------------------------------------------------------

    pub fn take_outgoing(&mut self) -> Vec<Transmission> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn take_delivered(&mut self) -> Vec<Delivered> {
        std::mem::take(&mut self.delivered)
    }

    // Application interface -------------------------------------------------

    /// Enqueue an application payload for transmission. A full queue counts
    /// an overflow and drops the payload.
    pub fn enqueue(&mut self, payload: Vec<u8>, timestamp: Timestamp) {
        if !self.queue.enqueue(payload, timestamp) {
            self.stats.queue_overflow += 1;
        }
    }

    /// Install a new used-channel list from the classifier.
    ///
    /// Only the central initiates the in-band update. Lists smaller than two
    /// channels are ignored with a warning; a list equal to the enforced one
    /// produces no wire traffic; while an update is in flight no further
    /// update is accepted.
    pub fn update_channel_list(&mut self, map: ChannelMap) {
        if self.role != Role::Central {
            warn!(peer = %self.config.peer_name, "peripheral cannot initiate a channel map update");
            return;
        }
        if map.len() < 2 {
            warn!(
                channels = map.len(),
                "classifier produced fewer than 2 channels, ignoring update"
            );
            return;
        }
        if self.update_in_progress {
            return;
        }
        if map == self.used_channels {
            return;
        }
        self.pending_map = Some(map);
        self.channels_classified = true;
        self.update_in_progress = true;
    }

    // Scheduler interface ---------------------------------------------------

    /// Execute whatever is due at `now` and return the next wake time.
    pub fn run(&mut self, now: Timestamp) -> Timestamp {
        if self.state == LinkState::Standby {
            return Timestamp::MAX;
        }
        if now < self.next_wake {
            return self.next_wake;
        }
        match self.wake_action {
            WakeAction::StartEvent => self.start_event(now),
            WakeAction::StartTx => self.transmit_packet(now),
            WakeAction::FinishTx => self.finish_tx(now),
            WakeAction::ListenTimeout => self.listen_timeout(now),
            WakeAction::None => {}
        }
        self.next_wake
    }

    /// PHY indication: a frame started on `channel` with this access address.
    pub fn on_rx_start(&mut self, now: Timestamp, channel: u8, access_address: u32) {
        if self.state != LinkState::Receive || self.rx_in_progress {
            return;
        }
        if channel != self.current_channel || access_address != self.config.access_address.0 {
            return;
        }
        if now < self.listen_from || now > self.listen_deadline {
            return;
        }
        self.rx_in_progress = true;
        // Keep listening to the end of the active period less one TIFS.
        let extended = self.event_start + self.config.active_period - TIFS;
        if extended > self.listen_deadline {
            self.listen_deadline = extended;
        }
        self.schedule(WakeAction::ListenTimeout, self.listen_deadline);
    }

    /// PHY indication: a frame finished. Returns the new next wake time.
    pub fn on_rx_end(&mut self, now: Timestamp, rx: RxFrame) -> Timestamp {
        if self.state != LinkState::Receive {
            return self.next_wake;
        }
        self.rx_in_progress = false;
        self.stats.listen_time += now.saturating_sub(self.listen_from);
        self.process_reception(now, rx);
        self.after_receive_segment(now);
        self.next_wake
    }

    // Event machinery -------------------------------------------------------

    fn schedule(&mut self, action: WakeAction, at: Timestamp) {
        self.wake_action = action;
        self.next_wake = at;
    }

    fn start_time_of_event(&self, index: u64) -> Timestamp {
        Timestamp::ZERO + self.config.offset + self.config.interval * index
    }

    fn start_event(&mut self, now: Timestamp) {
        if self.supervision_deadline <= now {
            self.disconnect(now, DisconnectReason::SupervisionTimeout);
            return;
        }

        if self.started {
            self.events.push(LinkEvent::ConnectionEventEnded {
                at: now,
                counter: self.event_counter(),
                channel: self.current_channel,
                tx_packets: self.ev_tx_packets,
                rx_packets: self.ev_rx_packets,
                crc_failed: self.ev_crc_failed,
            });
            self.event_index += 1;
        } else {
            self.started = true;
        }
        self.ev_tx_packets = 0;
        self.ev_rx_packets = 0;
        self.ev_crc_failed = 0;
        self.crc_fail_streak = 0;
        self.phy_rx_failed = false;
        self.tx_more_data = false;
        self.rx_more_data = false;
        self.event_start = now;

        // A pending map commits at the first step of the instant event.
        if self.update_in_progress && self.event_counter() == self.update_instant {
            if self.role == Role::Central && !self.channel_update_ack {
                self.disconnect(now, DisconnectReason::MapUpdateUnacknowledged);
                return;
            }
            self.commit_channel_map(now);
        }

        self.current_channel = select_channel(
            self.config.hop_increment,
            self.event_counter(),
            &self.used_channels,
        );

        match self.role {
            Role::Central => self.transmit_packet(now),
            Role::Peripheral => self.open_listen(now),
        }
    }

    fn commit_channel_map(&mut self, now: Timestamp) {
        if let Some(map) = self.pending_map.take() {
            self.used_channels = map;
            debug!(
                peer = %self.config.peer_name,
                channels = map.len(),
                instant = self.update_instant,
                "channel map committed"
            );
            self.events.push(LinkEvent::ChannelMapUpdated {
                at: now,
                peer_name: self.config.peer_name.clone(),
                peer_id: self.config.peer_id,
                channels: map,
            });
        }
        self.update_in_progress = false;
        self.channels_classified = false;
        self.classification_sent = false;
        self.channel_update_ack = false;
    }

    /// Pick and transmit the next packet: retransmit buffer, then the
    /// classification control PDU, then queued application data, then empty.
    fn transmit_packet(&mut self, now: Timestamp) {
        let inflight = if let Some(prev) = self.last_tx.clone() {
            self.stats.tx_retransmitted += 1;
            prev
        } else if self.role == Role::Central
            && (self.channels_classified || (self.classification_sent && !self.channel_update_ack))
        {
            let map = self.pending_map.unwrap_or(self.used_channels);
            let instant = self.event_counter().wrapping_add(self.config.instant_offset);
            self.update_instant = instant;
            self.classification_sent = true;
            self.channels_classified = false;
            self.round_trip_start = now;
            InFlight {
                llid: LLID_CONTROL,
                payload: ControlPdu::ChannelMapInd { map, instant }.encode(),
                app_timestamp: None,
                is_control: true,
            }
        } else if let Some(next) = self.queue.dequeue() {
            self.round_trip_start = now;
            InFlight {
                llid: LLID_DATA_START,
                payload: next.payload,
                app_timestamp: Some(next.timestamp),
                is_control: false,
            }
        } else {
            InFlight {
                llid: LLID_DATA_CONTINUATION,
                payload: Vec::new(),
                app_timestamp: None,
                is_control: false,
            }
        };

        self.tx_more_data = !self.queue.is_empty();

        let pdu = DataPdu {
            llid: inflight.llid,
            nesn: self.nesn.as_bool(),
            sn: self.sn.as_bool(),
            md: self.tx_more_data,
            payload: inflight.payload.clone(),
        };
        let frame = encode_frame(self.config.access_address, self.config.crc_init, &pdu);
        let duration = self.config.phy.packet_duration(pdu.payload.len());

        self.stats.tx_packets += 1;
        self.stats.tx_bytes += frame.len() as u64;
        self.stats.tx_time += duration;
        if inflight.is_control {
            self.stats.tx_control += 1;
        } else if pdu.payload.is_empty() {
            self.stats.tx_empty += 1;
        } else {
            self.stats.tx_data += 1;
            self.stats.tx_payload_bytes += pdu.payload.len() as u64;
        }
        self.ev_tx_packets += 1;

        self.events.push(LinkEvent::TransmissionStarted {
            at: now,
            access_address: self.config.access_address,
            channel: self.current_channel,
            phy: self.config.phy,
            role: self.role,
            crc_ok: true,
            frame_len: frame.len(),
        });
        self.outgoing.push(Transmission {
            access_address: self.config.access_address,
            access_address_bits: self.config.access_address.bits(),
            channel: self.current_channel,
            phy: self.config.phy,
            tx_power_dbm: self.tx_power_dbm,
            frame_len: frame.len(),
            frame,
            ll_timestamp: now,
            app_timestamp: inflight.app_timestamp,
            duration,
        });

        // Empty PDUs are not retransmitted.
        self.last_tx = if inflight.payload.is_empty() {
            None
        } else {
            Some(inflight)
        };

        self.state = LinkState::Transmit;
        self.schedule(WakeAction::FinishTx, now + duration);
    }

    fn finish_tx(&mut self, now: Timestamp) {
        match self.role {
            Role::Central => {
                // TIFS gap, then listen for the response.
                self.stats.idle_time += TIFS;
                self.open_listen(now + TIFS);
            }
            Role::Peripheral => {
                // The peripheral decides after its response whether another
                // round fits; the central decides after its reception.
                if self.continuation_holds(now) {
                    self.stats.idle_time += TIFS;
                    self.open_listen(now + TIFS);
                } else {
                    self.go_to_sleep(now);
                }
            }
        }
    }

    fn open_listen(&mut self, from: Timestamp) {
        self.state = LinkState::Receive;
        self.phy_rx_failed = false;
        self.rx_in_progress = false;
        self.listen_from = from;
        self.listen_deadline = from + self.config.phy.max_packet_duration();
        self.schedule(WakeAction::ListenTimeout, self.listen_deadline);
    }

    fn listen_timeout(&mut self, now: Timestamp) {
        if self.rx_in_progress {
            // A frame is still on the air; stretch the window one packet.
            self.listen_deadline = now + self.config.phy.max_packet_duration();
            self.schedule(WakeAction::ListenTimeout, self.listen_deadline);
            return;
        }
        self.stats.listen_time += now.saturating_sub(self.listen_from);
        self.phy_rx_failed = true;
        self.after_receive_segment(now);
    }

    /// Close the receive segment: the central continues with another
    /// transmission when the predicate holds; the peripheral answers every
    /// survivable reception.
    fn after_receive_segment(&mut self, now: Timestamp) {
        if self.state == LinkState::Standby {
            return;
        }
        match self.role {
            Role::Central => {
                if self.continuation_holds(now) {
                    self.stats.idle_time += TIFS;
                    self.state = LinkState::Transmit;
                    self.schedule(WakeAction::StartTx, now + TIFS);
                } else {
                    self.go_to_sleep(now);
                }
            }
            Role::Peripheral => {
                if self.phy_rx_failed || self.crc_fail_streak >= 2 {
                    self.go_to_sleep(now);
                } else {
                    self.stats.idle_time += TIFS;
                    self.state = LinkState::Transmit;
                    self.schedule(WakeAction::StartTx, now + TIFS);
                }
            }
        }
    }

    /// The continuation predicate: room for one more round trip, somebody
    /// has more data, at most one CRC failure, and the PHY did not fail.
    fn continuation_holds(&self, now: Timestamp) -> bool {
        let elapsed = now.saturating_sub(self.event_start);
        let remaining = self
            .config
            .active_period
            .saturating_sub(elapsed)
            .saturating_add(self.config.offset);
        let round_trip = (self.config.phy.max_packet_duration() + TIFS) * 2;
        remaining > round_trip
            && (self.tx_more_data || self.rx_more_data)
            && self.crc_fail_streak <= 1
            && !self.phy_rx_failed
    }

    fn go_to_sleep(&mut self, now: Timestamp) {
        let next_start = self.start_time_of_event(self.event_index + 1);
        self.stats.sleep_time += next_start.saturating_sub(now);
        self.state = LinkState::Sleep;
        self.schedule(WakeAction::StartEvent, next_start);
    }

    fn disconnect(&mut self, now: Timestamp, reason: DisconnectReason) {
        warn!(
            peer = %self.config.peer_name,
            peer_id = self.config.peer_id,
            ?reason,
            at_us = now.as_micros(),
            "connection dropped to standby"
        );
        self.state = LinkState::Standby;
        self.schedule(WakeAction::None, Timestamp::MAX);
        self.events.push(LinkEvent::Disconnected {
            at: now,
            peer_name: self.config.peer_name.clone(),
            peer_id: self.config.peer_id,
            reason,
        });
    }

    // Reception -------------------------------------------------------------

    fn process_reception(&mut self, now: Timestamp, rx: RxFrame) {
        if rx.access_address != self.config.access_address {
            self.phy_rx_failed = true;
            return;
        }

        let decoded = match decode_frame(self.config.crc_init, &rx.frame) {
            Ok(d) => d,
            Err(_) => {
                self.phy_rx_failed = true;
                return;
            }
        };

        if !decoded.crc_ok {
            self.rx_more_data = true;
            self.crc_fail_streak += 1;
            self.stats.rx_crc_failed += 1;
            self.ev_crc_failed += 1;
            self.emit_reception(now, &rx, false, false);
            return;
        }

        self.crc_fail_streak = 0;
        self.supervision_deadline = now + self.config.supervision_timeout;
        self.stats.rx_packets += 1;
        self.stats.rx_bytes += rx.frame.len() as u64;
        self.ev_rx_packets += 1;

        let pdu = decoded.pdu;

        // Sequence number machine: a fresh SN is delivered and flips our
        // NESN; a repeated SN is a duplicate. A NESN differing from our SN
        // acknowledges whatever we have in flight.
        if pdu.sn == self.nesn.as_bool() {
            self.nesn.flip();
            if !pdu.payload.is_empty() && !pdu.is_control() {
                self.stats.rx_payload_bytes += pdu.payload.len() as u64;
                if let Some(app_ts) = rx.app_timestamp {
                    self.stats.total_latency += now.saturating_sub(app_ts);
                    self.stats.latency_samples += 1;
                }
                self.delivered.push(Delivered {
                    payload: pdu.payload.clone(),
                    at: now,
                });
            }
        } else {
            self.stats.rx_duplicate += 1;
        }

        let acknowledged = pdu.nesn != self.sn.as_bool();
        if acknowledged {
            self.sn.flip();
            if let Some(acked) = self.last_tx.take() {
                self.stats.acked_packets += 1;
                self.stats.total_rtt += now.saturating_sub(self.round_trip_start);
                self.stats.rtt_samples += 1;
                if acked.is_control {
                    self.channel_update_ack = true;
                }
            }
        }

        self.rx_more_data = pdu.md;

        if pdu.is_control() {
            self.stats.rx_control += 1;
            if let Ok(ControlPdu::ChannelMapInd { map, instant }) = ControlPdu::decode(&pdu.payload)
            {
                self.pending_map = Some(map);
                self.update_instant = instant;
                self.update_in_progress = true;
                self.channel_update_ack = true;
            }
        }

        self.emit_reception(now, &rx, true, acknowledged);
    }

    fn emit_reception(&mut self, now: Timestamp, rx: &RxFrame, success: bool, acknowledged: bool) {
        self.events.push(LinkEvent::ReceptionEnded {
            at: now,
            access_address: self.config.access_address,
            channel: rx.channel,
            phy: rx.phy,
            role: self.role,
            peer_id: self.config.peer_id,
            rssi_dbm: rx.rssi_dbm,
            sinr_db: rx.sinr_db,
            success,
            acknowledged,
            frame_len: rx.frame.len(),
        });
    }

    /// Build the PHY-facing maximum packet duration for external schedulers.
    pub fn max_packet_duration(&self) -> Duration {
        self.config.phy.max_packet_duration()
    }

    pub fn phy_mode(&self) -> PhyMode {
        self.config.phy
    }
}
