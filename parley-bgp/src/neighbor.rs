//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU32};

use chrono::{DateTime, Utc};
use parley_utils::bgp::AfiSafi;
use parley_utils::socket::{TTL_MAX, TcpConnInfo, TcpStream};
use parley_utils::task::{IntervalTask, Task, TimeoutTask};
use parley_utils::{Sender, UnboundedSender};
use tokio::sync::mpsc;

use crate::af::AfiSafiExt;
use crate::api;
use crate::config::NeighborCfg;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::packet::consts::{
    AS_TRANS, BGP_VERSION, CapabilityCode, CeaseSubcode, ErrorCode,
    FsmErrorSubcode, GrAfiSafiFlags, GrFlags,
};
use crate::packet::message::{
    AddPathTuple, Capability, DecodeCxt, EncodeCxt, GracefulRestart,
    KeepaliveMsg, Message, Negotiated, NegotiatedCapability, NotificationMsg,
    OpenMsg, RouteRefreshMsg, UpdateMsg,
};
use crate::rib::{AdjRibIn, AdjRibOut, Change};
use crate::tasks;
use crate::tasks::messages::input::{NbrRxMsg, NbrTimerMsg, TcpConnectMsg};
use crate::tasks::messages::output::NbrTxMsg;

// Large hold-time used during session initialization.
const LARGE_HOLDTIME: u16 = 240;

// BGP neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub remote_addr: IpAddr,
    pub config: NeighborCfg,
    pub state: fsm::State,
    pub peer_type: PeerType,
    pub conn_info: Option<TcpConnInfo>,
    // Whether the active connection resulted from our own connect rather
    // than an accepted one; consulted during collision resolution.
    pub initiated: bool,
    pub identifier: Option<Ipv4Addr>,
    pub holdtime_nego: Option<u16>,
    pub open_sent: Option<OpenMsg>,
    pub capabilities_adv: BTreeSet<Capability>,
    pub capabilities_rcvd: BTreeSet<Capability>,
    pub capabilities_nego: BTreeSet<NegotiatedCapability>,
    pub negotiated: Option<Negotiated>,
    pub notification_sent: Option<(DateTime<Utc>, NotificationMsg)>,
    pub notification_rcvd: Option<(DateTime<Utc>, NotificationMsg)>,
    pub last_established: Option<DateTime<Utc>>,
    pub statistics: NeighborStatistics,
    pub tasks: NeighborTasks,
    pub adj_rib_in: AdjRibIn,
    pub adj_rib_out: AdjRibOut,
    // Named route groups driven by the "watchdog" API command.
    pub watchdogs: BTreeMap<String, Watchdog>,
    pub msg_txp: Option<UnboundedSender<NbrTxMsg>>,
    pub connect_retries: u32,
}

// BGP peer type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerType {
    Internal,
    External,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct NeighborStatistics {
    pub established_transitions: u32,
    pub msgs_rcvd: MessageStatistics,
    pub msgs_sent: MessageStatistics,
    pub erroneous_updates_withdrawn: u32,
}

// Inbound and outbound message counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub total: Arc<AtomicU32>,
    pub updates: u32,
    pub notifications: u32,
    pub route_refreshes: u32,
}

// Neighbor tasks.
#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub autostart: Option<TimeoutTask>,
    pub connect: Option<Task<()>>,
    pub connect_retry: Option<TimeoutTask>,
    pub tcp_rx: Option<Task<()>>,
    pub keepalive: Option<IntervalTask>,
    pub holdtime: Option<TimeoutTask>,
    pub gr_stale: Option<TimeoutTask>,
}

// A named group of routes announced and withdrawn collectively through the
// API. The withdrawn state survives re-announcements of the member routes.
#[derive(Debug, Default)]
pub struct Watchdog {
    pub routes: Vec<Change>,
    pub withdrawn: bool,
}

// Type aliases.
pub type Neighbors = BTreeMap<IpAddr, Neighbor>;

// Finite State Machine.
pub mod fsm {
    use parley_utils::socket::{TcpConnInfo, TcpStream};
    use serde::{Deserialize, Serialize};

    use crate::packet::error::DecodeError;
    use crate::packet::message::{NotificationMsg, OpenMsg};

    // FSM states.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        Idle,
        Connect,
        Active,
        OpenSent,
        OpenConfirm,
        Established,
    }

    // FSM events.
    //
    // The original RFC FSM events are listed above each event for clarity.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart
        // ManualStart_with_PassiveTcpEstablishment
        Start,
        // ManualStop
        Stop(Option<NotificationMsg>),
        // Tcp_CR_Acked
        // TcpConnectionConfirmed
        Connected(TcpStream, TcpConnInfo, bool),
        // TcpConnectionFails
        ConnFail,
        // BGPHeaderErr
        // BGPOpenMsgErr
        // UpdateMsgErr
        RcvdError(DecodeError),
        // BGPOpen
        RcvdOpen(OpenMsg),
        // NotifMsg
        RcvdNotif(NotificationMsg),
        // KeepAliveMsg
        RcvdKalive,
        // UpdateMsg
        RcvdUpdate,
        // ConnectRetryTimer_Expires
        // HoldTimer_Expires
        // AutomaticStart
        Timer(Timer),
    }

    // BGP timers.
    //
    // Note: KEEPALIVE messages are sent independently, separate from the FSM.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Hold,
        AutoStart,
        GrStale,
    }

    impl std::fmt::Display for State {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                State::Idle => write!(f, "idle"),
                State::Connect => write!(f, "connect"),
                State::Active => write!(f, "active"),
                State::OpenSent => write!(f, "opensent"),
                State::OpenConfirm => write!(f, "openconfirm"),
                State::Established => write!(f, "established"),
            }
        }
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    // Creates a new neighbor in the Idle state with the given configuration.
    pub(crate) fn new(
        remote_addr: IpAddr,
        config: NeighborCfg,
        peer_type: PeerType,
    ) -> Neighbor {
        Neighbor {
            remote_addr,
            config,
            state: fsm::State::Idle,
            peer_type,
            conn_info: None,
            initiated: false,
            identifier: None,
            holdtime_nego: None,
            open_sent: None,
            capabilities_adv: Default::default(),
            capabilities_rcvd: Default::default(),
            capabilities_nego: Default::default(),
            negotiated: None,
            notification_sent: None,
            notification_rcvd: None,
            last_established: None,
            statistics: Default::default(),
            tasks: Default::default(),
            adj_rib_in: Default::default(),
            adj_rib_out: Default::default(),
            watchdogs: Default::default(),
            msg_txp: None,
            connect_retries: 0,
        }
    }

    // Injects an event into the neighbor's FSM.
    pub(crate) fn fsm_event(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        event: fsm::Event,
    ) {
        Debug::NbrFsmEvent(&self.remote_addr, &event).log();

        // Process FSM event.
        let next_state = match self.state {
            // Idle state
            fsm::State::Idle => match event {
                fsm::Event::Start
                | fsm::Event::Timer(fsm::Timer::AutoStart) => {
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    if self.config.transport.passive_mode {
                        Some(fsm::State::Active)
                    } else {
                        self.connect(&instance.tx.protocol_input.tcp_connect);
                        Some(fsm::State::Connect)
                    }
                }
                // Accepted connection while idling between automatic
                // restarts: proceed with the passive establishment.
                fsm::Event::Connected(stream, conn_info, initiated) => {
                    let local_open = self.build_open(
                        instance.config.asn,
                        instance.state.router_id,
                    );
                    self.connection_setup(
                        stream,
                        conn_info,
                        initiated,
                        &instance.tx.protocol_input.nbr_msg_rx,
                        local_open.clone(),
                    );
                    self.open_send(local_open);
                    self.holdtime_start(
                        LARGE_HOLDTIME,
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::Timer(fsm::Timer::GrStale) => {
                    self.gr_stale_sweep();
                    None
                }
                _ => None,
            },
            // Connect state
            fsm::State::Connect => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info, initiated) => {
                    self.connect_retry_stop();
                    let local_open = self.build_open(
                        instance.config.asn,
                        instance.state.router_id,
                    );
                    self.connection_setup(
                        stream,
                        conn_info,
                        initiated,
                        &instance.tx.protocol_input.nbr_msg_rx,
                        local_open.clone(),
                    );
                    self.open_send(local_open);
                    self.holdtime_start(
                        LARGE_HOLDTIME,
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect(&instance.tx.protocol_input.tcp_connect);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    None
                }
                fsm::Event::Timer(fsm::Timer::GrStale) => {
                    self.gr_stale_sweep();
                    None
                }
                _ => {
                    // FSM error.
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
            },
            // Active state
            fsm::State::Active => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info, initiated) => {
                    self.connect_retry_stop();
                    let local_open = self.build_open(
                        instance.config.asn,
                        instance.state.router_id,
                    );
                    self.connection_setup(
                        stream,
                        conn_info,
                        initiated,
                        &instance.tx.protocol_input.nbr_msg_rx,
                        local_open.clone(),
                    );
                    self.open_send(local_open);
                    self.holdtime_start(
                        LARGE_HOLDTIME,
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    if self.config.transport.passive_mode {
                        // Keep waiting for an inbound connection.
                        self.connect_retry_start(
                            &instance.tx.protocol_input.nbr_timer,
                        );
                        None
                    } else {
                        self.connect(&instance.tx.protocol_input.tcp_connect);
                        self.connect_retry_start(
                            &instance.tx.protocol_input.nbr_timer,
                        );
                        Some(fsm::State::Connect)
                    }
                }
                fsm::Event::Timer(fsm::Timer::GrStale) => {
                    self.gr_stale_sweep();
                    None
                }
                _ => {
                    // FSM error.
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
            },
            // OpenSent state
            fsm::State::OpenSent => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::Active)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(msg) => {
                    let next_state = self.open_process(instance, msg);
                    Some(next_state)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::GrStale) => {
                    self.gr_stale_sweep();
                    None
                }
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenSent,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // OpenConfirm state
            fsm::State::OpenConfirm => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(_msg) => {
                    // A second OPEN on the same connection is a protocol
                    // violation; collision handling for parallel
                    // connections happens at accept time.
                    let msg = NotificationMsg::new(
                        ErrorCode::Cease,
                        CeaseSubcode::ConnectionCollisionResolution,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtime_restart();
                    Some(fsm::State::Established)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::GrStale) => {
                    self.gr_stale_sweep();
                    None
                }
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // Established state
            fsm::State::Established => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive | fsm::Event::RcvdUpdate => {
                    self.holdtime_restart();
                    None
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::GrStale) => {
                    self.gr_stale_sweep();
                    None
                }
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInEstablished,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
        };

        // Change to next FSM state when applicable.
        if let Some(next_state) = next_state
            && self.state != next_state
        {
            // Schedule auto-start unless the peer has been manually disabled.
            if next_state == fsm::State::Idle && self.config.enabled {
                self.autostart_start(&instance.tx.protocol_input.nbr_timer);
            } else {
                self.autostart_stop();
            }

            self.fsm_state_change(instance, next_state);
        }
    }

    // Updates the neighbor's FSM state.
    fn fsm_state_change(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        next_state: fsm::State,
    ) {
        Debug::NbrFsmTransition(&self.remote_addr, &self.state, &next_state)
            .log();

        // Notify the API channel.
        if self.config.api.neighbor_changes {
            api::notify_state_change(instance, self, next_state);
        }

        // Keep track of the time that the BGP session last transitioned in or
        // out of the Established state.
        if self.state == fsm::State::Established
            || next_state == fsm::State::Established
        {
            self.last_established = Some(Utc::now());
        }

        if next_state == fsm::State::Established {
            // Update statistics.
            self.statistics.established_transitions += 1;
            self.connect_retries = 0;

            // Initialize session.
            self.session_init(instance);
        }

        self.state = next_state;
    }

    // Sets up the connection for the BGP neighbor, spawning necessary tasks
    // for TCP communication.
    fn connection_setup(
        &mut self,
        stream: TcpStream,
        conn_info: TcpConnInfo,
        initiated: bool,
        nbr_msg_rxp: &Sender<NbrRxMsg>,
        local_open: OpenMsg,
    ) {
        // Store TCP connection information.
        self.conn_info = Some(conn_info);
        self.initiated = initiated;

        // Split TCP stream into two halves.
        let (read_half, write_half) = stream.into_split();

        // Spawn neighbor TCP Tx task.
        let (msg_txp, msg_txc) = mpsc::unbounded_channel();
        let cxt = EncodeCxt {
            negotiated: Default::default(),
        };
        let mut tx_task = tasks::nbr_tx(self, cxt, write_half, msg_txc);
        self.msg_txp = Some(msg_txp);

        // Spawn neighbor TCP Rx task.
        let cxt = DecodeCxt {
            peer_type: self.peer_type,
            peer_as: self.config.peer_as,
            negotiated: Default::default(),
        };
        let tcp_rx_task =
            tasks::nbr_rx(self, cxt, local_open, read_half, nbr_msg_rxp);
        self.tasks.tcp_rx = Some(tcp_rx_task);

        // No need to keep track of the Tx task since it gracefully exits as
        // soon as the tx end of its mpsc channel is dropped. This ensures that
        // messages sent during neighbor shutdown will be delivered.
        tx_task.detach();
    }

    // Initializes the BGP session once it reaches the Established state.
    fn session_init(&mut self, instance: &mut InstanceUpView<'_>) {
        // Compute the stripped-down negotiated capability set.
        self.capabilities_nego = self
            .capabilities_adv
            .iter()
            .map(|cap| cap.as_negotiated())
            .collect::<BTreeSet<_>>()
            .intersection(
                &self
                    .capabilities_rcvd
                    .iter()
                    .map(|cap| cap.as_negotiated())
                    .collect::<BTreeSet<_>>(),
            )
            .cloned()
            .collect();

        // Update the Tx task with the negotiated session parameters.
        let negotiated = self.negotiated.clone().unwrap_or_default();
        let msg = NbrTxMsg::UpdateNegotiated(negotiated.clone());
        if let Some(msg_txp) = &self.msg_txp {
            let _ = msg_txp.send(msg);
        }

        // A reconnection before the stale timer fired: the peer will
        // re-announce its routes, and leftovers are swept at End-of-RIB.
        self.tasks.gr_stale = None;

        // Enqueue the configured static routes.
        for change in self.config.static_routes.clone() {
            self.adj_rib_out.enqueue(change);
        }

        // Send the initial routing update: the entire Adj-RIB-Out followed
        // by one End-of-RIB marker per negotiated family.
        self.adj_rib_out.replay(None);
        let mut msg_list = self.adj_rib_out.build_updates(
            &mut instance.state.attr_sets,
            &EncodeCxt {
                negotiated: negotiated.clone(),
            },
        );
        for afi_safi in &negotiated.families {
            msg_list.push(Message::Update(UpdateMsg::eor(*afi_safi)));
        }
        self.message_list_send(msg_list);
    }

    // Closes the BGP session, performing necessary cleanup and releasing
    // resources.
    pub(crate) fn session_close(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        send_notif: Option<NotificationMsg>,
    ) {
        // Send a notification message.
        if self.state >= fsm::State::OpenSent
            && let Some(msg) = send_notif
        {
            self.message_send(Message::Notification(msg));
        }

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Graceful restart: keep the received routes as stale entries when
        // the peer preserved its forwarding state; otherwise flush them.
        let mut preserved = None;
        if self.state == fsm::State::Established
            && let Some(negotiated) = &self.negotiated
            && let Some(gr) = &negotiated.graceful_restart
            && gr.families.values().any(|forwarding| *forwarding)
        {
            preserved = Some(gr.restart_time);
        }
        match preserved {
            Some(restart_time) => {
                self.adj_rib_in.mark_stale();
                self.gr_stale_start(
                    restart_time,
                    &instance.tx.protocol_input.nbr_timer,
                );
            }
            None => self.adj_rib_in.clear(),
        }
        instance.state.attr_sets.sweep();

        // Release all resources.
        self.conn_info = None;
        self.identifier = None;
        self.holdtime_nego = None;
        self.open_sent = None;
        self.capabilities_adv.clear();
        self.capabilities_rcvd.clear();
        self.capabilities_nego.clear();
        self.negotiated = None;
        self.tasks.connect = None;
        self.tasks.tcp_rx = None;
        self.tasks.keepalive = None;
        self.tasks.holdtime = None;
        self.msg_txp = None;
    }

    // Enqueues a single BGP message for transmission.
    pub(crate) fn message_send(&mut self, msg: Message) {
        Debug::NbrMsgTx(&self.remote_addr, &msg).log();

        // Update statistics.
        self.statistics.msgs_sent.update(&msg);

        // Keep track of the last sent notification.
        if let Message::Notification(msg) = &msg {
            self.notification_sent = Some((Utc::now(), msg.clone()));
        }

        // Ignore any possible error as the connection might have gone down
        // already.
        let nbr_addr = self.remote_addr;
        let msg = NbrTxMsg::SendMessage { nbr_addr, msg };
        if let Some(msg_txp) = &self.msg_txp {
            let _ = msg_txp.send(msg);
        }
    }

    // Enqueues a list of BGP messages for transmission.
    //
    // This method is more efficient for handling a large number of messages,
    // as they are sent all at once.
    pub(crate) fn message_list_send(&mut self, msg_list: Vec<Message>) {
        if msg_list.is_empty() {
            return;
        }

        for msg in &msg_list {
            Debug::NbrMsgTx(&self.remote_addr, msg).log();

            // Update statistics.
            self.statistics.msgs_sent.update(msg);
        }

        // Ignore any possible error as the connection might have gone down
        // already.
        let nbr_addr = self.remote_addr;
        let msg = NbrTxMsg::SendMessageList { nbr_addr, msg_list };
        if let Some(msg_txp) = &self.msg_txp {
            let _ = msg_txp.send(msg);
        }
    }

    // Builds the BGP OPEN message offered to this neighbor.
    fn build_open(&self, local_asn: u32, identifier: Ipv4Addr) -> OpenMsg {
        let local_asn = self.config.local_as.unwrap_or(local_asn);
        let capabilities = self.build_capabilities(local_asn);

        OpenMsg {
            version: BGP_VERSION,
            my_as: local_asn.try_into().unwrap_or(AS_TRANS),
            holdtime: self.config.timers.holdtime,
            identifier,
            capabilities,
        }
    }

    // Sends the BGP OPEN message.
    fn open_send(&mut self, msg: OpenMsg) {
        // Keep track of the advertised capabilities.
        self.capabilities_adv.clone_from(&msg.capabilities);

        self.open_sent = Some(msg.clone());
        self.message_send(Message::Open(msg));
    }

    // Assembles the set of capabilities to offer in the OPEN message.
    fn build_capabilities(
        &self,
        local_asn: u32,
    ) -> BTreeSet<Capability> {
        let cap_cfg = &self.config.capabilities;
        let mut capabilities = BTreeSet::new();

        // Multiprotocol capabilities.
        for afi_safi in &self.config.families {
            capabilities.insert(Capability::MultiProtocol {
                afi: afi_safi.afi(),
                safi: afi_safi.safi(),
            });
        }

        if cap_cfg.asn4 {
            capabilities
                .insert(Capability::FourOctetAsNumber { asn: local_asn });
        }
        if cap_cfg.route_refresh {
            capabilities.insert(Capability::RouteRefresh);
        }
        if cap_cfg.cisco_route_refresh {
            capabilities.insert(Capability::CiscoRouteRefresh);
        }
        if cap_cfg.enhanced_route_refresh {
            capabilities.insert(Capability::EnhancedRouteRefresh);
        }
        if cap_cfg.extended_message {
            capabilities.insert(Capability::ExtendedMessage);
        }
        if let Some(restart_time) = cap_cfg.graceful_restart {
            capabilities.insert(Capability::GracefulRestart(
                GracefulRestart {
                    restart_time: restart_time & 0x0FFF,
                    flags: GrFlags::empty(),
                    families: self
                        .config
                        .families
                        .iter()
                        .map(|afi_safi| {
                            (
                                (afi_safi.afi(), afi_safi.safi()),
                                GrAfiSafiFlags::FORWARDING,
                            )
                        })
                        .collect(),
                },
            ));
        }
        if !cap_cfg.add_path.is_empty() {
            let tuples = cap_cfg
                .add_path
                .iter()
                .map(|(afi_safi, mode)| AddPathTuple {
                    afi: afi_safi.afi(),
                    safi: afi_safi.safi(),
                    mode: *mode,
                })
                .collect();
            capabilities.insert(Capability::AddPath(tuples));
        }
        if cap_cfg.multisession {
            capabilities.insert(Capability::Multisession(
                [CapabilityCode::MultiProtocol as u8].into(),
            ));
        }

        capabilities
    }

    // Processes the received OPEN message while in the OpenSent state.
    fn open_process(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        msg: OpenMsg,
    ) -> fsm::State {
        use crate::packet::consts::OpenMessageErrorSubcode as ErrorSubcode;

        // Validate the received message.
        if let Err(error) = self.open_validate(instance, &msg) {
            error.log();

            // Close the session.
            let msg = match error {
                Error::NbrBadAs(..) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::OpenMessageError,
                        ErrorSubcode::BadPeerAs,
                    );
                    Some(msg)
                }
                Error::NbrBadIdentifier(..) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::OpenMessageError,
                        ErrorSubcode::BadBgpIdentifier,
                    );
                    Some(msg)
                }
                _ => None,
            };
            self.session_close(instance, msg);

            // Transition to the Idle state.
            return fsm::State::Idle;
        }

        // Compute the negotiated session parameters.
        let negotiated = match &self.open_sent {
            Some(sent) => Negotiated::negotiate(sent, &msg),
            None => Negotiated::default(),
        };
        let holdtime_nego = negotiated.holdtime;

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Update the Tx task before the KEEPALIVE goes out so subsequent
        // messages use the negotiated parameters.
        if let Some(msg_txp) = &self.msg_txp {
            let _ =
                msg_txp.send(NbrTxMsg::UpdateNegotiated(negotiated.clone()));
        }

        // Send Keepalive message.
        self.message_send(Message::Keepalive(KeepaliveMsg {}));

        // Start Keepalive interval and session hold timer.
        if holdtime_nego != 0 {
            self.keepalive_interval_start(holdtime_nego);
            self.holdtime_start(
                holdtime_nego,
                &instance.tx.protocol_input.nbr_timer,
            );
        } else {
            self.holdtime_stop();
        }

        // Keep track of the received data.
        self.identifier = Some(msg.identifier);
        self.holdtime_nego = (holdtime_nego != 0).then_some(holdtime_nego);
        self.capabilities_rcvd = msg.capabilities;
        self.negotiated = Some(negotiated);

        // Transition to the OpenConfirm state.
        fsm::State::OpenConfirm
    }

    // Performs semantic validation of the received BGP OPEN message.
    // Syntactic errors are detected during the decoding phase.
    fn open_validate(
        &self,
        instance: &InstanceUpView<'_>,
        msg: &OpenMsg,
    ) -> Result<(), Error> {
        // Validate ASN.
        if self.config.peer_as != msg.real_as() {
            return Err(Error::NbrBadAs(
                self.remote_addr,
                msg.real_as(),
                self.config.peer_as,
            ));
        }

        // Validate BGP identifier for internal peers.
        if self.peer_type == PeerType::Internal
            && msg.identifier == instance.state.router_id
        {
            return Err(Error::NbrBadIdentifier(
                self.remote_addr,
                msg.identifier,
            ));
        }

        Ok(())
    }

    // Resolves a connection collision (RFC 4271 - Section 6.8).
    //
    // Returns true when the existing connection survives and the new one
    // must be rejected; false when the existing session has to make way.
    // The connection initiated by the side with the numerically higher
    // router-id wins; ties are broken toward the locally initiated
    // connection.
    pub(crate) fn collision_resolve(&self, local_id: Ipv4Addr) -> bool {
        let existing_survives = match self.identifier {
            Some(peer_id) => {
                if u32::from(local_id) >= u32::from(peer_id) {
                    self.initiated
                } else {
                    !self.initiated
                }
            }
            // Peer identifier unknown (OpenSent): prefer the existing
            // connection.
            None => true,
        };
        Debug::NbrCollision(&self.remote_addr, existing_survives).log();
        existing_survives
    }

    // Returns the neighbor's Tx-TTL value based on the peer type and
    // configuration.
    pub(crate) fn tx_ttl(&self) -> u8 {
        match self.peer_type {
            PeerType::Internal => TTL_MAX,
            PeerType::External => {
                if self.config.transport.ttl_security.is_some() {
                    TTL_MAX
                } else if self.config.transport.ebgp_multihop_enabled
                    && let Some(ttl) = self.config.transport.ebgp_multihop_ttl
                {
                    ttl
                } else {
                    1
                }
            }
        }
    }

    // Starts the auto-start timer.
    fn autostart_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        let idle_hold_time = 1;
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::AutoStart,
            idle_hold_time,
            nbr_timerp,
        );
        self.tasks.autostart = Some(task);
    }

    // Stops the auto-start timer.
    fn autostart_stop(&mut self) {
        self.tasks.autostart = None;
    }

    // Starts a TCP connection task to the neighbor's remote address.
    fn connect(&mut self, tcp_connectp: &Sender<TcpConnectMsg>) {
        let task = tasks::tcp_connect(self, tcp_connectp);
        self.tasks.connect = Some(task);
        self.connect_retries = self.connect_retries.saturating_add(1);
    }

    // Starts the Keepalive Tx interval.
    fn keepalive_interval_start(&mut self, holdtime_nego: u16) {
        let interval =
            self.config.timers.keepalive.unwrap_or(holdtime_nego / 3);
        if interval == 0 {
            return;
        }
        let task = tasks::nbr_kalive_interval(self, interval);
        self.tasks.keepalive = Some(task);
    }

    // Starts the session hold timer.
    fn holdtime_start(
        &mut self,
        seconds: u16,
        nbr_timerp: &Sender<NbrTimerMsg>,
    ) {
        let task =
            tasks::nbr_timer(self, fsm::Timer::Hold, seconds, nbr_timerp);
        self.tasks.holdtime = Some(task);
    }

    // Restarts the session hold timer if the negotiated HoldTime value is
    // non-zero.
    fn holdtime_restart(&mut self) {
        if let Some(holdtime) = self.tasks.holdtime.as_mut() {
            holdtime.reset(None);
        }
    }

    // Stops the session hold timer.
    fn holdtime_stop(&mut self) {
        self.tasks.holdtime = None;
    }

    // Starts the connect retry timer with jittered exponential backoff,
    // bounded at two minutes.
    fn connect_retry_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        use rand::Rng;

        let base = self.config.timers.connect_retry_interval.max(1) as u32;
        let seconds = base
            .saturating_mul(1 << self.connect_retries.min(8))
            .min(120) as u16;
        // Spread simultaneous retries of multiple peers over time.
        let jitter = rand::rng().random_range(0..=(seconds / 4).max(1));
        let seconds = seconds.saturating_add(jitter).min(120);
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::ConnectRetry,
            seconds,
            nbr_timerp,
        );
        self.tasks.connect_retry = Some(task);
    }

    // Stops the connect retry timer.
    fn connect_retry_stop(&mut self) {
        self.tasks.connect_retry = None;
    }

    // Starts the graceful-restart stale timer.
    fn gr_stale_start(
        &mut self,
        seconds: u16,
        nbr_timerp: &Sender<NbrTimerMsg>,
    ) {
        let task =
            tasks::nbr_timer(self, fsm::Timer::GrStale, seconds, nbr_timerp);
        self.tasks.gr_stale = Some(task);
    }

    // Drops all routes still marked stale once the restart timer fires.
    fn gr_stale_sweep(&mut self) {
        let removed = self.adj_rib_in.sweep_all_stale();
        if removed > 0 {
            Debug::NbrGrStaleSweep(&self.remote_addr, removed).log();
        }
        self.tasks.gr_stale = None;
    }

    // Requests the Adj-RIB-In for the given families to be re-sent.
    pub(crate) fn request_route_refresh(&mut self, afi_safi: AfiSafi) {
        let msg = RouteRefreshMsg::new(
            afi_safi.afi() as u16,
            afi_safi.safi() as u8,
        );
        self.message_send(Message::RouteRefresh(msg));
    }

    // Check if the given address-family is enabled for this session.
    pub(crate) fn is_af_enabled(&self, afi_safi: AfiSafi) -> bool {
        match &self.negotiated {
            Some(negotiated) => negotiated.families.contains(&afi_safi),
            None => afi_safi == AfiSafi::Ipv4Unicast,
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, msg: &Message) {
        self.total.fetch_add(1, atomic::Ordering::Relaxed);
        match msg {
            Message::Update(_) => {
                self.updates += 1;
            }
            Message::Notification(_) => {
                self.notifications += 1;
            }
            Message::RouteRefresh(_) => {
                self.route_refreshes += 1;
            }
            _ => {}
        }
    }
}
