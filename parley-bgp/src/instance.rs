//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use parley_utils::ip::AddressFamily;
use parley_utils::socket::TcpListener;
use parley_utils::task::Task;
use serde_json::Value;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{
    Receiver, Sender, UnboundedReceiver, UnboundedSender,
};

use crate::api::ApiRequest;
use crate::config::Configuration;
use crate::debug::{Debug, InstanceInactiveReason};
use crate::error::{Error, IoError};
use crate::neighbor::{Neighbor, Neighbors, PeerType, fsm};
use crate::packet::consts::{CeaseSubcode, ErrorCode};
use crate::packet::message::NotificationMsg;
use crate::rib::AttrSets;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    NbrRxMsg, NbrTimerMsg, TcpAcceptMsg, TcpConnectMsg,
};
use crate::{events, network, tasks};

#[derive(Debug)]
pub struct Instance {
    // Instance configuration data.
    pub config: Configuration,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance neighbors.
    pub neighbors: Neighbors,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
    // Instance Rx channels.
    rx: InstanceChannelsRx,
}

#[derive(Debug)]
pub struct InstanceState {
    // Instance Router ID.
    pub router_id: Ipv4Addr,
    // TCP listening sockets.
    pub listening_sockets: Vec<TcpListenerTask>,
    // Interned attribute sets shared by the Adj-RIBs.
    pub attr_sets: AttrSets,
}

#[derive(Debug)]
pub struct TcpListenerTask {
    pub af: AddressFamily,
    pub socket: Arc<TcpListener>,
    _task: Task<()>,
}

#[derive(Clone, Debug)]
pub struct InstanceChannelsTx {
    // Protocol event channels.
    pub protocol_input: ProtocolInputChannelsTx,
    // JSON events towards the API consumer.
    pub api_event: UnboundedSender<Value>,
}

#[derive(Debug)]
struct InstanceChannelsRx {
    protocol_input: ProtocolInputChannelsRx,
    // Text commands from the API consumer.
    api_request: UnboundedReceiver<ApiRequest>,
    // Replacement configurations (reload).
    config: UnboundedReceiver<Configuration>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // TCP accept event.
    pub tcp_accept: Sender<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Sender<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Sender<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Sender<NbrTimerMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    // TCP accept event.
    pub tcp_accept: Receiver<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Receiver<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Receiver<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Receiver<NbrTimerMsg>,
}

// Endpoints handed to the process embedding the speaker: one channel to
// submit text commands, one stream of JSON events, and one channel to push
// replacement configurations.
#[derive(Debug)]
pub struct ApiChannels {
    pub commands: UnboundedSender<ApiRequest>,
    pub events: UnboundedReceiver<Value>,
    pub config: UnboundedSender<Configuration>,
}

// Borrowed view of an operational instance.
pub struct InstanceUpView<'a> {
    pub config: &'a Configuration,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx,
}

// One unit of work for the main loop.
#[derive(Debug)]
enum Input {
    Protocol(ProtocolInputMsg),
    Api(ApiRequest),
    Config(Configuration),
    ReloadRequest,
    RestartSessions,
    Shutdown,
}

// ===== impl Instance =====

impl Instance {
    // Creates the instance and the API endpoints of its control channel.
    pub fn new(config: Configuration) -> (Instance, ApiChannels) {
        let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
        let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
        let (nbr_msg_rxp, nbr_msg_rxc) = mpsc::channel(4);
        let (nbr_timerp, nbr_timerc) = mpsc::channel(4);
        let (api_requestp, api_requestc) = mpsc::unbounded_channel();
        let (api_eventp, api_eventc) = mpsc::unbounded_channel();
        let (configp, configc) = mpsc::unbounded_channel();

        let tx = InstanceChannelsTx {
            protocol_input: ProtocolInputChannelsTx {
                tcp_accept: tcp_acceptp,
                tcp_connect: tcp_connectp,
                nbr_msg_rx: nbr_msg_rxp,
                nbr_timer: nbr_timerp,
            },
            api_event: api_eventp,
        };
        let rx = InstanceChannelsRx {
            protocol_input: ProtocolInputChannelsRx {
                tcp_accept: tcp_acceptc,
                tcp_connect: tcp_connectc,
                nbr_msg_rx: nbr_msg_rxc,
                nbr_timer: nbr_timerc,
            },
            api_request: api_requestc,
            config: configc,
        };

        let instance = Instance {
            config,
            state: None,
            neighbors: Default::default(),
            tx,
            rx,
        };
        let channels = ApiChannels {
            commands: api_requestp,
            events: api_eventc,
            config: configp,
        };

        (instance, channels)
    }

    // Runs the instance until it is shut down by a signal or an API
    // command.
    pub async fn run(mut self) {
        self.update();

        let mut sigterm =
            signal(SignalKind::terminate()).expect("signal handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("signal handler");
        let mut sighup = signal(SignalKind::hangup()).expect("signal handler");
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).expect("signal handler");

        // Whether the embedding process dropped its API endpoints; closed
        // channels must not be polled again.
        let mut api_closed = false;
        let mut config_closed = false;

        loop {
            // Receive first, then process: the borrow of the Rx channels
            // ends before any instance state is touched.
            let input = {
                let rx = &mut self.rx;
                tokio::select! {
                    biased;
                    msg = rx.protocol_input.tcp_accept.recv() => {
                        msg.map(ProtocolInputMsg::TcpAccept).map(Input::Protocol)
                    }
                    msg = rx.protocol_input.tcp_connect.recv() => {
                        msg.map(ProtocolInputMsg::TcpConnect).map(Input::Protocol)
                    }
                    msg = rx.protocol_input.nbr_msg_rx.recv() => {
                        msg.map(ProtocolInputMsg::NbrRx).map(Input::Protocol)
                    }
                    msg = rx.protocol_input.nbr_timer.recv() => {
                        msg.map(ProtocolInputMsg::NbrTimer).map(Input::Protocol)
                    }
                    request = rx.api_request.recv(), if !api_closed => {
                        match request {
                            Some(request) => Some(Input::Api(request)),
                            None => {
                                api_closed = true;
                                None
                            }
                        }
                    }
                    config = rx.config.recv(), if !config_closed => {
                        match config {
                            Some(config) => Some(Input::Config(config)),
                            None => {
                                config_closed = true;
                                None
                            }
                        }
                    }
                    _ = sigterm.recv() => Some(Input::Shutdown),
                    _ = sigint.recv() => Some(Input::Shutdown),
                    _ = sighup.recv() => Some(Input::ReloadRequest),
                    _ = sigusr1.recv() => Some(Input::RestartSessions),
                }
            };

            match input {
                Some(Input::Protocol(msg)) => {
                    self.process_protocol_msg(msg);
                }
                Some(Input::Api(request)) => {
                    if self.process_api_request(request) {
                        break;
                    }
                }
                Some(Input::Config(config)) => {
                    self.reload(config);
                }
                Some(Input::ReloadRequest) => {
                    // The configuration parser lives outside the core; ask
                    // the embedding process to push a fresh configuration.
                    events::signal_event(&mut self, "reload");
                }
                Some(Input::RestartSessions) => {
                    self.restart_sessions();
                }
                Some(Input::Shutdown) => {
                    self.shutdown();
                    break;
                }
                // A closed channel isn't fatal; the embedding process may
                // have dropped its API endpoints.
                None => (),
            }
        }
    }

    // Checks if the instance needs to be started or stopped.
    pub fn update(&mut self) {
        let router_id = self.config.identifier;

        match self.is_ready(router_id) {
            Ok(()) if !self.is_active() => {
                self.start(router_id.unwrap());
            }
            Err(reason) if self.is_active() => {
                self.stop(reason);
            }
            _ => (),
        }
    }

    // Starts the BGP instance.
    fn start(&mut self, router_id: Ipv4Addr) {
        Debug::InstanceStart.log();

        match InstanceState::new(router_id, &self.tx) {
            Ok(state) => {
                // Store instance initial state.
                self.state = Some(state);

                // Create and start neighbors.
                let neighbor_cfg = self.config.neighbors.clone();
                let local_asn = self.config.asn;
                for (remote_addr, config) in neighbor_cfg {
                    let peer_type = if config.peer_as
                        == config.local_as.unwrap_or(local_asn)
                    {
                        PeerType::Internal
                    } else {
                        PeerType::External
                    };

                    // Register the MD5 password on the listening sockets.
                    if let Some(password) = &config.transport.md5_key
                        && let Some(state) = &self.state
                    {
                        for listener in &state.listening_sockets {
                            network::listen_socket_md5sig_update(
                                &listener.socket,
                                &remote_addr,
                                Some(password),
                            );
                        }
                    }

                    let nbr = Neighbor::new(remote_addr, config, peer_type);
                    self.neighbors.insert(remote_addr, nbr);
                }

                let (mut instance, neighbors) = self.as_up().unwrap();
                for nbr in neighbors.values_mut() {
                    if nbr.config.enabled {
                        nbr.fsm_event(&mut instance, fsm::Event::Start);
                    }
                }
            }
            Err(error) => {
                Error::InstanceStartError(Box::new(error)).log();
            }
        }
    }

    // Stops the BGP instance.
    fn stop(&mut self, reason: InstanceInactiveReason) {
        let Some((mut instance, neighbors)) = self.as_up() else {
            return;
        };

        Debug::InstanceStop(reason).log();

        // Stop neighbors.
        for nbr in neighbors.values_mut() {
            let msg = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::AdministrativeShutdown,
            );
            nbr.fsm_event(&mut instance, fsm::Event::Stop(Some(msg)));
        }

        // Clear instance state.
        self.neighbors.clear();
        self.state = None;
    }

    // Stops all sessions and shuts the instance down.
    pub(crate) fn shutdown(&mut self) {
        events::signal_event(self, "shutdown");
        self.stop(InstanceInactiveReason::AdminDown);
    }

    // Restarts every session.
    pub(crate) fn restart_sessions(&mut self) {
        let Some((mut instance, neighbors)) = self.as_up() else {
            return;
        };
        for nbr in neighbors.values_mut() {
            let msg = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::AdministrativeReset,
            );
            nbr.fsm_event(&mut instance, fsm::Event::Stop(Some(msg)));
            if nbr.config.enabled {
                nbr.fsm_event(&mut instance, fsm::Event::Start);
            }
        }
    }

    // Applies a replacement configuration atomically. Sessions of unchanged
    // neighbors stay up; removed neighbors are torn down and new ones
    // started.
    pub(crate) fn reload(&mut self, config: Configuration) {
        Debug::InstanceReload.log();

        // Changes to the instance-wide identity require a full restart.
        if config.asn != self.config.asn
            || config.identifier != self.config.identifier
        {
            self.stop(InstanceInactiveReason::AdminDown);
            self.config = config;
            self.update();
            return;
        }

        let old_neighbors = self.config.neighbors.clone();
        self.config = config;
        let local_asn = self.config.asn;

        // Tear down neighbors that were removed or whose configuration
        // changed.
        let new_neighbors = self.config.neighbors.clone();
        if let Some((mut instance, neighbors)) = self.as_up() {
            neighbors.retain(|remote_addr, nbr| {
                match new_neighbors.get(remote_addr) {
                    Some(new_config) if *new_config == nbr.config => true,
                    Some(_) => {
                        let msg = NotificationMsg::new(
                            ErrorCode::Cease,
                            CeaseSubcode::OtherConfigurationChange,
                        );
                        nbr.fsm_event(
                            &mut instance,
                            fsm::Event::Stop(Some(msg)),
                        );
                        false
                    }
                    None => {
                        let msg = NotificationMsg::new(
                            ErrorCode::Cease,
                            CeaseSubcode::PeerDeConfigured,
                        );
                        nbr.fsm_event(
                            &mut instance,
                            fsm::Event::Stop(Some(msg)),
                        );
                        false
                    }
                }
            });
        }

        // Create neighbors that are new or were reconfigured.
        for (remote_addr, config) in new_neighbors {
            if self.neighbors.contains_key(&remote_addr)
                && old_neighbors.get(&remote_addr) == Some(&config)
            {
                continue;
            }
            let peer_type =
                if config.peer_as == config.local_as.unwrap_or(local_asn) {
                    PeerType::Internal
                } else {
                    PeerType::External
                };
            let nbr = Neighbor::new(remote_addr, config, peer_type);
            self.neighbors.insert(remote_addr, nbr);

            let Some((mut instance, neighbors)) = self.as_up() else {
                continue;
            };
            let nbr = neighbors.get_mut(&remote_addr).unwrap();
            if nbr.config.enabled {
                nbr.fsm_event(&mut instance, fsm::Event::Start);
            }
        }
    }

    // Returns whether the BGP instance is operational.
    fn is_active(&self) -> bool {
        self.state.is_some()
    }

    // Returns whether the instance is ready for BGP operation.
    fn is_ready(
        &self,
        router_id: Option<Ipv4Addr>,
    ) -> Result<(), InstanceInactiveReason> {
        if router_id.is_none() {
            return Err(InstanceInactiveReason::MissingRouterId);
        }

        Ok(())
    }

    // Returns a view struct for the instance if it is operational.
    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut Neighbors)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.neighbors))
        } else {
            None
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        // Ignore event if the instance isn't active.
        if let Some((mut instance, neighbors)) = self.as_up()
            && let Err(error) =
                events::process_protocol_msg(&mut instance, neighbors, msg)
        {
            error.log();
        }
    }

    // Processes one API request, returning true when the instance should
    // shut down.
    fn process_api_request(&mut self, request: ApiRequest) -> bool {
        events::process_api_request(self, request)
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new(
        router_id: Ipv4Addr,
        instance_tx: &InstanceChannelsTx,
    ) -> Result<InstanceState, Error> {
        let mut listening_sockets = Vec::new();

        // Create TCP listeners.
        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            let socket = network::listen_socket(af)
                .map(Arc::new)
                .map_err(IoError::TcpSocketError)?;
            let task = tasks::tcp_listener(
                &socket,
                &instance_tx.protocol_input.tcp_accept,
            );
            listening_sockets.push(TcpListenerTask {
                af,
                socket,
                _task: task,
            });
        }

        Ok(InstanceState {
            router_id,
            listening_sockets,
            attr_sets: Default::default(),
        })
    }
}
