//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use chrono::Utc;
use parley_utils::bgp::AfiSafi;
use parley_utils::ip::IpAddrKind;
use parley_utils::socket::{TcpConnInfo, TcpStream};

use crate::af::AfiSafiExt;
use crate::api::{self, ApiRequest, Command};
use crate::debug::Debug;
use crate::error::{Error, IoError, NbrRxError};
use crate::instance::{Instance, InstanceUpView};
use crate::neighbor::{Neighbor, Neighbors, fsm};
use crate::packet::consts::{
    Afi, CeaseSubcode, ErrorCode, RouteRefreshSubtype, Safi,
};
use crate::packet::message::{
    EncodeCxt, Message, MpNexthop, NotificationMsg, RouteRefreshMsg,
    UpdateMsg,
};
use crate::network;
use crate::packet::attribute::Attrs;
use crate::packet::nlri::Nlri;
use crate::rib::Change;
use crate::tasks::messages::ProtocolInputMsg;

// ===== protocol event dispatch =====

pub(crate) fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Accepted TCP connection request.
        ProtocolInputMsg::TcpAccept(msg) => {
            process_tcp_accept(instance, neighbors, msg.stream, msg.conn_info)?;
        }
        // Established TCP connection.
        ProtocolInputMsg::TcpConnect(msg) => {
            process_tcp_connect(
                instance,
                neighbors,
                msg.stream,
                msg.conn_info,
            )?;
        }
        // Received message from neighbor.
        ProtocolInputMsg::NbrRx(msg) => {
            process_nbr_msg(instance, neighbors, msg.nbr_addr, msg.msg)?;
        }
        // Neighbor's timeout has expired.
        ProtocolInputMsg::NbrTimer(msg) => {
            process_nbr_timer(instance, neighbors, msg.nbr_addr, msg.timer)?;
        }
    }

    Ok(())
}

// ===== TCP connection request =====

pub(crate) fn process_tcp_accept(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };

    // Connection collision handling (RFC 4271 - Section 6.8).
    if nbr.conn_info.is_some() {
        if nbr.state == fsm::State::Established
            || nbr.collision_resolve(instance.state.router_id)
        {
            // The existing connection survives; the accepted stream is
            // dropped.
            return Ok(());
        }

        // The existing connection loses; tear it down and adopt the
        // accepted one.
        let msg = NotificationMsg::new(
            ErrorCode::Cease,
            CeaseSubcode::ConnectionCollisionResolution,
        );
        nbr.fsm_event(instance, fsm::Event::Stop(Some(msg)));
    }

    // Initialize the accepted stream.
    network::accepted_stream_init(
        &stream,
        nbr.remote_addr.address_family(),
        nbr.tx_ttl(),
        nbr.config.transport.ttl_security,
        nbr.config.transport.tcp_mss,
    )
    .map_err(IoError::TcpSocketError)?;

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info, false));

    Ok(())
}

// ===== TCP connection established =====

pub(crate) fn process_tcp_connect(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };
    nbr.tasks.connect = None;

    // An inbound connection won the race; keep it.
    if nbr.conn_info.is_some() {
        return Ok(());
    }

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info, true));

    Ok(())
}

// ===== neighbor message receipt =====

pub(crate) fn process_nbr_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    msg: Result<Message, NbrRxError>,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Process received message.
    match msg {
        Ok(msg) => {
            Debug::NbrMsgRx(&nbr.remote_addr, &msg).log();

            // Update statistics.
            nbr.statistics.msgs_rcvd.update(&msg);

            // Notify the API channel.
            if nbr.config.api.receive_parsed {
                api::notify_message(instance, nbr, "receive", &msg);
            }
            if nbr.config.api.receive_packets {
                api::notify_packet(instance, nbr, "receive", &msg);
            }

            match msg {
                Message::Open(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdOpen(msg));
                }
                Message::Update(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdUpdate);
                    process_nbr_update(instance, nbr, msg)?;
                }
                Message::Notification(msg) => {
                    // Keep track of the last received notification.
                    nbr.notification_rcvd = Some((Utc::now(), msg.clone()));
                    nbr.fsm_event(instance, fsm::Event::RcvdNotif(msg));
                }
                Message::Keepalive(_) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdKalive);
                }
                Message::RouteRefresh(msg) => {
                    process_nbr_route_refresh(instance, nbr, msg)?;
                }
            }
        }
        Err(error) => match error {
            NbrRxError::TcpConnClosed => {
                nbr.fsm_event(instance, fsm::Event::ConnFail);
            }
            NbrRxError::MsgDecodeError(error) => {
                nbr.fsm_event(instance, fsm::Event::RcvdError(error));
            }
        },
    }

    Ok(())
}

fn process_nbr_update(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: UpdateMsg,
) -> Result<(), Error> {
    // Handle End-of-RIB markers.
    if let Some(afi_safi) = msg.as_eor() {
        Debug::NbrEorRcvd(&nbr.remote_addr, afi_safi).log();
        let removed = nbr.adj_rib_in.sweep_stale(afi_safi);
        if removed > 0 {
            Debug::NbrGrStaleSweep(&nbr.remote_addr, removed).log();
        }
        return Ok(());
    }

    // Process IPv4 reachable NLRIs.
    //
    // Use nexthop from the NEXTHOP attribute.
    if let Some(reach) = msg.reach {
        if let Some(attrs) = &msg.attrs {
            let mut attrs = attrs.clone();
            attrs.base.nexthop = Some(IpAddr::V4(reach.nexthop));
            process_nbr_reach_nlri(instance, nbr, reach.prefixes, attrs);
        } else {
            // Treat as withdraw.
            nbr.statistics.erroneous_updates_withdrawn += 1;
            process_nbr_unreach_nlri(nbr, reach.prefixes);
        }
    }

    // Process multiprotocol reachable NLRIs.
    //
    // Use nexthop(s) from the MP_REACH_NLRI attribute.
    if let Some(mp_reach) = msg.mp_reach {
        if let Some(attrs) = &msg.attrs {
            let mut attrs = attrs.clone();
            attrs.base.nexthop = Some(mp_reach.nexthop.as_ip());
            if let MpNexthop::Ipv6 {
                link_local: Some(link_local),
                ..
            } = &mp_reach.nexthop
            {
                attrs.base.ll_nexthop = Some(*link_local);
            }
            process_nbr_reach_nlri(instance, nbr, mp_reach.nlri, attrs);
        } else {
            // Treat as withdraw.
            nbr.statistics.erroneous_updates_withdrawn += 1;
            process_nbr_unreach_nlri(nbr, mp_reach.nlri);
        }
    }

    // Process IPv4 unreachable NLRIs.
    if let Some(unreach) = msg.unreach {
        process_nbr_unreach_nlri(nbr, unreach.prefixes);
    }

    // Process multiprotocol unreachable NLRIs.
    if let Some(mp_unreach) = msg.mp_unreach {
        process_nbr_unreach_nlri(nbr, mp_unreach.nlri);
    }

    Ok(())
}

fn process_nbr_reach_nlri(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    nlri_list: Vec<Nlri>,
    attrs: Attrs,
) {
    let attr_set = instance.state.attr_sets.get(&attrs);
    for nlri in nlri_list {
        // Check if the address-family is enabled for this session.
        if !nbr.is_af_enabled(nlri.afi_safi()) {
            continue;
        }
        nbr.adj_rib_in.update(nlri, attr_set.clone());
    }
}

fn process_nbr_unreach_nlri(nbr: &mut Neighbor, nlri_list: Vec<Nlri>) {
    for nlri in nlri_list {
        if !nbr.is_af_enabled(nlri.afi_safi()) {
            continue;
        }
        nbr.adj_rib_in.withdraw(&nlri);
    }
}

fn process_nbr_route_refresh(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: RouteRefreshMsg,
) -> Result<(), Error> {
    use num_traits::FromPrimitive;

    let (Some(afi), Some(safi)) =
        (Afi::from_u16(msg.afi), Safi::from_u8(msg.safi))
    else {
        // Ignore unknown address family.
        return Ok(());
    };
    let Some(afi_safi) = AfiSafi::from_pair(afi, safi) else {
        return Ok(());
    };

    // RFC 2918 - Section 4:
    // If a BGP speaker receives from its peer a ROUTE-REFRESH message with
    // the <AFI, SAFI> that the speaker didn't advertise to the peer at the
    // session establishment time via capability advertisement, the speaker
    // shall ignore such a message.
    if !nbr.is_af_enabled(afi_safi) {
        return Ok(());
    }

    // BoRR and EoRR demarcation markers carry no routes.
    if RouteRefreshSubtype::from_u8(msg.subtype)
        != Some(RouteRefreshSubtype::Normal)
    {
        return Ok(());
    }

    // Re-send the Adj-RIB-Out for the requested family.
    let negotiated = nbr.negotiated.clone().unwrap_or_default();
    let enhanced = negotiated.enhanced_route_refresh;
    nbr.adj_rib_out.replay(Some(afi_safi));

    let cxt = EncodeCxt { negotiated };
    let mut msg_list = vec![];
    if enhanced {
        // RFC 7313: demarcate the refresh with BoRR/EoRR markers.
        msg_list.push(Message::RouteRefresh(RouteRefreshMsg {
            afi: msg.afi,
            subtype: RouteRefreshSubtype::Borr as u8,
            safi: msg.safi,
        }));
    }
    msg_list.extend(
        nbr.adj_rib_out
            .build_updates(&mut instance.state.attr_sets, &cxt),
    );
    if enhanced {
        msg_list.push(Message::RouteRefresh(RouteRefreshMsg {
            afi: msg.afi,
            subtype: RouteRefreshSubtype::Eorr as u8,
            safi: msg.safi,
        }));
    } else {
        msg_list.push(Message::Update(UpdateMsg::eor(afi_safi)));
    }
    nbr.message_list_send(msg_list);

    Ok(())
}

// ===== neighbor expired timeout =====

pub(crate) fn process_nbr_timer(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    timer: fsm::Timer,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Timer(timer));

    Ok(())
}

// ===== API request processing =====

// Processes one line of the API command protocol. Returns true when the
// command shuts the speaker down.
pub(crate) fn process_api_request(
    instance: &mut Instance,
    request: ApiRequest,
) -> bool {
    Debug::ApiCommandRx(&request.line).log();

    let command = match Command::parse(&request.line) {
        Ok(command) => command,
        Err(error) => {
            if let Some((mut view, _)) = instance.as_up() {
                api::notify_error(&mut view, &request.line, &error);
            }
            return false;
        }
    };

    match command {
        Command::Shutdown => {
            instance.shutdown();
            return true;
        }
        Command::Restart => {
            instance.restart_sessions();
        }
        Command::Reload => {
            signal_event(instance, "reload");
        }
        Command::ShowNeighbor { extensive } => {
            if let Some((mut view, neighbors)) = instance.as_up() {
                let answer = api::show_neighbor(&view, neighbors, extensive);
                api::notify_answer(&mut view, answer);
            }
        }
        Command::ShowRoutes => {
            if let Some((mut view, neighbors)) = instance.as_up() {
                let answer = api::show_routes(neighbors);
                api::notify_answer(&mut view, answer);
            }
        }
        Command::AnnounceRoute {
            neighbors,
            change,
            watchdog,
        } => {
            route_change_fanout(instance, &neighbors, change, watchdog);
        }
        Command::WithdrawRoute { neighbors, change }
        | Command::WithdrawFlow { neighbors, change }
        | Command::AnnounceFlow { neighbors, change } => {
            route_change_fanout(instance, &neighbors, change, None);
        }
        Command::AnnounceEor {
            neighbors: targets,
            afi_safi,
        } => {
            if let Some((_, neighbors)) = instance.as_up() {
                for nbr in fanout(neighbors, &targets)
                    .filter(|nbr| nbr.state == fsm::State::Established)
                {
                    nbr.message_send(Message::Update(UpdateMsg::eor(
                        afi_safi,
                    )));
                }
            }
        }
        Command::AnnounceRouteRefresh {
            neighbors: targets,
            afi_safi,
        } => {
            if let Some((_, neighbors)) = instance.as_up() {
                for nbr in fanout(neighbors, &targets)
                    .filter(|nbr| nbr.state == fsm::State::Established)
                {
                    nbr.request_route_refresh(afi_safi);
                }
            }
        }
        Command::Watchdog {
            neighbors: targets,
            name,
            announce,
        } => {
            if let Some((mut view, neighbors)) = instance.as_up() {
                for nbr in fanout(neighbors, &targets) {
                    let Some(watchdog) = nbr.watchdogs.get_mut(&name) else {
                        continue;
                    };
                    watchdog.withdrawn = !announce;
                    let changes = if announce {
                        watchdog.routes.clone()
                    } else {
                        watchdog
                            .routes
                            .iter()
                            .map(|change| Change::Withdraw {
                                nlri: change.nlri().clone(),
                            })
                            .collect()
                    };
                    for change in changes {
                        nbr.adj_rib_out.enqueue(change);
                    }
                    flush_updates(&mut view, nbr);
                }
            }
        }
    }

    false
}

// Emits a "signal" event asking the embedding process to act.
pub(crate) fn signal_event(instance: &mut Instance, kind: &str) {
    if let Some((mut view, _)) = instance.as_up() {
        api::notify_signal(&mut view, kind);
    }
}

// ===== helper functions =====

fn fanout<'a>(
    neighbors: &'a mut Neighbors,
    targets: &'a [IpAddr],
) -> impl Iterator<Item = &'a mut Neighbor> {
    neighbors.values_mut().filter(move |nbr| {
        targets.is_empty() || targets.contains(&nbr.remote_addr)
    })
}

// Applies a route change to the Adj-RIB-Out of every targeted neighbor and
// transmits the resulting UPDATE messages.
fn route_change_fanout(
    instance: &mut Instance,
    targets: &[IpAddr],
    change: Change,
    watchdog: Option<String>,
) {
    let Some((mut view, neighbors)) = instance.as_up() else {
        return;
    };

    for nbr in fanout(neighbors, targets) {
        // Routes tagged with a watchdog join the named group; while the
        // group is withdrawn, they are remembered but not advertised.
        if let Some(name) = &watchdog {
            let group = nbr.watchdogs.entry(name.clone()).or_default();
            group.routes.retain(|other| other.key() != change.key());
            group.routes.push(change.clone());
            if group.withdrawn {
                continue;
            }
        }

        nbr.adj_rib_out.enqueue(change.clone());
        flush_updates(&mut view, nbr);
    }
}

// Transmits any pending Adj-RIB-Out changes of an established session.
fn flush_updates(view: &mut InstanceUpView<'_>, nbr: &mut Neighbor) {
    if nbr.state != fsm::State::Established || !nbr.adj_rib_out.has_pending()
    {
        return;
    }

    let cxt = EncodeCxt {
        negotiated: nbr.negotiated.clone().unwrap_or_default(),
    };
    let msg_list = nbr
        .adj_rib_out
        .build_updates(&mut view.state.attr_sets, &cxt);
    if nbr.config.api.send_parsed {
        for msg in &msg_list {
            api::notify_message(view, nbr, "send", msg);
        }
    }
    if nbr.config.api.send_packets {
        for msg in &msg_list {
            api::notify_packet(view, nbr, "send", msg);
        }
    }
    nbr.message_list_send(msg_list);
}
