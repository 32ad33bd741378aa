//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic;
use std::time::Duration;

use parley_utils::socket::{OwnedReadHalf, OwnedWriteHalf, TcpListener};
use parley_utils::task::{IntervalTask, Task, TimeoutTask};
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tracing::{Instrument, debug_span, error};

use crate::debug::Debug;
use crate::error::NbrRxError;
use crate::neighbor::{Neighbor, fsm};
use crate::network;
use crate::packet::message::{
    DecodeCxt, EncodeCxt, KeepaliveMsg, Message, OpenMsg,
};

//
// BGP tasks diagram:
//                                     +--------------+
//                                     |     api      |
//                                     +--------------+
//                                           | ^
//                                           | |
//                         api_command (1x)  V | (1x) api_event
//                                     +--------------+
//                                     |              |
//                tcp_listener (1x) -> |              |
//                 tcp_connect (Nx) -> |              | -> (Nx) nbr_tx
//                      nbr_rx (Nx) -> |   instance   | -> (Nx) nbr_kalive_interval
//                   nbr_timer (Nx) -> |              |
//                                     |              |
//                                     +--------------+
//

// BGP inter-task message types.
pub mod messages {
    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use std::net::IpAddr;

        use parley_utils::socket::{TcpConnInfo, TcpStream};
        use serde::{Deserialize, Serialize};

        use crate::error::NbrRxError;
        use crate::neighbor::fsm;
        use crate::packet::message::Message;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            TcpAccept(TcpAcceptMsg),
            TcpConnect(TcpConnectMsg),
            NbrRx(NbrRxMsg),
            NbrTimer(NbrTimerMsg),
        }

        #[derive(Debug)]
        pub struct TcpAcceptMsg {
            pub stream: TcpStream,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct TcpConnectMsg {
            pub stream: TcpStream,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct NbrRxMsg {
            pub nbr_addr: IpAddr,
            pub msg: Result<Message, NbrRxError>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NbrTimerMsg {
            pub nbr_addr: IpAddr,
            pub timer: fsm::Timer,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use std::net::IpAddr;

        use serde::Serialize;

        use crate::packet::message::{Message, Negotiated};

        #[derive(Debug, Serialize)]
        pub enum NbrTxMsg {
            SendMessage {
                nbr_addr: IpAddr,
                msg: Message,
            },
            SendMessageList {
                nbr_addr: IpAddr,
                msg_list: Vec<Message>,
            },
            UpdateNegotiated(Negotiated),
        }
    }
}

// ===== BGP tasks =====

// TCP listening task.
pub(crate) fn tcp_listener(
    session_socket: &Arc<TcpListener>,
    tcp_acceptp: &Sender<messages::input::TcpAcceptMsg>,
) -> Task<()> {
    let span1 = debug_span!("session");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let session_socket = session_socket.clone();
    let tcp_acceptp = tcp_acceptp.clone();
    Task::spawn(
        async move {
            let _ = network::listen_loop(session_socket, tcp_acceptp).await;
        }
        .in_current_span(),
    )
}

// TCP connect task.
//
// A single connection attempt is made; the FSM's connect-retry timer drives
// subsequent attempts with its exponential backoff.
pub(crate) fn tcp_connect(
    nbr: &Neighbor,
    tcp_connectp: &Sender<messages::input::TcpConnectMsg>,
) -> Task<()> {
    let span = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span_guard = span.enter();

    let remote_addr = nbr.remote_addr;
    let local_addr = nbr.config.transport.local_addr;
    let ttl = nbr.tx_ttl();
    let ttl_security = nbr.config.transport.ttl_security;
    let tcp_mss = nbr.config.transport.tcp_mss;
    let tcp_password = nbr.config.transport.md5_key.clone();
    let tcp_ao_key = nbr.config.transport.ao_key.clone();
    let tcp_connectp = tcp_connectp.clone();
    Task::spawn(
        async move {
            let result = network::connect(
                remote_addr,
                local_addr,
                ttl,
                ttl_security,
                tcp_mss,
                &tcp_password,
                &tcp_ao_key,
            )
            .await;

            match result {
                Ok((stream, conn_info)) => {
                    // Send message to the parent BGP task.
                    let msg = messages::input::TcpConnectMsg {
                        stream,
                        conn_info,
                    };
                    let _ = tcp_connectp.send(msg).await;
                }
                Err(error) => {
                    error.log();
                }
            }
        }
        .in_current_span(),
    )
}

// Neighbor TCP Rx task.
pub(crate) fn nbr_rx(
    nbr: &Neighbor,
    cxt: DecodeCxt,
    local_open: OpenMsg,
    read_half: OwnedReadHalf,
    nbr_msg_rxp: &Sender<messages::input::NbrRxMsg>,
) -> Task<()> {
    let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let nbr_addr = nbr.remote_addr;
    let nbr_msg_rxp = nbr_msg_rxp.clone();

    // Spawn a supervised task for this neighbor.
    //
    // The TCP read loop runs inside an inner supervised task, which lets us
    // catch panics (for example, from malformed or malicious input) and
    // handle them gracefully. Rather than propagating the panic, we treat
    // it as if the TCP connection was closed, containing the failure.
    Task::spawn(
        async move {
            let worker_task = {
                let nbr_msg_rxp = nbr_msg_rxp.clone();
                Task::spawn(async move {
                    let _ = network::nbr_read_loop(
                        read_half,
                        nbr_addr,
                        cxt,
                        local_open,
                        nbr_msg_rxp,
                    )
                    .await;
                })
            };
            if let Err(error) = worker_task.await
                && error.is_panic()
            {
                error!(%error, "task panicked");
                let msg = messages::input::NbrRxMsg {
                    nbr_addr,
                    msg: Err(NbrRxError::TcpConnClosed),
                };
                let _ = nbr_msg_rxp.send(msg).await;
            }
        }
        .in_current_span(),
    )
}

// Neighbor TCP Tx task.
pub(crate) fn nbr_tx(
    nbr: &Neighbor,
    cxt: EncodeCxt,
    write_half: OwnedWriteHalf,
    msg_txc: UnboundedReceiver<messages::output::NbrTxMsg>,
) -> Task<()> {
    let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            network::nbr_write_loop(write_half, cxt, msg_txc).await;
        }
        .in_current_span(),
    )
}

// Neighbor timer task.
pub(crate) fn nbr_timer(
    nbr: &Neighbor,
    timer: fsm::Timer,
    seconds: u16,
    nbr_timerp: &Sender<messages::input::NbrTimerMsg>,
) -> TimeoutTask {
    let nbr_timerp = nbr_timerp.clone();
    let nbr_addr = nbr.remote_addr;

    TimeoutTask::new(
        Duration::from_secs(seconds.into()),
        move || async move {
            let msg = messages::input::NbrTimerMsg { nbr_addr, timer };
            let _ = nbr_timerp.send(msg).await;
        },
    )
}

// Send periodic keepalive messages.
pub(crate) fn nbr_kalive_interval(
    nbr: &Neighbor,
    interval: u16,
) -> IntervalTask {
    let msg_txp = nbr.msg_txp.as_ref().unwrap().clone();
    let nbr_addr = nbr.remote_addr;
    let msg_counter = nbr.statistics.msgs_sent.total.clone();

    IntervalTask::new(
        Duration::from_secs(interval.into()),
        false,
        move || {
            let msg_txp = msg_txp.clone();
            let msg_counter = msg_counter.clone();

            async move {
                let msg = Message::Keepalive(KeepaliveMsg {});
                Debug::NbrMsgTx(&nbr_addr, &msg).log();

                let msg = messages::output::NbrTxMsg::SendMessage {
                    nbr_addr,
                    msg,
                };
                let _ = msg_txp.send(msg);
                msg_counter.fetch_add(1, atomic::Ordering::Relaxed);
            }
        },
    )
}
