//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

use serde::{Deserialize, Serialize};
pub use socket2::Socket;
pub use tokio::net::{
    TcpListener, TcpSocket, TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf,
};

// Maximum TTL for IPv4 or Hop Limit for IPv6.
pub const TTL_MAX: u8 = 255;

// Socket option for installing a TCP-AO key (linux/tcp.h).
const TCP_AO_ADD_KEY: c_int = 38;

// TCP connection information.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// TCP-AO key parameters (RFC 5925). The key itself is opaque and handed
// verbatim to the kernel.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TcpAoKey {
    pub algorithm: String,
    pub send_id: u8,
    pub recv_id: u8,
    pub key: Vec<u8>,
}

// FFI struct used to set the TCP_MD5SIG socket option.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct tcp_md5sig {
    pub tcpm_addr: nix::sys::socket::SockaddrStorage,
    pub tcpm_flags: u8,
    pub tcpm_prefixlen: u8,
    pub tcpm_keylen: u16,
    pub __tcpm_pad: u32,
    pub tcpm_key: [u8; 108],
}

// FFI struct used to set the TCP_AO_ADD_KEY socket option.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct tcp_ao_add {
    pub tcpa_addr: nix::sys::socket::SockaddrStorage,
    pub tcpa_alg_name: [u8; 64],
    pub tcpa_ifindex: i32,
    pub tcpa_flags: u32,
    pub __tcpa_reserved: u16,
    pub tcpa_prefix: u8,
    pub tcpa_sndid: u8,
    pub tcpa_rcvid: u8,
    pub tcpa_maclen: u8,
    pub tcpa_keyflags: u8,
    pub tcpa_keylen: u8,
    pub tcpa_key: [u8; 80],
}

// Useful type definition.
type Result<T> = std::io::Result<T>;

// Extension methods for all socket types.
pub trait SocketExt: Sized + AsRawFd {
    // Sets the value of the IP_TOS option for this socket.
    fn set_ipv4_tos(&self, tos: u8) -> Result<()> {
        let optval = tos as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TOS,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_MINTTL option for this socket.
    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MINTTL,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TTL,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_TCLASS option for this socket.
    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()> {
        let optval = dscp as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_TCLASS,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_MINHOPCOUNT option for this socket.
    fn set_ipv6_min_hopcount(&self, hopcount: u8) -> Result<()> {
        let optval = hopcount as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_MINHOPCOUNT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_UNICAST_HOPS option for this socket.
    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()> {
        let optval = hops as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }
}

// Extension methods for TcpSocket, TcpListener and TcpStream.
pub trait TcpSocketExt: SocketExt {
    // Sets the value of the IPV6_V6ONLY option for this socket.
    fn set_ipv6_only(&self, enable: bool) -> Result<()> {
        let optval = enable as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_V6ONLY,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the TCP_MD5SIG option for this socket.
    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()> {
        let dst = SocketAddr::from((*dst, 0));
        let mut optval = tcp_md5sig {
            tcpm_addr: dst.into(),
            tcpm_flags: 0,
            tcpm_prefixlen: 0,
            tcpm_keylen: 0,
            __tcpm_pad: 0,
            tcpm_key: [0; 108],
        };
        if let Some(password) = password {
            optval.tcpm_keylen = password.len() as u16;
            optval.tcpm_key[..password.len()]
                .copy_from_slice(password.as_bytes());
        }

        setsockopt(
            self,
            libc::IPPROTO_TCP,
            libc::TCP_MD5SIG,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<tcp_md5sig>() as libc::socklen_t,
        )
    }

    // Installs a TCP-AO key for the given destination.
    fn set_ao_key(&self, dst: &IpAddr, ao_key: &TcpAoKey) -> Result<()> {
        let dst = SocketAddr::from((*dst, 0));
        let mut optval = tcp_ao_add {
            tcpa_addr: dst.into(),
            tcpa_alg_name: [0; 64],
            tcpa_ifindex: 0,
            tcpa_flags: 0,
            __tcpa_reserved: 0,
            tcpa_prefix: 0,
            tcpa_sndid: ao_key.send_id,
            tcpa_rcvid: ao_key.recv_id,
            tcpa_maclen: 0,
            tcpa_keyflags: 0,
            tcpa_keylen: ao_key.key.len().min(80) as u8,
            tcpa_key: [0; 80],
        };
        let alg_len = ao_key.algorithm.len().min(63);
        optval.tcpa_alg_name[..alg_len]
            .copy_from_slice(&ao_key.algorithm.as_bytes()[..alg_len]);
        let key_len = ao_key.key.len().min(80);
        optval.tcpa_key[..key_len].copy_from_slice(&ao_key.key[..key_len]);

        setsockopt(
            self,
            libc::IPPROTO_TCP,
            TCP_AO_ADD_KEY,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<tcp_ao_add>() as libc::socklen_t,
        )
    }

    // Sets the value of the TCP_MAXSEG option on this socket.
    fn set_mss(&self, mss: u32) -> Result<()> {
        let optval = mss as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::TCP_MAXSEG,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }
}

// Extension methods for TcpStream.
pub trait TcpStreamExt: TcpSocketExt {
    // Returns address and port information about the TCP connection.
    fn conn_info(&self) -> Result<TcpConnInfo>;
}

// ===== impl TcpSocket =====

impl SocketExt for TcpSocket {}

impl TcpSocketExt for TcpSocket {}

// ===== impl TcpStream =====

impl SocketExt for TcpStream {}

impl TcpSocketExt for TcpStream {}

impl TcpStreamExt for TcpStream {
    fn conn_info(&self) -> Result<TcpConnInfo> {
        let local_addr = self.local_addr()?;
        let remote_addr = self.peer_addr()?;

        Ok(TcpConnInfo {
            local_addr: local_addr.ip(),
            local_port: local_addr.port(),
            remote_addr: remote_addr.ip(),
            remote_port: remote_addr.port(),
        })
    }
}

// ===== impl TcpListener =====

impl SocketExt for TcpListener {}

impl TcpSocketExt for TcpListener {}

// ===== global functions =====

fn setsockopt<F: AsRawFd>(
    sock: &F,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(sock.as_raw_fd(), level, optname, optval, optlen)
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}
