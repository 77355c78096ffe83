// SPDX-License-Identifier: Apache-2.0

//! UDP packet reception for the LIDAR input (§6.1). On Linux, uses
//! `recvmmsg` for bulk reads, the same shape `radarpub.rs`'s `port5` uses
//! for the SMS cube stream; falls back to a plain per-datagram loop
//! elsewhere.

use kanal::AsyncSender;
use tokio::net::UdpSocket;
use tracing::error;

/// Generous upper bound on one LIDAR UDP datagram; larger than any
/// Ethernet MTU so a single read always captures a full packet.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Bind a UDP socket on `bind_addr`, apply the real-time posture helpers,
/// and forward every received datagram to `tx` until the task is dropped.
#[cfg(target_os = "linux")]
pub async fn receive_packets(bind_addr: &str, tx: AsyncSender<Vec<u8>>) {
    use std::os::fd::AsRawFd;
    use std::thread;
    use std::time::Duration;

    use crate::common::{set_process_priority, set_socket_bufsize};

    const VLEN: usize = 64;
    const RETRY_TIME: Duration = Duration::from_micros(250);

    let mut mmsgs = vec![
        libc::mmsghdr {
            msg_hdr: libc::msghdr {
                msg_name: std::ptr::null_mut(),
                msg_namelen: 0,
                msg_iov: std::ptr::null_mut(),
                msg_iovlen: 0,
                msg_control: std::ptr::null_mut(),
                msg_controllen: 0,
                msg_flags: 0,
            },
            msg_len: 0,
        };
        VLEN
    ];
    let mut iovecs = vec![
        libc::iovec {
            iov_base: std::ptr::null_mut(),
            iov_len: 0,
        };
        VLEN
    ];
    let mut buf = vec![0u8; VLEN * MAX_DATAGRAM_SIZE];

    set_process_priority();
    let sock = UdpSocket::bind(bind_addr).await.expect("bind lidar udp socket");
    let sock = set_socket_bufsize(sock, 4 * 1024 * 1024);

    loop {
        for i in 0..VLEN {
            iovecs[i].iov_base = buf[i * MAX_DATAGRAM_SIZE..].as_mut_ptr() as *mut libc::c_void;
            iovecs[i].iov_len = MAX_DATAGRAM_SIZE;
            mmsgs[i].msg_hdr.msg_iov = &mut iovecs[i];
            mmsgs[i].msg_hdr.msg_iovlen = 1;
            mmsgs[i].msg_hdr.msg_name = std::ptr::null_mut();
            mmsgs[i].msg_hdr.msg_namelen = 0;
            mmsgs[i].msg_hdr.msg_control = std::ptr::null_mut();
            mmsgs[i].msg_hdr.msg_controllen = 0;
            mmsgs[i].msg_hdr.msg_flags = 0;
            mmsgs[i].msg_len = 0;
        }

        let received = unsafe {
            libc::recvmmsg(
                sock.as_raw_fd(),
                mmsgs.as_mut_ptr(),
                VLEN as u32,
                0,
                std::ptr::null_mut(),
            )
        };

        match received {
            -1 => {
                let err = std::io::Error::last_os_error();
                match err.kind() {
                    std::io::ErrorKind::Interrupted => (),
                    std::io::ErrorKind::WouldBlock => thread::sleep(RETRY_TIME),
                    _ => error!("lidar udp read error: {err:?}"),
                }
            }
            n => {
                for i in 0..n as usize {
                    let len = mmsgs[i].msg_len as usize;
                    let datagram = buf[i * MAX_DATAGRAM_SIZE..i * MAX_DATAGRAM_SIZE + len].to_vec();
                    if let Err(e) = tx.send(datagram).await {
                        error!("lidar udp channel send error: {e:?}");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub async fn receive_packets(bind_addr: &str, tx: AsyncSender<Vec<u8>>) {
    let sock = UdpSocket::bind(bind_addr).await.expect("bind lidar udp socket");
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        match sock.recv_from(&mut buf).await {
            Ok((n, _)) => {
                if let Err(e) = tx.send(buf[..n].to_vec()).await {
                    error!("lidar udp channel send error: {e:?}");
                    return;
                }
            }
            Err(e) => error!("lidar udp read error: {e:?}"),
        }
    }
}
