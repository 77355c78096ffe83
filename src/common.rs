// SPDX-License-Identifier: Apache-2.0

//! Real-time posture helpers (§1.1): advisory `SCHED_FIFO` priority and a
//! larger `SO_RCVBUF` for the LIDAR packet-reading thread. Best-effort on
//! Linux, a no-op everywhere else; failures are logged at `warn`, never
//! propagated.

use tokio::net::UdpSocket;
use tracing::warn;

/// Request `SCHED_FIFO` real-time scheduling for the calling thread.
#[cfg(target_os = "linux")]
pub fn set_process_priority() {
    let mut param = libc::sched_param { sched_priority: 10 };
    let tid = unsafe { libc::pthread_self() };
    let err = unsafe {
        libc::pthread_setschedparam(tid, libc::SCHED_FIFO, &mut param as *mut libc::sched_param)
    };
    if err != 0 {
        let err = std::io::Error::last_os_error();
        warn!("unable to set lidar-reader real-time fifo scheduler: {err}");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_process_priority() {}

/// Enlarge a UDP socket's receive buffer to `size` bytes.
#[cfg(target_os = "linux")]
pub fn set_socket_bufsize(socket: UdpSocket, size: usize) -> UdpSocket {
    use std::os::fd::{FromRawFd, IntoRawFd};

    let std_socket = socket.into_std().expect("socket must be convertible to std");
    let fd = std_socket.into_raw_fd();
    let size = size as libc::c_int;
    let err = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of_val(&size) as libc::socklen_t,
        )
    };
    if err != 0 {
        warn!("setsockopt SO_RCVBUF failed: {}", std::io::Error::last_os_error());
    }
    let std_socket = unsafe { std::net::UdpSocket::from_raw_fd(fd) };
    std_socket.set_nonblocking(true).expect("set_nonblocking");
    UdpSocket::from_std(std_socket).expect("socket must be convertible back to tokio")
}

#[cfg(not(target_os = "linux"))]
pub fn set_socket_bufsize(socket: UdpSocket, _size: usize) -> UdpSocket {
    socket
}
