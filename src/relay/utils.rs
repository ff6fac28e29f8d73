use crate::{error::AppError, r#const::relay_limits};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::Error;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{TcpListener, UdpSocket};
use tracing::debug;

fn socket_error(addr: SocketAddr, e: std::io::Error) -> AppError {
    AppError::Io(Error::new(e.kind(), format!("{}: {}", addr, e)))
}

/// 创建 TCP 监听器
///
/// 只设置 SO_REUSEADDR，保证同一端点同一时刻只有一个监听者。
pub fn create_tcp_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, AppError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket =
        Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|e| socket_error(addr, e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| socket_error(addr, e))?;

    socket
        .bind(&addr.into())
        .map_err(|e| socket_error(addr, e))?;

    socket.listen(backlog).map_err(|e| socket_error(addr, e))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| socket_error(addr, e))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(AppError::Io)
}

/// 创建 UDP 监听套接字
pub fn create_udp_socket(addr: SocketAddr) -> Result<UdpSocket, AppError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket =
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| socket_error(addr, e))?;

    socket
        .bind(&addr.into())
        .map_err(|e| socket_error(addr, e))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| socket_error(addr, e))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(AppError::Io)
}

/// 本机出口地址
///
/// 向一个外部地址 "连接" 无连接套接字，读回系统选择的本地地址；不会真的发送数据。
pub fn outbound_local_ip() -> Result<IpAddr, AppError> {
    let socket = std::net::UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))?;
    socket.connect(relay_limits::OUTBOUND_PROBE_ADDR)?;
    let ip = socket.local_addr()?.ip();
    debug!("Detected outbound-routable address {}", ip);
    Ok(ip)
}

/// 解析监听地址：显式地址直接解析，未设置时使用本机出口地址
pub fn resolve_bind_addr(address: Option<&str>, port: u16) -> Result<SocketAddr, AppError> {
    let ip = match address {
        Some(address) => address.trim().parse::<IpAddr>().map_err(|e| {
            AppError::Config(format!("Invalid listening address {:?}: {}", address, e))
        })?,
        None => outbound_local_ip()?,
    };
    Ok(SocketAddr::new(ip, port))
}

/// 与远端地址族一致的临时绑定地址
pub(crate) fn ephemeral_bind_addr(distant: &SocketAddr) -> SocketAddr {
    match distant {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}
