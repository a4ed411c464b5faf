//! 按网卡名选择监听地址（例如绑定到 VPN 的 `tun0`）。

use std::io;
use std::net::IpAddr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub ip: IpAddr,
}

/// 本机所有网卡地址，按名称排序，同名时 IPv4 在前。
pub fn list_interfaces() -> io::Result<Vec<NetInterface>> {
    let mut interfaces: Vec<NetInterface> = if_addrs::get_if_addrs()?
        .into_iter()
        .map(|iface| NetInterface {
            ip: iface.ip(),
            name: iface.name,
        })
        .collect();
    interfaces.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then(a.ip.is_ipv6().cmp(&b.ip.is_ipv6()))
    });
    Ok(interfaces)
}

/// 指定网卡的地址，优先 IPv4。
pub fn address_of(interfaces: &[NetInterface], name: &str) -> Option<IpAddr> {
    let mut matching = interfaces.iter().filter(|iface| iface.name == name);
    let first = matching.next()?.ip;
    if first.is_ipv4() {
        return Some(first);
    }
    Some(
        matching
            .map(|iface| iface.ip)
            .find(IpAddr::is_ipv4)
            .unwrap_or(first),
    )
}

/// 网卡名解析为监听地址；找不到时错误信息列出可用网卡。
pub fn resolve_interface(name: &str) -> io::Result<IpAddr> {
    let interfaces = list_interfaces()?;
    address_of(&interfaces, name).ok_or_else(|| {
        let mut available: Vec<&str> =
            interfaces.iter().map(|iface| iface.name.as_str()).collect();
        available.dedup();
        io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "interface {name} not found (available: {})",
                available.join(", ")
            ),
        )
    })
}

pub fn describe(interfaces: &[NetInterface]) -> String {
    let width = interfaces
        .iter()
        .map(|iface| iface.name.len())
        .max()
        .unwrap_or(0);
    let mut output = String::from("Network interfaces:");
    for iface in interfaces {
        output.push_str(&format!("\n  {:<width$}  {}", iface.name, iface.ip));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn iface(name: &str, ip: IpAddr) -> NetInterface {
        NetInterface {
            name: name.to_string(),
            ip,
        }
    }

    #[test]
    fn address_of_prefers_ipv4() {
        let interfaces = vec![
            iface("eth0", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))),
            iface("tun0", IpAddr::V6("fe80::1".parse::<Ipv6Addr>().unwrap())),
            iface("tun0", IpAddr::V4(Ipv4Addr::new(10, 10, 14, 2))),
            iface("wg0", IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ];
        assert_eq!(
            address_of(&interfaces, "tun0"),
            Some(IpAddr::V4(Ipv4Addr::new(10, 10, 14, 2)))
        );
        assert_eq!(
            address_of(&interfaces, "wg0"),
            Some(IpAddr::V6(Ipv6Addr::LOCALHOST))
        );
        assert_eq!(address_of(&interfaces, "tun1"), None);
    }

    #[test]
    fn describe_aligns_names() {
        let interfaces = vec![
            iface("lo", IpAddr::V4(Ipv4Addr::LOCALHOST)),
            iface("tun0", IpAddr::V4(Ipv4Addr::new(10, 10, 14, 2))),
        ];
        assert_eq!(
            describe(&interfaces),
            "Network interfaces:\n  lo    127.0.0.1\n  tun0  10.10.14.2"
        );
    }

    #[test]
    fn unknown_interface_lists_alternatives() {
        let err = resolve_interface("no-such-iface0").expect_err("should not resolve");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("no-such-iface0"));
    }
}
