use nix::ifaddrs::getifaddrs;
use rand::Rng;

/// Uses the `getifaddrs` call to retrieve a list of network interfaces on the
/// host device and returns the MAC address of the named interface, or the
/// first non-zero MAC listed if no name was specified.
fn get_mac(name: Option<&str>) -> Option<[u8; 6]> {
    let Ok(ifiter) = getifaddrs() else {
        return None;
    };

    for interface in ifiter {
        let Some(bytes) = interface
            .address
            .as_ref()
            .and_then(|addr| addr.as_link_addr())
            .and_then(|link| link.addr())
        else {
            continue;
        };

        // If an interface name is specified, only return the corresponding
        // MAC; otherwise return the first non-zero MAC
        if let Some(name) = name {
            if interface.interface_name == name {
                return Some(bytes);
            }
        } else if bytes.iter().any(|&x| x != 0) {
            return Some(bytes);
        }
    }

    None
}

/// Stable hardware identity used for the reserved `device` tag.
pub fn device_id() -> String {
    // Try to get MAC address based on interface list (in order)
    const IFN_PRIORITY: &[&str] = &["eth0", "en0", "eth1", "en1", "em0", "em1", "wlan0", "wlan1"];

    for ifn in IFN_PRIORITY {
        if let Some(address) = get_mac(Some(ifn)) {
            return hex::encode(address);
        }
    }

    // If not successful, get MAC of any available interface
    if let Some(address) = get_mac(None) {
        return hex::encode(address);
    }

    // If not available, generate a random ID with an "ff" prefix
    let mut randmac = [0u8; 5];
    rand::thread_rng().fill(&mut randmac[..]);
    format!("ff{}", hex::encode(randmac))
}
