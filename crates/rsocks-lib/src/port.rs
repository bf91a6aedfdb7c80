//! Free port discovery

use std::net::{Ipv4Addr, TcpListener};

/// Ask the kernel for a TCP port that is free right now on the loopback interface
///
/// The probe listener is closed before returning, so another process may grab
/// the port before the caller binds it.
pub fn allocate_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_port_is_bindable() {
        let port = allocate_free_port().unwrap();
        assert_ne!(port, 0);

        // Released on return, so binding it again works
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }
}
