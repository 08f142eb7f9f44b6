//! Process-wide port allocation. Concurrent servers asking for the same
//! preferred port must not both get it; the second caller falls back to an
//! ephemeral port instead of failing at bind time.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{Mutex, OnceLock};

static TAKEN: OnceLock<Mutex<HashSet<u16>>> = OnceLock::new();

fn taken() -> &'static Mutex<HashSet<u16>> {
    TAKEN.get_or_init(|| Mutex::new(HashSet::new()))
}

pub struct PortAllocator;

impl PortAllocator {
    /// Resolve a usable localhost port. A preferred port is granted at most
    /// once per process; when it is already handed out or the OS refuses
    /// it, an ephemeral port is probed instead. Errors only when the OS
    /// yields nothing at all.
    pub fn get(preferred: Option<u16>) -> Result<u16, String> {
        let mut guard = taken().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(port) = preferred {
            if port != 0 && !guard.contains(&port) && probe(port).is_some() {
                guard.insert(port);
                return Ok(port);
            }
        }
        let port = probe(0).ok_or_else(|| "no free port available".to_string())?;
        guard.insert(port);
        Ok(port)
    }

    /// Return a port to the pool so a later server may claim it again.
    pub fn release(port: u16) {
        taken()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&port);
    }
}

fn probe(port: u16) -> Option<u16> {
    let listener = TcpListener::bind(("127.0.0.1", port)).ok()?;
    listener.local_addr().ok().map(|addr| addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_allocation() {
        let port = PortAllocator::get(None).unwrap();
        assert_ne!(port, 0);
        PortAllocator::release(port);
    }

    #[test]
    fn test_preferred_port_granted_once() {
        let first = PortAllocator::get(None).unwrap();
        PortAllocator::release(first);
        // first is free again at the OS level; claim it as a preference
        let claimed = PortAllocator::get(Some(first)).unwrap();
        assert_eq!(claimed, first);

        let second = PortAllocator::get(Some(first)).unwrap();
        assert_ne!(second, first);

        PortAllocator::release(claimed);
        PortAllocator::release(second);
    }

    #[test]
    fn test_release_makes_port_claimable_again() {
        let port = PortAllocator::get(None).unwrap();
        PortAllocator::release(port);
        let again = PortAllocator::get(Some(port)).unwrap();
        assert_eq!(again, port);
        PortAllocator::release(again);
    }
}
