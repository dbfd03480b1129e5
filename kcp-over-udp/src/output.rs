//! Output sink for flushed datagrams.
//!
//! The control block never touches a socket.  During a flush it calls
//! [`Output::output`] synchronously, once per packed datagram.  The slice
//! starts with `reserved` bytes (zeroed by the engine) that the owner may
//! overwrite with its own framing before sending; the segments follow.
//!
//! The sink is fire-and-forget: it must not block indefinitely and there is
//! no delivery feedback other than the protocol's own acknowledgements.

use std::collections::VecDeque;

pub trait Output {
    fn output(&mut self, datagram: &mut [u8]);
}

impl<F> Output for F
where
    F: FnMut(&mut [u8]),
{
    fn output(&mut self, datagram: &mut [u8]) {
        self(datagram)
    }
}

/// Collects datagrams for the owner to drain later.
impl Output for VecDeque<Vec<u8>> {
    fn output(&mut self, datagram: &mut [u8]) {
        self.push_back(datagram.to_vec());
    }
}
