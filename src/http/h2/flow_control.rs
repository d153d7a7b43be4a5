//! HTTP/2 flow control
//!
//! Flow control as defined in RFC 7540 Section 5.2. Each stream and the
//! connection itself own a [`FlowControl`] pair: a send window that the
//! peer's WINDOW_UPDATE frames grow and our DATA shrinks, and a receive
//! window that the peer's DATA shrinks and our WINDOW_UPDATE frames refill.

use super::error::{Error, Result};
use super::settings::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// Flow control window
///
/// The size is signed: a SETTINGS_INITIAL_WINDOW_SIZE reduction can push a
/// send window below zero (RFC 7540 Section 6.9.2).
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    initial_size: u32,
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Bytes that may be sent right now
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    /// Check if window can send specified amount
    pub fn can_send(&self, amount: usize) -> bool {
        self.current_size >= amount as i64
    }

    /// Take up to `amount` bytes of capacity
    ///
    /// Returns what was actually granted, which is 0 when the window is
    /// exhausted.
    pub fn consume(&mut self, amount: usize) -> usize {
        let granted = amount.min(self.available());
        self.current_size -= granted as i64;
        granted
    }

    /// Grow the window (WINDOW_UPDATE)
    ///
    /// Growing past 2^31-1 is a FLOW_CONTROL_ERROR (RFC 7540 Section 6.9.1).
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        let new_size = self.current_size + increment as i64;
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Shrink the window unconditionally
    pub fn decrease(&mut self, amount: usize) {
        self.current_size -= amount as i64;
    }

    /// Apply a new initial window size from SETTINGS
    ///
    /// The difference between old and new initial size is added to the
    /// current size.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Send and receive windows of one stream or of the connection
#[derive(Debug, Clone)]
pub struct FlowControl {
    send_window: FlowControlWindow,
    recv_window: FlowControlWindow,
}

impl FlowControl {
    /// Create with the given initial window sizes
    pub fn new(send_size: u32, recv_size: u32) -> Self {
        FlowControl {
            send_window: FlowControlWindow::with_initial_size(send_size),
            recv_window: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send_window
    }

    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv_window
    }

    /// Take up to `amount` bytes of send capacity
    pub fn consume_send_window(&mut self, amount: usize) -> usize {
        self.send_window.consume(amount)
    }

    /// Peer granted more send credit
    pub fn increase_send_window(&mut self, increment: u32) -> Result<i64> {
        self.send_window.increase(increment)
    }

    /// Account for `amount` inbound bytes
    ///
    /// A peer that sends more than the window allows violates flow control.
    pub fn consume_recv_window(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.recv_window.size() {
            return Err(Error::FlowControl(format!(
                "received {} bytes with only {} bytes of window",
                amount,
                self.recv_window.size()
            )));
        }
        self.recv_window.decrease(amount);
        Ok(())
    }

    /// Increment to send once the receive window fell below half its
    /// initial size
    pub fn should_send_window_update(&self) -> Option<u32> {
        let recv_size = self.recv_window.size();
        let initial_size = self.recv_window.initial_size() as i64;

        if recv_size < initial_size / 2 {
            Some((initial_size - recv_size) as u32)
        } else {
            None
        }
    }

    /// We sent WINDOW_UPDATE; refill the receive window
    pub fn send_window_update(&mut self, increment: u32) -> Result<i64> {
        self.recv_window.increase(increment)
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::error::ErrorCode;

    #[test]
    fn test_flow_control_window_consume() {
        let mut window = FlowControlWindow::with_initial_size(100);
        assert_eq!(window.consume(50), 50);
        assert_eq!(window.size(), 50);

        assert_eq!(window.consume(60), 50);
        assert_eq!(window.size(), 0);

        assert_eq!(window.consume(10), 0);
        assert!(!window.can_send(1));
    }

    #[test]
    fn test_flow_control_window_increase() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);
        assert_eq!(window.increase(100).unwrap(), 150);
    }

    #[test]
    fn test_flow_control_window_overflow() {
        let mut window = FlowControlWindow::with_initial_size(0x7FFF_FFFF);
        let err = window.increase(1).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn test_update_initial_size() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);

        window.update_initial_size(200).unwrap();
        assert_eq!(window.initial_size(), 200);
        assert_eq!(window.size(), 150);

        // shrinking may go negative
        window.consume(150);
        window.update_initial_size(50).unwrap();
        assert_eq!(window.size(), -150);
        assert_eq!(window.available(), 0);

        // -150 + (2^31-1 - 50) leaves 200 of headroom
        assert!(window.update_initial_size(0x7FFF_FFFF).is_ok());
        assert_eq!(window.size(), 0x7FFF_FFFF - 200);
        assert!(window.increase(201).is_err());
        assert_eq!(window.increase(200).unwrap(), 0x7FFF_FFFF);
    }

    #[test]
    fn test_recv_window_violation() {
        let mut flow = FlowControl::new(100, 100);
        flow.consume_recv_window(60).unwrap();
        let err = flow.consume_recv_window(41).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FlowControlError);
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_should_send_window_update() {
        let mut flow = FlowControl::new(100, 100);
        assert_eq!(flow.should_send_window_update(), None);

        flow.consume_recv_window(40).unwrap();
        assert_eq!(flow.should_send_window_update(), None);

        flow.consume_recv_window(20).unwrap();
        assert_eq!(flow.should_send_window_update(), Some(60));

        flow.send_window_update(60).unwrap();
        assert_eq!(flow.recv_window().size(), 100);
        assert_eq!(flow.should_send_window_update(), None);
    }

    #[test]
    fn test_send_side() {
        let mut flow = FlowControl::default();
        assert_eq!(flow.consume_send_window(70_000), 65_535);
        assert_eq!(flow.consume_send_window(1), 0);
        flow.increase_send_window(10).unwrap();
        assert_eq!(flow.send_window().available(), 10);
    }
}
