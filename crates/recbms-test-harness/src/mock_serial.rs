//! Mock transport for deterministic testing of the protocol stack.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. This lets you test frame encoding, stream
//! reassembly, and command correlation without real hardware.
//!
//! Because the correlation engine takes ownership of its transport, the
//! mock exposes a cloneable [`MockHandle`] that shares state with the
//! transport. Tests keep the handle to load expectations, inject
//! unsolicited bytes, and inspect the sent log after the transport has
//! been moved into the engine task.
//!
//! # Example
//!
//! ```
//! use recbms_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! let handle = mock.handle();
//! // Pre-load: when the engine sends this request, return this response.
//! handle.expect(&[0x55, 0x02, 0x00, 0x05, b'S', b'E', b'R', b'I', b'?', 0xDD, 0xC6, 0xAA],
//!               &[0x55, 0x02, 0x00, 0x02, b'O', b'K', 0x07, 0xAC, 0xAA]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recbms_core::error::{Error, Result};
use recbms_core::transport::Transport;

/// How often `receive()` re-checks the shared queue while waiting for data.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to queue for `receive()` when the matching request arrives.
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes pending delivery through `receive()`.
    pending: VecDeque<u8>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

/// A mock [`Transport`] for testing the protocol stack without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; the paired
/// response bytes are then delivered by subsequent `receive()` calls
/// (possibly split across several reads if the caller's buffer is small).
///
/// `receive()` honors its timeout: with no pending bytes it waits until
/// data is injected or the deadline passes, then returns
/// [`Error::Timeout`]. Under tokio's paused test clock this makes
/// deadline-driven engine tests deterministic.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

/// Cloneable handle to a [`MockTransport`]'s shared state.
///
/// Lets a test keep driving and inspecting the mock after the transport
/// itself has been boxed and moved into the engine task.
#[derive(Debug, Clone)]
pub struct MockHandle {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                pending: VecDeque::new(),
                connected: true,
                sent_log: Vec::new(),
            })),
        }
    }

    /// Return a handle sharing this transport's state.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Add an expected request/response pair. See [`MockHandle::expect`].
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.handle().expect(request, response);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, the `response`
    /// bytes become available to subsequent `receive()` calls.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Inject bytes for delivery by `receive()` without requiring a send.
    ///
    /// Used to simulate unsolicited device traffic and responses that
    /// trickle in across multiple reads.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().pending.extend(bytes.iter().copied());
    }

    /// Return a copy of all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls
    /// return [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if !state.connected {
            return Err(Error::NotConnected);
        }

        // Record what was sent.
        state.sent_log.push(data.to_vec());

        // Match against the next expectation.
        if let Some(expectation) = state.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Transport(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
            state.pending.extend(expectation.response.iter().copied());
            Ok(())
        } else {
            Err(Error::Transport(
                "no more expectations in mock transport".into(),
            ))
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if !state.connected {
                    return Err(Error::NotConnected);
                }
                if !state.pending.is_empty() {
                    let n = state.pending.len().min(buf.len());
                    for slot in buf.iter_mut().take(n) {
                        // Guarded by the is_empty check above.
                        *slot = state.pending.pop_front().unwrap_or_default();
                    }
                    return Ok(n);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL).await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.connected = false;
        state.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recbms_core::transport::Transport;

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        let request = &[0x55, 0x02, 0x00, 0x01, b'A', 0x00, 0x00, 0xAA];
        let response = &[0x55, 0x01, 0x00, 0x01, b'B', 0x00, 0x00, 0xAA];

        mock.expect(request, response);

        mock.send(request).await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(n, response.len());
        assert_eq!(&buf[..n], response);
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        let req1 = &[0x01, 0x02];
        let req2 = &[0x03, 0x04];

        handle.expect(req1, &[0xFF]);
        handle.expect(req2, &[0xFE]);

        mock.send(req1).await.unwrap();
        mock.send(req2).await.unwrap();

        assert_eq!(handle.sent_data().len(), 2);
        assert_eq!(handle.sent_data()[0], req1);
        assert_eq!(handle.sent_data()[1], req2);
    }

    #[tokio::test]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x01], &[0xFF]);

        let result = mock.send(&[0x99]).await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test]
    async fn mock_transport_no_expectations_errors() {
        let mut mock = MockTransport::new();

        let result = mock.send(&[0x01]).await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_receive_without_data_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 64];

        let start = tokio::time::Instant::now();
        let result = mock.receive(&mut buf, Duration::from_millis(50)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn mock_transport_inject_unsolicited() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        handle.inject(&[0xAB, 0xCD]);

        let mut buf = [0u8; 8];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &[0xAB, 0xCD]);
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(&[0x01]).await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));
    }

    #[tokio::test]
    async fn mock_transport_set_connected() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.set_connected(false);
        assert!(!mock.is_connected());

        let result = mock.send(&[0x01]).await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));
    }

    #[tokio::test]
    async fn mock_transport_remaining_expectations() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.expect(&[0x01], &[0xFF]);
        handle.expect(&[0x02], &[0xFE]);
        assert_eq!(handle.remaining_expectations(), 2);

        mock.send(&[0x01]).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 1);

        mock.send(&[0x02]).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        let request = &[0x01];
        let response = &[0xAA, 0xBB, 0xCC, 0xDD];
        mock.expect(request, response);

        mock.send(request).await.unwrap();

        // Read with a buffer smaller than the response.
        let mut buf = [0u8; 2];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);

        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], &[0xCC, 0xDD]);
    }

    #[tokio::test]
    async fn mock_transport_receive_waits_for_injection() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let injector = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.inject(&[0x42]);
        });

        let mut buf = [0u8; 8];
        let n = mock
            .receive(&mut buf, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &[0x42]);
        injector.await.unwrap();
    }
}
