//! Simulated instrument transport
//!
//! `MockTransport` behaves like a simple SCPI instrument so drivers and the binding
//! layer can be exercised without hardware. It provides:
//! - A settable value store: `cmd value` stores, `cmd?` answers with the stored value
//! - Scripted responses and binary blocks per query
//! - Controllable timeouts (always, or a number before the next answer)
//! - One-shot failure injection
//! - A call log for test verification
//!
//! Every clone of the [`MockHandle`] sees the same state, so tests can keep a handle
//! after the transport itself has been moved into a device.

use super::block;
use super::{Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    values: HashMap<String, String>,
    scripted: HashMap<String, VecDeque<String>>,
    write_replies: HashMap<String, String>,
    blocks: HashMap<String, Vec<u8>>,
    pending: VecDeque<String>,
    call_log: Vec<String>,
    timeouts_before_reply: usize,
    always_timeout: bool,
    fail_next: bool,
    status_byte: u8,
    closed: bool,
    close_count: usize,
}

/// Shared view of a [`MockTransport`]'s state.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value as if the instrument had been set to it.
    pub fn set_value(&self, command: &str, value: &str) {
        self.lock()
            .values
            .insert(normalize(command), value.to_string());
    }

    /// Current stored value for a command, if any.
    pub fn value(&self, command: &str) -> Option<String> {
        self.lock().values.get(&normalize(command)).cloned()
    }

    /// Queue a response for the next time `query` (including its `?`) is issued.
    pub fn script_response(&self, query: &str, response: &str) {
        self.lock()
            .scripted
            .entry(normalize(query))
            .or_default()
            .push_back(response.to_string());
    }

    /// Emit `reply` whenever a setting command with this header is written.
    pub fn reply_to_writes(&self, command: &str, reply: &str) {
        self.lock()
            .write_replies
            .insert(normalize(command), reply.to_string());
    }

    /// Binary block payload returned for `query`.
    pub fn set_block(&self, query: &str, payload: Vec<u8>) {
        self.lock().blocks.insert(normalize(query), payload);
    }

    /// Convenience for big-endian float64 blocks.
    pub fn set_f64_block(&self, query: &str, values: &[f64]) {
        self.set_block(query, block::encode_f64_be(values));
    }

    /// Time out on the next `count` reads even if a response is pending.
    pub fn delay_replies(&self, count: usize) {
        self.lock().timeouts_before_reply = count;
    }

    /// Make every read time out.
    pub fn always_timeout(&self, enabled: bool) {
        self.lock().always_timeout = enabled;
    }

    /// Fail the next operation with an I/O error.
    pub fn trigger_failure(&self) {
        self.lock().fail_next = true;
    }

    /// Status byte reported by `status_byte()`.
    pub fn set_status_byte(&self, value: u8) {
        self.lock().status_byte = value;
    }

    /// Get a copy of the call log for verification.
    pub fn call_log(&self) -> Vec<String> {
        self.lock().call_log.clone()
    }

    /// Only the commands that were written (no reads).
    pub fn writes(&self) -> Vec<String> {
        self.lock()
            .call_log
            .iter()
            .filter_map(|entry| entry.strip_prefix("write ").map(str::to_string))
            .collect()
    }

    /// Clear the call log.
    pub fn clear_call_log(&self) {
        self.lock().call_log.clear();
    }

    /// Number of responses waiting to be read.
    pub fn pending_responses(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of times the transport was closed.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Simulated SCPI instrument.
///
/// # Example
///
/// ```
/// use labframe::transport::{MockTransport, Transport};
///
/// let mut mock = MockTransport::new();
/// mock.write("sense:freq:center 2e6").unwrap();
/// assert_eq!(mock.query("sense:freq:center?").unwrap(), "2e6");
/// ```
#[derive(Debug)]
pub struct MockTransport {
    handle: MockHandle,
    read_timeout: Duration,
}

impl MockTransport {
    /// Create a new mock instrument with default settings
    pub fn new() -> Self {
        Self {
            handle: MockHandle::default(),
            read_timeout: Duration::from_millis(1),
        }
    }

    /// Simulated duration of one timed-out read.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Handle sharing this transport's state.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn check_usable(state: &mut MockState) -> Result<(), TransportError> {
        if state.closed {
            return Err(TransportError::Closed);
        }
        if std::mem::take(&mut state.fail_next) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Mock transport failure",
            )));
        }
        Ok(())
    }

    fn timeout(&self) -> TransportError {
        std::thread::sleep(self.read_timeout);
        TransportError::Timeout(self.read_timeout)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands are matched case-insensitively with surrounding whitespace removed.
fn normalize(command: &str) -> String {
    command.trim().to_ascii_lowercase()
}

fn apply_segment(state: &mut MockState, segment: &str) {
    let segment = segment.trim();
    if segment.is_empty() {
        return;
    }
    let key = normalize(segment);

    if key.contains('?') {
        if let Some(response) = state.scripted.get_mut(&key).and_then(VecDeque::pop_front) {
            state.pending.push_back(response);
        } else if key == "*opc?" {
            state.pending.push_back("1".into());
        } else if let Some(value) = key
            .strip_suffix('?')
            .and_then(|header| state.values.get(header.trim()).cloned())
        {
            state.pending.push_back(value);
        }
        return;
    }

    let (header, argument) = match key.split_once(' ') {
        Some((header, _)) => {
            let raw_arg = segment[header.len()..].trim().to_string();
            (header.to_string(), Some(raw_arg))
        }
        None => (key.clone(), None),
    };
    if let Some(argument) = argument {
        state.values.insert(header.clone(), argument);
    }
    if let Some(reply) = state.write_replies.get(&header) {
        let reply = reply.clone();
        state.pending.push_back(reply);
    }
}

impl Transport for MockTransport {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let mut state = self.handle.lock();
        state.call_log.push(format!("write {command}"));
        Self::check_usable(&mut state)?;
        for segment in command.split(';') {
            apply_segment(&mut state, segment);
        }
        Ok(())
    }

    fn read(&mut self) -> Result<String, TransportError> {
        let mut state = self.handle.lock();
        state.call_log.push("read".into());
        Self::check_usable(&mut state)?;
        if state.always_timeout || state.pending.is_empty() {
            drop(state);
            return Err(self.timeout());
        }
        if state.timeouts_before_reply > 0 {
            state.timeouts_before_reply -= 1;
            drop(state);
            return Err(self.timeout());
        }
        state.pending.pop_front().ok_or(TransportError::Closed)
    }

    fn query_block(&mut self, command: &str) -> Result<Vec<u8>, TransportError> {
        let mut state = self.handle.lock();
        state.call_log.push(format!("write {command}"));
        Self::check_usable(&mut state)?;
        let payload = state.blocks.get(&normalize(command)).cloned();
        drop(state);
        payload.ok_or_else(|| self.timeout())
    }

    fn status_byte(&mut self) -> Result<u8, TransportError> {
        let mut state = self.handle.lock();
        state.call_log.push("status_byte".into());
        Self::check_usable(&mut state)?;
        Ok(state.status_byte)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.handle.lock();
        if !state.closed {
            state.closed = true;
            state.close_count += 1;
            state.call_log.push("close".into());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MockTransport (read timeout: {:?})", self.read_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_query_returns_value() {
        let mut mock = MockTransport::new();
        mock.write("SENSE:CORR:WAV 1550.0").unwrap();
        assert_eq!(mock.query("sense:corr:wav?").unwrap(), "1550.0");
    }

    #[test]
    fn compound_commands_are_split() {
        let mut mock = MockTransport::new();
        mock.write("initiate:immediate;*OPC?").unwrap();
        assert_eq!(mock.read().unwrap(), "1");
    }

    #[test]
    fn unanswered_read_times_out() {
        let mut mock = MockTransport::new();
        assert!(matches!(mock.read(), Err(TransportError::Timeout(_))));
    }

    #[test]
    fn delayed_reply_times_out_first() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.delay_replies(2);
        mock.write("*OPC?").unwrap();
        assert!(mock.read().is_err());
        assert!(mock.read().is_err());
        assert_eq!(mock.read().unwrap(), "1");
    }

    #[test]
    fn scripted_responses_take_priority() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.set_value("inst:sel", "SA");
        handle.script_response("inst:sel?", "BASIC");
        assert_eq!(mock.query("inst:sel?").unwrap(), "BASIC");
        assert_eq!(mock.query("inst:sel?").unwrap(), "SA");
    }

    #[test]
    fn failure_is_one_shot() {
        let mut mock = MockTransport::new();
        mock.handle().trigger_failure();
        assert!(matches!(mock.write("*CLS"), Err(TransportError::Io(_))));
        assert!(mock.write("*CLS").is_ok());
    }

    #[test]
    fn blocks_and_close() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.set_f64_block("trace:data? trace1", &[1.0, 2.0]);
        let values = mock
            .query_binary("trace:data? trace1", block::NumericType::F64, block::ByteOrder::Big)
            .unwrap();
        assert_eq!(values, vec![1.0, 2.0]);

        mock.close().unwrap();
        mock.close().unwrap();
        assert_eq!(handle.close_count(), 1);
        assert!(matches!(mock.write("*CLS"), Err(TransportError::Closed)));
    }

    #[test]
    fn call_log_records_writes() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.write("*CLS").unwrap();
        let _ = mock.read();
        assert_eq!(handle.writes(), vec!["*CLS".to_string()]);
        assert_eq!(handle.call_log(), vec!["write *CLS".to_string(), "read".to_string()]);
        handle.clear_call_log();
        assert!(handle.call_log().is_empty());
    }
}
