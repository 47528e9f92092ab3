//! Scripted in-memory port for session tests.
//!
//! Every accepted write is recorded and handed to a responder closure, whose
//! returned bursts become the data later reads hand out, one burst (or part
//! of one) per read.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

struct MockState {
    pending: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    responder: Responder,
    accept_budget: Option<usize>,
    opened: Vec<SerialConfig>,
    closes: usize,
    open: bool,
    fail_open: bool,
}

/// Opener handing out [`MockPort`]s that share one scripted state.
#[derive(Clone)]
pub(crate) struct MockOpener {
    state: Arc<Mutex<MockState>>,
}

impl MockOpener {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState {
                pending: VecDeque::new(),
                writes: Vec::new(),
                responder: Box::new(responder),
                accept_budget: None,
                opened: Vec::new(),
                closes: 0,
                open: false,
                fail_open: false,
            })),
        }
    }

    /// Queue raw bytes that are readable before anything is written.
    pub(crate) fn preload(&self, burst: &[u8]) {
        self.lock()
            .pending
            .push_back(burst.to_vec());
    }

    /// Stop accepting writes after `bytes` more bytes.
    pub(crate) fn limit_accepted_bytes(&self, bytes: usize) {
        self.lock().accept_budget = Some(bytes);
    }

    pub(crate) fn fail_next_open(&self) {
        self.lock().fail_open = true;
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .clone()
    }

    pub(crate) fn opened(&self) -> Vec<SerialConfig> {
        self.lock()
            .opened
            .clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub(crate) fn is_port_open(&self) -> bool {
        self.lock().open
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap()
    }
}

impl PortOpener for MockOpener {
    type Port = MockPort;

    fn open(&mut self, config: &SerialConfig) -> Result<MockPort> {
        {
            let mut state = self.lock();
            if state.fail_open {
                state.fail_open = false;
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no such port",
                )));
            }
            state
                .opened
                .push(config.clone());
        }
        Ok(MockPort::from_opener(self, &config.port_name))
    }
}

/// Port half of [`MockOpener`].
pub(crate) struct MockPort {
    state: Arc<Mutex<MockState>>,
    name: String,
    open: bool,
}

impl MockPort {
    pub(crate) fn from_opener(opener: &MockOpener, name: &str) -> Self {
        opener.lock().open = true;
        Self {
            state: Arc::clone(&opener.state),
            name: name.to_string(),
            open: true,
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .unwrap();
        let Some(mut burst) = state
            .pending
            .pop_front()
        else {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        };
        let n = buf.len().min(burst.len());
        buf[..n].copy_from_slice(&burst[..n]);
        if n < burst.len() {
            let rest = burst.split_off(n);
            state
                .pending
                .push_front(rest);
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .unwrap();
        let accepted = match state.accept_budget {
            Some(budget) => {
                let n = budget.min(buf.len());
                state.accept_budget = Some(budget - n);
                n
            },
            None => buf.len(),
        };
        if accepted == 0 {
            return Ok(0);
        }
        let data = buf[..accepted].to_vec();
        let replies = (state.responder)(&data);
        state
            .pending
            .extend(replies);
        state
            .writes
            .push(data);
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        crate::port::DEFAULT_BAUD
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .pending
            .clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            let mut state = self
                .state
                .lock()
                .unwrap();
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }
}
