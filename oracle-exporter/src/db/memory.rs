//! Scripted in-memory database.
//!
//! Answers statements from a table of canned results keyed by SQL text. Used
//! by the test suite and for exercising probe definitions without a server.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Connection, Connector, Row, Rows};
use crate::error::DbError;

#[derive(Debug, Default)]
struct State {
    unreachable: bool,
    connect_delay: Option<Duration>,
    results: HashMap<String, Result<Vec<Row>, String>>,
    open: usize,
    opened: usize,
    executed: Vec<String>,
    call_timeout: Option<Duration>,
}

/// A cloneable handle to a scripted database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with the given rows.
    pub fn with_rows(self, sql: &str, rows: Vec<Row>) -> Self {
        self.set_rows(sql, rows);
        self
    }

    /// Fail `sql` with the given message.
    pub fn with_error(self, sql: &str, message: &str) -> Self {
        self.set_error(sql, message);
        self
    }

    /// Delay every connection attempt.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state.lock().connect_delay = Some(delay);
        self
    }

    pub fn set_rows(&self, sql: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .results
            .insert(normalize(sql), Ok(rows));
    }

    pub fn set_error(&self, sql: &str, message: &str) {
        self.state
            .lock()
            .results
            .insert(normalize(sql), Err(message.to_string()));
    }

    /// Make connection attempts fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Connections opened since creation.
    pub fn connections_opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// The call timeout most recently set on any connection.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.state.lock().call_timeout
    }
}

impl Connector for MemoryDatabase {
    fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let (unreachable, delay) = {
            let state = self.state.lock();
            (state.unreachable, state.connect_delay)
        };
        // A refused connection fails fast; the delay models a slow handshake.
        if unreachable {
            return Err(DbError::Connect(
                "ORA-12541: TNS:no listener".to_string(),
            ));
        }
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        state.open += 1;
        state.opened += 1;

        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
    closed: bool,
}

impl Connection for MemoryConnection {
    fn query(&self, sql: &str) -> Result<Rows<'_>, DbError> {
        if self.closed {
            return Err(DbError::Closed);
        }

        let key = normalize(sql);
        let mut state = self.state.lock();
        state.executed.push(key.clone());

        match state.results.get(&key) {
            Some(Ok(rows)) => Ok(Box::new(rows.clone().into_iter().map(Ok))),
            Some(Err(message)) => Err(DbError::query(sql, message.clone())),
            None => Err(DbError::query(
                sql,
                "ORA-00942: table or view does not exist",
            )),
        }
    }

    fn set_call_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        self.state.lock().call_timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DbError> {
        if !self.closed {
            self.closed = true;
            self.state.lock().open -= 1;
        }
        Ok(())
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
