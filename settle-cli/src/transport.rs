//! Stdout transport: one JSON message per line

use settle_runtime::Transport;
use settle_types::Outbound;
use std::io::{self, Write};

#[derive(Debug, Default)]
pub struct StdoutTransport;

impl StdoutTransport {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

impl Transport for StdoutTransport {
    fn send(&self, message: Outbound) {
        let line = match message.encode() {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode outbound message");
                return;
            }
        };
        if let Err(err) = self.write_line(&line) {
            tracing::warn!(error = %err, "failed to write outbound message");
        }
    }
}
