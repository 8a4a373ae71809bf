use crate::command::{dispatch, Dispatch};
use crate::config::ServerSettings;
use crate::digitizer::Digitizer;
use crate::session::Session;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{error, info};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Why the serve loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    /// A client sent `quit`.
    Quit,
    /// The shutdown channel fired (interrupt signal).
    Shutdown,
}

enum ClientExit {
    Disconnect,
    Quit,
    Shutdown,
}

/// Single-threaded TCP session server: one client at a time, drained to
/// completion before the next `accept`. The listener is non-blocking and
/// polled so the shutdown channel is observed between blocking operations
/// instead of doing I/O from a signal handler.
pub struct Server {
    listener: TcpListener,
    shutdown: Receiver<()>,
    accept_poll: Duration,
    recv_timeout: Duration,
}

impl Server {
    pub fn bind(settings: &ServerSettings, shutdown: Receiver<()>) -> Result<Self> {
        let addr = format!("{}:{}", settings.bind, settings.port);
        let listener = TcpListener::bind(&addr).with_context(|| format!("binding {addr}"))?;
        listener.set_nonblocking(true)?;
        info!("server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            shutdown,
            accept_poll: Duration::from_millis(settings.accept_poll_ms.max(1)),
            recv_timeout: Duration::from_millis(settings.recv_timeout_ms.max(1)),
        })
    }

    /// Listening address, useful when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve clients until `quit` or shutdown.
    pub fn run<D: Digitizer>(&self, session: &mut Session<D>) -> Result<ServerExit> {
        loop {
            if self.should_shutdown() {
                return Ok(ServerExit::Shutdown);
            }
            let stream = match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!("client connected: {peer}");
                    stream
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.accept_poll);
                    continue;
                }
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            };
            match self.serve(session, stream)? {
                ClientExit::Disconnect => continue,
                ClientExit::Quit => return Ok(ServerExit::Quit),
                ClientExit::Shutdown => return Ok(ServerExit::Shutdown),
            }
        }
    }

    /// Serve one connection: newline-delimited commands in, one reply line
    /// (plus the binary download blocks) out, until the peer disconnects.
    fn serve<D: Digitizer>(
        &self,
        session: &mut Session<D>,
        mut stream: TcpStream,
    ) -> Result<ClientExit> {
        stream.set_nonblocking(false)?;
        // bounded reads so the shutdown channel is checked while the
        // client is idle
        stream.set_read_timeout(Some(self.recv_timeout))?;

        let mut buf = [0u8; 1024];
        let mut pending = String::new();
        loop {
            if self.should_shutdown() {
                return Ok(ClientExit::Shutdown);
            }
            let n = match stream.read(&mut buf) {
                Ok(0) => {
                    info!("client disconnected");
                    return Ok(ClientExit::Disconnect);
                }
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    error!("recv failed: {e}");
                    return Ok(ClientExit::Disconnect);
                }
            };
            pending.push_str(&String::from_utf8_lossy(&buf[..n]));
            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                match self.handle_line(session, &mut stream, line.trim_end_matches(['\r', '\n'])) {
                    Ok(None) => {}
                    Ok(Some(exit)) => return Ok(exit),
                    Err(e) => {
                        error!("send failed: {e}");
                        return Ok(ClientExit::Disconnect);
                    }
                }
            }
        }
    }

    fn handle_line<D: Digitizer>(
        &self,
        session: &mut Session<D>,
        stream: &mut TcpStream,
        line: &str,
    ) -> std::io::Result<Option<ClientExit>> {
        info!("received message from client: {line}");
        let Dispatch {
            reply,
            download,
            quit,
        } = dispatch(session, line);

        // replies keep the original "<msg> \n" framing
        stream.write_all(format!("{reply} \n").as_bytes())?;
        if let Some(blocks) = download {
            for block in &blocks {
                stream.write_all(block)?;
            }
            stream.flush()?;
            let bytes: usize = blocks.iter().map(Vec::len).sum();
            info!(
                "download complete: {bytes} bytes ({:.2} MB/s session average)",
                session.stats().average_rate()
            );
        }
        if quit {
            info!("quit received, server is shutting down");
            return Ok(Some(ClientExit::Quit));
        }
        Ok(None)
    }

    fn should_shutdown(&self) -> bool {
        matches!(
            self.shutdown.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    }
}
