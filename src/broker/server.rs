//! TCP acceptor and per-session command loop.

use crate::broker::handler::MessageHandler;
use crate::config::BrokerConfig;
use crate::protocol::codec::{decode_record, LineCodec, Record};
use crate::protocol::{to_frame, Reply};
use crate::Result;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Listens for TCP clients and runs one session task per connection.
pub struct BrokerServer {
    listener: TcpListener,
    handler: Arc<MessageHandler>,
}

impl BrokerServer {
    /// Bind the listener and build the shared broker state. Binding
    /// separately from [`run`](Self::run) lets callers bind port 0 and read
    /// back the assigned address.
    pub async fn bind(config: &BrokerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let handler = Arc::new(MessageHandler::new(config.cache_capacity));
        info!("memq broker listening on {}", listener.local_addr()?);
        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The shared broker state behind this server.
    pub fn handler(&self) -> Arc<MessageHandler> {
        Arc::clone(&self.handler)
    }

    /// Accept connections until the task is dropped. An accept error is
    /// logged and does not stop the acceptor.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        debug!("client connected: {}", peer_addr);
                        if let Err(e) = Self::handle_client(stream, handler).await {
                            warn!("session error for {}: {}", peer_addr, e);
                        } else {
                            debug!("client disconnected: {}", peer_addr);
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }

    /// One session: read records until `quit`, EOF, or a transport error,
    /// handling each record fully before reading the next. All frames to
    /// the client flow through its outbound channel, drained by a writer
    /// task, so replies and deliveries are written in the order produced.
    async fn handle_client(stream: TcpStream, handler: Arc<MessageHandler>) -> Result<()> {
        let framed = Framed::new(stream, LineCodec::new());
        let (sink, mut records) = framed.split();
        let (outbound, pending) = mpsc::unbounded_channel();
        let session = handler.register_session(outbound.clone());
        let writer = tokio::spawn(Self::write_outbound(sink, pending));

        let mut read_error = None;
        while let Some(record) = records.next().await {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };
            match decode_record(&record) {
                Ok(Record::Empty) => {}
                Ok(Record::Quit) => break,
                Ok(Record::Command(command)) => handler.handle_command(session, command),
                Err(reject) => {
                    // Protocol errors are never fatal; reply and keep
                    // reading.
                    let _ = outbound.send(to_frame(&Reply::failure(reject)));
                }
            }
        }

        // Terminal transition: purge the registry first so no further
        // deliveries target this session, then let the writer drain what is
        // already queued and close the transport.
        handler.purge_session(session);
        drop(outbound);
        let _ = writer.await;

        match read_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Drain a session's outbound channel into its socket. A write error
    /// stops the writer without touching the command loop; the session then
    /// dies on a subsequent read.
    async fn write_outbound(
        mut sink: SplitSink<Framed<TcpStream, LineCodec>, Bytes>,
        mut pending: mpsc::UnboundedReceiver<Bytes>,
    ) {
        while let Some(frame) = pending.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        // Shutdown errors on a dying connection are not actionable.
        let _ = sink.close().await;
    }
}
