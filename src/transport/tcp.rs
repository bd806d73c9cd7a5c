//! TCP transport
//!
//! Requests, responses, and bulk transfers ride the framed stream of
//! [`crate::protocol::packet`]. A bulk pull or push from a handler turns
//! into a sub-frame exchange on the requesting connection: the client
//! services those against its exposed buffers while it waits for the
//! response. Forwards to peer providers dial a fresh connection.
//!
//! Addresses are `tcp://host:port` (the scheme prefix is optional on
//! input and always present on output).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::protocol::packet::{PacketReader, PacketWriter};
use crate::protocol::{BulkHandle, Op, WireReader, WireWriter};

use super::local::BufferSpace;
use super::{BulkAccess, BulkChannel, ClientTransport, Forwarder, RpcTarget, TransportError};

mod frame {
    pub const REQUEST: u8 = 1;
    pub const RESPONSE: u8 = 2;
    pub const BULK_PULL: u8 = 3;
    pub const BULK_PULL_DATA: u8 = 4;
    pub const BULK_PUSH: u8 = 5;
    pub const BULK_PUSH_ACK: u8 = 6;
}

fn strip_scheme(addr: &str) -> &str {
    addr.strip_prefix("tcp://").unwrap_or(addr)
}

type Reader = Mutex<PacketReader<OwnedReadHalf>>;
type Writer = Mutex<PacketWriter<OwnedWriteHalf>>;

/// Channel pulling from and pushing to the requesting connection.
struct TcpChannel<'a> {
    reader: &'a Reader,
    writer: &'a Writer,
}

#[async_trait]
impl BulkChannel for TcpChannel<'_> {
    async fn pull(
        &self,
        handle: BulkHandle,
        remote_offset: u64,
        dst: &mut [u8],
    ) -> Result<(), TransportError> {
        let mut w = WireWriter::new();
        w.u8(frame::BULK_PULL);
        handle.encode(&mut w);
        w.u64(remote_offset);
        w.u64(dst.len() as u64);
        self.writer.lock().await.write_packet(&w.finish()).await?;

        let reply = self.reader.lock().await.read_packet().await?;
        let mut r = WireReader::new(&reply);
        if r.u8().map_err(|_| TransportError::ConnectionClosed)? != frame::BULK_PULL_DATA {
            return Err(TransportError::Protocol("expected bulk data frame".into()));
        }
        let ok = r.u8().map_err(|_| TransportError::ConnectionClosed)?;
        if ok == 0 {
            return Err(TransportError::UnknownHandle(handle.id));
        }
        let data = r.rest();
        if data.len() != dst.len() {
            return Err(TransportError::OutOfBounds);
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    async fn push(
        &self,
        handle: BulkHandle,
        remote_offset: u64,
        src: &[u8],
    ) -> Result<(), TransportError> {
        let mut w = WireWriter::new();
        w.u8(frame::BULK_PUSH);
        handle.encode(&mut w);
        w.u64(remote_offset);
        w.raw(src);
        self.writer.lock().await.write_packet(&w.finish()).await?;

        let reply = self.reader.lock().await.read_packet().await?;
        let mut r = WireReader::new(&reply);
        if r.u8().map_err(|_| TransportError::ConnectionClosed)? != frame::BULK_PUSH_ACK {
            return Err(TransportError::Protocol("expected bulk ack frame".into()));
        }
        if r.u8().map_err(|_| TransportError::ConnectionClosed)? == 0 {
            return Err(TransportError::UnknownHandle(handle.id));
        }
        Ok(())
    }
}

/// Outbound forwarder dialing peers per call.
pub struct TcpForwarder;

#[async_trait]
impl Forwarder for TcpForwarder {
    async fn forward(
        &self,
        addr: &str,
        provider_id: u16,
        op: Op,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let client = TcpClientTransport::connect(addr).await?;
        client.call(provider_id, op, body).await
    }

    async fn channel_to(&self, _addr: &str) -> Option<Box<dyn BulkChannel>> {
        None
    }
}

/// Server endpoint: accept loop plus per-connection request loops.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub async fn bind(addr: &str) -> Result<TcpServer, TransportError> {
        let listener = TcpListener::bind(strip_scheme(addr)).await?;
        Ok(TcpServer { listener })
    }

    /// The resolved listen address.
    pub fn local_addr(&self) -> Result<String, TransportError> {
        Ok(format!("tcp://{}", self.listener.local_addr()?))
    }

    /// Run the accept loop forever.
    pub async fn serve(self, target: Arc<dyn RpcTarget>) -> Result<(), TransportError> {
        tracing::info!(addr = %self.local_addr()?, "server listening");
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let target = target.clone();
            tokio::spawn(async move {
                tracing::debug!(%peer_addr, "client connected");
                if let Err(e) = serve_connection(stream, target).await {
                    match e {
                        TransportError::ConnectionClosed => {
                            tracing::debug!(%peer_addr, "client disconnected");
                        }
                        e => {
                            tracing::warn!(%peer_addr, error = %e, "connection error");
                        }
                    }
                }
            });
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    target: Arc<dyn RpcTarget>,
) -> Result<(), TransportError> {
    let (read_half, write_half) = stream.into_split();
    let reader: Reader = Mutex::new(PacketReader::new(read_half));
    let writer: Writer = Mutex::new(PacketWriter::new(write_half));

    loop {
        let request = reader.lock().await.read_packet().await?;
        let mut r = WireReader::new(&request);
        let kind = r.u8().map_err(|_| TransportError::ConnectionClosed)?;
        if kind != frame::REQUEST {
            return Err(TransportError::Protocol("expected request frame".into()));
        }
        let provider_id = r
            .u16()
            .map_err(|_| TransportError::Protocol("short request header".into()))?;
        let op = Op::from_u8(
            r.u8()
                .map_err(|_| TransportError::Protocol("short request header".into()))?,
        )
        .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let body = r.rest().to_vec();

        let channel = TcpChannel {
            reader: &reader,
            writer: &writer,
        };
        let response = target
            .handle(provider_id, op, &body, &channel, &TcpForwarder)
            .await;

        let mut w = WireWriter::new();
        w.u8(frame::RESPONSE);
        w.raw(&response);
        writer.lock().await.write_packet(&w.finish()).await?;
    }
}

/// Client endpoint over one TCP connection.
pub struct TcpClientTransport {
    stream: Mutex<(PacketReader<OwnedReadHalf>, PacketWriter<OwnedWriteHalf>)>,
    space: Arc<BufferSpace>,
}

impl TcpClientTransport {
    pub async fn connect(addr: &str) -> Result<TcpClientTransport, TransportError> {
        let stream = TcpStream::connect(strip_scheme(addr)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(TcpClientTransport {
            stream: Mutex::new((PacketReader::new(read_half), PacketWriter::new(write_half))),
            space: Arc::new(BufferSpace::default()),
        })
    }
}

#[async_trait]
impl ClientTransport for TcpClientTransport {
    fn expose(&self, data: Vec<u8>, access: BulkAccess) -> BulkHandle {
        self.space.expose(data, access)
    }

    fn reclaim(&self, handle: BulkHandle) -> Option<Vec<u8>> {
        self.space.reclaim(handle)
    }

    async fn call(
        &self,
        provider_id: u16,
        op: Op,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut stream = self.stream.lock().await;
        let (reader, writer) = &mut *stream;

        let mut w = WireWriter::new();
        w.u8(frame::REQUEST);
        w.u16(provider_id);
        w.u8(op as u8);
        w.raw(&body);
        writer.write_packet(&w.finish()).await?;

        // service bulk sub-frames until the response arrives
        loop {
            let reply = reader.read_packet().await?;
            let mut r = WireReader::new(&reply);
            let kind = r.u8().map_err(|_| TransportError::ConnectionClosed)?;
            match kind {
                frame::RESPONSE => return Ok(r.rest().to_vec()),
                frame::BULK_PULL => {
                    let handle = BulkHandle::decode(&mut r)
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    let offset = r
                        .u64()
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    let len = r
                        .u64()
                        .map_err(|e| TransportError::Protocol(e.to_string()))?
                        as usize;
                    let mut data = vec![0u8; len];
                    let ok = self.space.read(handle, offset, &mut data).is_ok();
                    let mut w = WireWriter::new();
                    w.u8(frame::BULK_PULL_DATA);
                    w.u8(ok as u8);
                    if ok {
                        w.raw(&data);
                    }
                    writer.write_packet(&w.finish()).await?;
                }
                frame::BULK_PUSH => {
                    let handle = BulkHandle::decode(&mut r)
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    let offset = r
                        .u64()
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    let data = r.rest();
                    let ok = self.space.write(handle, offset, data).is_ok();
                    let mut w = WireWriter::new();
                    w.u8(frame::BULK_PUSH_ACK);
                    w.u8(ok as u8);
                    writer.write_packet(&w.finish()).await?;
                }
                _ => {
                    return Err(TransportError::Protocol(
                        "unexpected frame while awaiting response".into(),
                    ))
                }
            }
        }
    }
}
