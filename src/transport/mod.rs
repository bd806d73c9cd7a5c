//! Bulk-transfer RPC transport
//!
//! The dispatch layer consumes a narrow interface: a per-call
//! [`BulkChannel`] for RDMA-style pulls and pushes against the caller's
//! exposed buffers, and a [`Forwarder`] for address lookup plus
//! forward-and-wait calls to peer providers. Two implementations ship: an
//! in-process exchange ([`local`]) and a TCP wire ([`tcp`]).

use async_trait::async_trait;
use thiserror::Error;

use crate::error::KvError;
use crate::protocol::{BulkHandle, Op};

pub mod local;
pub mod tcp;

pub use local::{LocalClientTransport, LocalExchange};
pub use tcp::{TcpClientTransport, TcpServer};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("unknown address {0}")]
    UnknownAddress(String),

    #[error("unknown bulk handle {0}")]
    UnknownHandle(u64),

    #[error("bulk transfer out of bounds")]
    OutOfBounds,

    #[error("bulk access mode violation")]
    AccessMode,

    #[error("operation not supported by this transport")]
    Unsupported,
}

impl TransportError {
    /// Small integer embedded into the wire error code.
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Io(_) => 2,
            TransportError::ConnectionClosed => 3,
            TransportError::Protocol(_) => 4,
            TransportError::UnknownAddress(_) => 5,
            TransportError::UnknownHandle(_) => 6,
            TransportError::OutOfBounds => 7,
            TransportError::AccessMode => 8,
            TransportError::Unsupported => 9,
        }
    }
}

impl From<TransportError> for KvError {
    fn from(e: TransportError) -> KvError {
        KvError::Transport(e.code())
    }
}

/// Access mode a caller grants on an exposed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAccess {
    /// Remote side may pull
    ReadOnly,
    /// Remote side may push
    WriteOnly,
    /// Remote side may pull and push
    ReadWrite,
}

impl BulkAccess {
    pub fn allows_pull(&self) -> bool {
        matches!(self, BulkAccess::ReadOnly | BulkAccess::ReadWrite)
    }

    pub fn allows_push(&self) -> bool {
        matches!(self, BulkAccess::WriteOnly | BulkAccess::ReadWrite)
    }
}

/// Per-call channel to the origin's exposed buffers.
///
/// Every transfer is a suspension point.
#[async_trait]
pub trait BulkChannel: Send + Sync {
    /// Copy `dst.len()` bytes out of the remote region at `remote_offset`.
    async fn pull(
        &self,
        handle: BulkHandle,
        remote_offset: u64,
        dst: &mut [u8],
    ) -> Result<(), TransportError>;

    /// Copy `src` into the remote region at `remote_offset`.
    async fn push(
        &self,
        handle: BulkHandle,
        remote_offset: u64,
        src: &[u8],
    ) -> Result<(), TransportError>;
}

/// A channel with no buffers behind it; every transfer fails. Used for
/// forwarded calls whose operands are fully inline.
pub struct NullChannel;

#[async_trait]
impl BulkChannel for NullChannel {
    async fn pull(
        &self,
        handle: BulkHandle,
        _remote_offset: u64,
        _dst: &mut [u8],
    ) -> Result<(), TransportError> {
        Err(TransportError::UnknownHandle(handle.id))
    }

    async fn push(
        &self,
        handle: BulkHandle,
        _remote_offset: u64,
        _src: &[u8],
    ) -> Result<(), TransportError> {
        Err(TransportError::UnknownHandle(handle.id))
    }
}

/// Outbound side of a node: address lookup and forward-and-wait.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forward an RPC with inline operands to the provider at `addr` and
    /// wait for the response body.
    async fn forward(
        &self,
        addr: &str,
        provider_id: u16,
        op: Op,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Resolve a bulk channel to a third-party origin address, for
    /// requests whose buffers live somewhere other than the requester.
    /// Transports that cannot reach third parties return `None`.
    async fn channel_to(&self, addr: &str) -> Option<Box<dyn BulkChannel>>;
}

/// The receiving side of a node: the dispatch layer implements this.
#[async_trait]
pub trait RpcTarget: Send + Sync {
    /// Handle one request and produce the encoded response body.
    async fn handle(
        &self,
        provider_id: u16,
        op: Op,
        body: &[u8],
        channel: &dyn BulkChannel,
        forwarder: &dyn Forwarder,
    ) -> Vec<u8>;
}

/// Client-side transport: buffer exposure plus request/response calls
/// against one server endpoint.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Expose a buffer for bulk transfer until reclaimed.
    fn expose(&self, data: Vec<u8>, access: BulkAccess) -> BulkHandle;

    /// Reclaim an exposed buffer, returning its (possibly pushed-into)
    /// contents.
    fn reclaim(&self, handle: BulkHandle) -> Option<Vec<u8>>;

    /// Issue an RPC and wait for the response body, servicing bulk
    /// transfers against the exposed buffers in the meantime.
    async fn call(
        &self,
        provider_id: u16,
        op: Op,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError>;

    /// This client's address as resolvable by the server, empty when the
    /// transport has no third-party addressing.
    fn self_addr(&self) -> String {
        String::new()
    }
}
