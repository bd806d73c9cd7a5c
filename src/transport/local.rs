//! In-process transport
//!
//! Connects providers registered under string addresses within one
//! process. Used by the test suites and by deployments hosting several
//! providers in a single daemon. Buffers are plain byte vectors in a
//! per-client registry; pulls and pushes are memcpys. Third-party
//! channels (an origin address naming another client) are supported.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::protocol::{BulkHandle, Op};

use super::{
    BulkAccess, BulkChannel, ClientTransport, Forwarder, NullChannel, RpcTarget, TransportError,
};

struct BufferEntry {
    data: Vec<u8>,
    access: BulkAccess,
}

/// Registry of buffers a client has exposed for bulk transfer.
#[derive(Default)]
pub struct BufferSpace {
    next_id: AtomicU64,
    buffers: Mutex<HashMap<u64, BufferEntry>>,
}

impl BufferSpace {
    pub(crate) fn expose(&self, data: Vec<u8>, access: BulkAccess) -> BulkHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let len = data.len() as u64;
        self.buffers
            .lock()
            .insert(id, BufferEntry { data, access });
        BulkHandle { id, len }
    }

    pub(crate) fn reclaim(&self, handle: BulkHandle) -> Option<Vec<u8>> {
        self.buffers.lock().remove(&handle.id).map(|e| e.data)
    }

    pub(crate) fn read(
        &self,
        handle: BulkHandle,
        offset: u64,
        dst: &mut [u8],
    ) -> Result<(), TransportError> {
        let buffers = self.buffers.lock();
        let entry = buffers
            .get(&handle.id)
            .ok_or(TransportError::UnknownHandle(handle.id))?;
        if !entry.access.allows_pull() {
            return Err(TransportError::AccessMode);
        }
        let offset = offset as usize;
        let end = offset
            .checked_add(dst.len())
            .ok_or(TransportError::OutOfBounds)?;
        if end > entry.data.len() {
            return Err(TransportError::OutOfBounds);
        }
        dst.copy_from_slice(&entry.data[offset..end]);
        Ok(())
    }

    pub(crate) fn write(&self, handle: BulkHandle, offset: u64, src: &[u8]) -> Result<(), TransportError> {
        let mut buffers = self.buffers.lock();
        let entry = buffers
            .get_mut(&handle.id)
            .ok_or(TransportError::UnknownHandle(handle.id))?;
        if !entry.access.allows_push() {
            return Err(TransportError::AccessMode);
        }
        let offset = offset as usize;
        let end = offset
            .checked_add(src.len())
            .ok_or(TransportError::OutOfBounds)?;
        if end > entry.data.len() {
            return Err(TransportError::OutOfBounds);
        }
        entry.data[offset..end].copy_from_slice(src);
        Ok(())
    }
}

/// Channel over one client's buffer space.
pub struct LocalChannel {
    space: Arc<BufferSpace>,
}

#[async_trait]
impl BulkChannel for LocalChannel {
    async fn pull(
        &self,
        handle: BulkHandle,
        remote_offset: u64,
        dst: &mut [u8],
    ) -> Result<(), TransportError> {
        self.space.read(handle, remote_offset, dst)
    }

    async fn push(
        &self,
        handle: BulkHandle,
        remote_offset: u64,
        src: &[u8],
    ) -> Result<(), TransportError> {
        self.space.write(handle, remote_offset, src)
    }
}

#[derive(Default)]
struct ExchangeState {
    targets: HashMap<String, Arc<dyn RpcTarget>>,
    spaces: HashMap<String, Arc<BufferSpace>>,
}

/// The in-process address space: addr → node, addr → client buffers.
#[derive(Default)]
pub struct LocalExchange {
    state: RwLock<ExchangeState>,
}

impl LocalExchange {
    pub fn new() -> Arc<LocalExchange> {
        Arc::new(LocalExchange::default())
    }

    /// Register a node under an address.
    pub fn register(&self, addr: &str, target: Arc<dyn RpcTarget>) {
        self.state
            .write()
            .targets
            .insert(addr.to_string(), target);
    }

    pub fn deregister(&self, addr: &str) {
        self.state.write().targets.remove(addr);
    }

    fn find(&self, addr: &str) -> Result<Arc<dyn RpcTarget>, TransportError> {
        self.state
            .read()
            .targets
            .get(addr)
            .cloned()
            .ok_or_else(|| TransportError::UnknownAddress(addr.to_string()))
    }

    fn register_space(&self, addr: &str, space: Arc<BufferSpace>) {
        self.state
            .write()
            .spaces
            .insert(addr.to_string(), space);
    }

    fn find_space(&self, addr: &str) -> Option<Arc<BufferSpace>> {
        self.state.read().spaces.get(addr).cloned()
    }
}

#[async_trait]
impl Forwarder for LocalExchange {
    async fn forward(
        &self,
        addr: &str,
        provider_id: u16,
        op: Op,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let target = self.find(addr)?;
        Ok(target
            .handle(provider_id, op, &body, &NullChannel, self)
            .await)
    }

    async fn channel_to(&self, addr: &str) -> Option<Box<dyn BulkChannel>> {
        self.find_space(addr)
            .map(|space| Box::new(LocalChannel { space }) as Box<dyn BulkChannel>)
    }
}

/// Client endpoint bound to one server address on a [`LocalExchange`].
pub struct LocalClientTransport {
    exchange: Arc<LocalExchange>,
    target_addr: String,
    self_addr: String,
    space: Arc<BufferSpace>,
}

impl LocalClientTransport {
    /// Create a client addressed as `self_addr`, talking to the node at
    /// `target_addr`.
    pub fn new(
        exchange: Arc<LocalExchange>,
        target_addr: &str,
        self_addr: &str,
    ) -> LocalClientTransport {
        let space = Arc::new(BufferSpace::default());
        exchange.register_space(self_addr, space.clone());
        LocalClientTransport {
            exchange,
            target_addr: target_addr.to_string(),
            self_addr: self_addr.to_string(),
            space,
        }
    }
}

#[async_trait]
impl ClientTransport for LocalClientTransport {
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
        let target = self.exchange.find(&self.target_addr)?;
        let channel = LocalChannel {
            space: self.space.clone(),
        };
        Ok(target
            .handle(provider_id, op, &body, &channel, self.exchange.as_ref())
            .await)
    }

    fn self_addr(&self) -> String {
        self.self_addr.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_space_modes() {
        let space = BufferSpace::default();
        let readable = space.expose(b"content".to_vec(), BulkAccess::ReadOnly);

        let mut out = vec![0u8; 4];
        space.read(readable, 1, &mut out).unwrap();
        assert_eq!(&out, b"onte");

        assert!(matches!(
            space.write(readable, 0, b"x"),
            Err(TransportError::AccessMode)
        ));

        let writable = space.expose(vec![0u8; 4], BulkAccess::WriteOnly);
        space.write(writable, 2, b"hi").unwrap();
        assert_eq!(space.reclaim(writable).unwrap(), b"\0\0hi");
    }

    #[test]
    fn test_out_of_bounds() {
        let space = BufferSpace::default();
        let handle = space.expose(vec![0u8; 4], BulkAccess::ReadWrite);
        let mut big = vec![0u8; 8];
        assert!(matches!(
            space.read(handle, 0, &mut big),
            Err(TransportError::OutOfBounds)
        ));
        assert!(matches!(
            space.write(handle, 3, b"ab"),
            Err(TransportError::OutOfBounds)
        ));
    }
}
