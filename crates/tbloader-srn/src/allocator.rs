//! Hands out serial numbers from locally held blocks, replenishing from
//! the reservation authority when it can and carrying on without it when
//! it cannot.
//!
//! Every change to a record is saved before anything derived from it is
//! returned, so a crash can lose numbers but never issue one twice.

use std::sync::Arc;

use crate::allocation::SrnAllocationInfo;
use crate::authority::ReservationAuthority;
use crate::config::SrnConfig;
use crate::error::{SrnError, SrnResult};
use crate::store::SrnStore;

pub struct SrnAllocator {
    config: SrnConfig,
    store: Arc<dyn SrnStore>,
    authority: Arc<dyn ReservationAuthority>,
    identity: Option<String>,
    /// Identity the record is saved under; differs from `identity` while
    /// borrowing another identity's block.
    owner: Option<String>,
    record: SrnAllocationInfo,
}

impl std::fmt::Debug for SrnAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrnAllocator")
            .field("identity", &self.identity)
            .field("owner", &self.owner)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl SrnAllocator {
    pub fn new(
        config: SrnConfig,
        store: Arc<dyn SrnStore>,
        authority: Arc<dyn ReservationAuthority>,
    ) -> Self {
        Self {
            config,
            store,
            authority,
            identity: None,
            owner: None,
            record: SrnAllocationInfo::default(),
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Whether numbers are being drawn from another identity's block.
    pub fn is_borrowed(&self) -> bool {
        self.owner.is_some() && self.owner != self.identity
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn record(&self) -> &SrnAllocationInfo {
        &self.record
    }

    pub fn available(&self) -> u32 {
        self.record.available()
    }

    /// Load `identity`'s record and top it up if either range is empty.
    ///
    /// Switching identity discards everything held for the previous one.
    /// A failed top-up is tolerated while a number remains. When this
    /// identity has never held a block and the authority is unreachable,
    /// the best block held by another identity on this machine is borrowed.
    /// Returns the count of numbers available.
    pub async fn prepare(&mut self, identity: &str) -> SrnResult<u32> {
        if self.identity.as_deref() != Some(identity) {
            self.identity = Some(identity.to_string());
            self.owner = Some(identity.to_string());
            self.record = SrnAllocationInfo::default();
        }
        let (has_local, record) = match self.store.load(identity).await? {
            Some(record) => (true, record),
            None => (false, SrnAllocationInfo::default()),
        };
        if !self.is_borrowed() {
            self.record = record;
        }

        if self.is_borrowed() || (self.record.has_primary() && self.record.has_backup()) {
            return Ok(self.available());
        }

        let blocks = if self.record.has_primary() { 1 } else { 2 };
        match self.replenish(blocks).await {
            Ok(()) => {}
            Err(e) if self.record.has_next() => {
                tracing::warn!(identity, error = %e, available = self.available(), "could not top up serial numbers");
            }
            Err(e) if !has_local => {
                tracing::warn!(identity, error = %e, "no serial numbers held; looking for one to borrow");
                if !self.borrow_best().await? {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            identity,
            owner = self.owner.as_deref().unwrap_or(identity),
            available = self.available(),
            next = self.record.next_srn,
            "serial number allocation ready"
        );
        Ok(self.available())
    }

    /// Issue the next serial number, formatted for writing to a device.
    pub async fn allocate_next(&mut self) -> SrnResult<String> {
        if self.identity.is_none() {
            return Err(SrnError::NoIdentity);
        }
        if !self.record.has_next() {
            if self.is_borrowed() {
                return Err(SrnError::Exhausted);
            }
            let blocks = if self.record.has_primary() { 1 } else { 2 };
            if let Err(e) = self.replenish(blocks).await {
                tracing::warn!(error = %e, "replenishment failed");
            }
        }

        let mut updated = self.record.clone();
        let srn = updated.allocate_next().ok_or(SrnError::Exhausted)?;
        let formatted = updated
            .format_srn(srn)
            .ok_or_else(|| SrnError::invalid_reservation("record has no allocator id"))?;
        self.save(&updated).await?;
        self.record = updated;

        tracing::debug!(srn = %formatted, remaining = self.available(), "allocated serial number");
        Ok(formatted)
    }

    /// Request `blocks` blocks and fold them into the record. The record
    /// changes only once the result has been saved.
    async fn replenish(&mut self, blocks: u32) -> SrnResult<()> {
        let identity = self.identity.as_deref().ok_or(SrnError::NoIdentity)?;
        let count = blocks * self.config.block_size_for(identity);
        let reservation = self.authority.reserve(count).await?;

        let mut updated = self.record.clone();
        updated.apply_reservation(&reservation)?;
        self.save(&updated).await?;
        self.record = updated;
        Ok(())
    }

    async fn save(&self, record: &SrnAllocationInfo) -> SrnResult<()> {
        let owner = self.owner.as_deref().ok_or(SrnError::NoIdentity)?;
        self.store.save(owner, record).await
    }

    /// Adopt the record of whichever other identity has the most numbers
    /// left. Returns false if none has any.
    async fn borrow_best(&mut self) -> SrnResult<bool> {
        let mut best: Option<(String, SrnAllocationInfo)> = None;
        for other in self.store.identities().await? {
            if self.identity.as_deref() == Some(other.as_str()) {
                continue;
            }
            let Some(record) = self.store.load(&other).await? else {
                continue;
            };
            let better = best
                .as_ref()
                .is_none_or(|(_, held)| record.available() > held.available());
            if record.has_next() && better {
                best = Some((other, record));
            }
        }

        let Some((lender, record)) = best else {
            return Ok(false);
        };
        tracing::info!(lender = %lender, available = record.available(), "borrowing serial numbers");
        self.owner = Some(lender);
        self.record = record;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::Reservation;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Grants consecutive blocks until told to go offline; records requests.
    #[derive(Default)]
    struct FakeAuthority {
        offline: std::sync::atomic::AtomicBool,
        next_begin: Mutex<u32>,
        requests: Mutex<Vec<u32>>,
    }

    impl FakeAuthority {
        fn online() -> Arc<Self> {
            let authority = Self::default();
            *authority.next_begin.lock().unwrap() = 0x300;
            Arc::new(authority)
        }

        fn offline() -> Arc<Self> {
            let authority = Self::online();
            authority.set_offline(true);
            authority
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
        }

        fn requests(&self) -> Vec<u32> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReservationAuthority for FakeAuthority {
        async fn reserve(&self, count: u32) -> SrnResult<Reservation> {
            self.requests.lock().unwrap().push(count);
            if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(SrnError::reservation("offline"));
            }
            let mut next = self.next_begin.lock().unwrap();
            let begin = *next;
            *next += count;
            Ok(Reservation {
                id: 12,
                hexid: "000c".into(),
                begin,
                end: begin + count,
            })
        }
    }

    fn allocator(store: &Arc<MemoryStore>, authority: &Arc<FakeAuthority>) -> SrnAllocator {
        let config = SrnConfig::default().with_block_size(4);
        SrnAllocator::new(config, store.clone(), authority.clone())
    }

    #[tokio::test]
    async fn test_first_prepare_requests_two_blocks() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = allocator(&store, &authority);

        assert_eq!(alloc.prepare("amy@example.org").await.unwrap(), 8);
        assert_eq!(authority.requests(), vec![8]);
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0300");
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0301");
    }

    #[tokio::test]
    async fn test_prepare_refills_backup_with_one_block() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = allocator(&store, &authority);
        alloc.prepare("amy@example.org").await.unwrap();
        for _ in 0..4 {
            alloc.allocate_next().await.unwrap();
        }
        // Backup was promoted, leaving the backup slot empty.
        assert!(!alloc.record().has_backup());

        alloc.prepare("amy@example.org").await.unwrap();
        assert_eq!(authority.requests(), vec![8, 4]);
        assert_eq!(alloc.available(), 8);
    }

    #[tokio::test]
    async fn test_persisted_before_return() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = allocator(&store, &authority);
        alloc.prepare("amy@example.org").await.unwrap();

        for _ in 0..6 {
            let srn = alloc.allocate_next().await.unwrap();
            let issued = u32::from_str_radix(&srn[6..], 16).unwrap();
            let reloaded = store.load("amy@example.org").await.unwrap().unwrap();
            assert!(reloaded.next_srn > issued, "{srn} may be reissued");
        }
    }

    #[tokio::test]
    async fn test_failed_save_returns_nothing() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = allocator(&store, &authority);
        alloc.prepare("amy@example.org").await.unwrap();

        store.set_fail_saves(true);
        assert!(matches!(alloc.allocate_next().await, Err(SrnError::Store(_))));
        store.set_fail_saves(false);
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0300");
    }

    #[tokio::test]
    async fn test_last_number_then_offline() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = SrnAllocator::new(
            SrnConfig::default().with_privileged_identity("dev@example.org", 1),
            store.clone(),
            authority.clone(),
        );
        // Two privileged blocks of one number each.
        assert_eq!(alloc.prepare("dev@example.org").await.unwrap(), 2);
        authority.set_offline(true);

        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0300");
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0301");
        assert!(matches!(alloc.allocate_next().await, Err(SrnError::Exhausted)));
        assert_eq!(authority.requests(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_offline_prepare_tolerated_while_numbers_remain() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = allocator(&store, &authority);
        alloc.prepare("amy@example.org").await.unwrap();
        for _ in 0..4 {
            alloc.allocate_next().await.unwrap();
        }

        authority.set_offline(true);
        assert_eq!(alloc.prepare("amy@example.org").await.unwrap(), 4);
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0304");
    }

    #[tokio::test]
    async fn test_exhausted_replenishes_on_demand() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = allocator(&store, &authority);
        authority.set_offline(true);
        assert!(alloc.prepare("amy@example.org").await.is_err());
        assert!(matches!(alloc.allocate_next().await, Err(SrnError::Exhausted)));

        authority.set_offline(false);
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0300");
        assert_eq!(authority.requests(), vec![8, 8, 8]);
    }

    #[tokio::test]
    async fn test_identity_switch_discards_state() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::online();
        let mut alloc = allocator(&store, &authority);
        alloc.prepare("amy@example.org").await.unwrap();
        alloc.allocate_next().await.unwrap();

        alloc.prepare("bo@example.org").await.unwrap();
        assert_eq!(alloc.identity(), Some("bo@example.org"));
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0308");

        alloc.prepare("amy@example.org").await.unwrap();
        assert_eq!(alloc.allocate_next().await.unwrap(), "b-000c0301");
    }

    #[tokio::test]
    async fn test_borrows_best_block_when_offline() {
        let store = Arc::new(MemoryStore::new());
        let online = FakeAuthority::online();
        let mut alloc = allocator(&store, &online);
        alloc.prepare("amy@example.org").await.unwrap();
        alloc.prepare("bo@example.org").await.unwrap();
        alloc.allocate_next().await.unwrap();

        let offline = FakeAuthority::offline();
        let mut alloc = allocator(&store, &offline);
        alloc.prepare("cy@example.org").await.unwrap();
        assert!(alloc.is_borrowed());
        assert_eq!(alloc.owner(), Some("amy@example.org"));

        let srn = alloc.allocate_next().await.unwrap();
        assert_eq!(srn, "b-000c0300");
        let lender = store.load("amy@example.org").await.unwrap().unwrap();
        assert_eq!(lender.next_srn, 0x301);
        assert_eq!(store.load("cy@example.org").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nothing_to_borrow() {
        let store = Arc::new(MemoryStore::new());
        let authority = FakeAuthority::offline();
        let mut alloc = allocator(&store, &authority);
        assert!(matches!(alloc.prepare("amy@example.org").await, Err(SrnError::Reservation(_))));
    }

    #[tokio::test]
    async fn test_allocate_requires_identity() {
        let store = Arc::new(MemoryStore::new());
        let mut alloc = allocator(&store, &FakeAuthority::online());
        assert!(matches!(alloc.allocate_next().await, Err(SrnError::NoIdentity)));
    }
}
