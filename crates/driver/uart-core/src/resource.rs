//! Platform resource ownership: interrupt lines and I/O regions.
//!
//! Hardware drivers claim what they use through [`PlatformResources`] so
//! that two ports can never share an IRQ or overlapping registers by
//! accident. [`ResourceTable`] is the in-memory bookkeeping used on hosts
//! without a platform allocator (and by the tests).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use uart_base::sync::IrqSpinLock;
use uart_base::utrace;

use crate::error::SerialError;

/// Exclusive ownership of interrupt lines and address regions.
pub trait PlatformResources: Send + Sync {
    /// Claims `irq` for `owner`.
    ///
    /// Fails with [`SerialError::ResourceConflict`] if it is already owned.
    fn request_irq(&self, irq: u32, owner: &'static str) -> Result<(), SerialError>;

    /// Releases `irq`. A no-op if it is not claimed.
    fn free_irq(&self, irq: u32);

    /// Claims `len` bytes of address space starting at `base`.
    ///
    /// Fails with [`SerialError::ResourceConflict`] if any part overlaps an
    /// existing claim.
    fn request_region(&self, base: u64, len: u64, owner: &'static str) -> Result<(), SerialError>;

    /// Releases the region starting at `base`. A no-op if none does.
    fn release_region(&self, base: u64);
}

#[derive(Debug, Clone, Copy)]
struct Region {
    base: u64,
    end: u64,
    owner: &'static str,
}

#[derive(Debug, Default)]
struct Claims {
    irqs: BTreeMap<u32, &'static str>,
    regions: Vec<Region>,
}

/// In-memory resource allocator.
#[derive(Debug, Default)]
pub struct ResourceTable {
    claims: IrqSpinLock<Claims>,
}

impl ResourceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current owner of `irq`.
    pub fn irq_owner(&self, irq: u32) -> Option<&'static str> {
        self.claims.lock().irqs.get(&irq).copied()
    }

    /// Owner of the region containing `addr`.
    pub fn region_owner(&self, addr: u64) -> Option<&'static str> {
        self.claims
            .lock()
            .regions
            .iter()
            .find(|r| r.base <= addr && addr < r.end)
            .map(|r| r.owner)
    }

    /// Returns `true` if nothing is claimed.
    pub fn is_empty(&self) -> bool {
        let claims = self.claims.lock();
        claims.irqs.is_empty() && claims.regions.is_empty()
    }
}

impl PlatformResources for ResourceTable {
    fn request_irq(&self, irq: u32, owner: &'static str) -> Result<(), SerialError> {
        let mut claims = self.claims.lock();
        if claims.irqs.contains_key(&irq) {
            return Err(SerialError::ResourceConflict);
        }
        claims.irqs.insert(irq, owner);
        utrace!("irq {irq} claimed by {owner}");
        Ok(())
    }

    fn free_irq(&self, irq: u32) {
        self.claims.lock().irqs.remove(&irq);
    }

    fn request_region(&self, base: u64, len: u64, owner: &'static str) -> Result<(), SerialError> {
        let end = base.checked_add(len).ok_or(SerialError::InvalidConfig)?;
        if len == 0 {
            return Err(SerialError::InvalidConfig);
        }
        let mut claims = self.claims.lock();
        if claims.regions.iter().any(|r| base < r.end && r.base < end) {
            return Err(SerialError::ResourceConflict);
        }
        claims.regions.push(Region { base, end, owner });
        utrace!("region {base:#x}..{end:#x} claimed by {owner}");
        Ok(())
    }

    fn release_region(&self, base: u64) {
        self.claims.lock().regions.retain(|r| r.base != base);
    }
}
