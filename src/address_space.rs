//! Address-space abstraction the DM uses for `data*`/`progbuf*` backing
//! memory, system-bus access, and program-memory patching (spec §9
//! "Address-space abstraction": `address_space_rw` is the only interface the
//! DM needs to memory).
//!
//! The surrounding SoC's concrete RAM/ROM region construction is out of
//! scope (spec §1); this trait is the seam an embedder implements against.

use crate::error::AddressSpaceError;

/// Attributes accompanying a memory transaction, distinguishing
/// DM-originated accesses (`mta_dm`) from system-bus accesses (`mta_sba`,
/// spec §3 "Configuration").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemTxAttrs {
    /// True if this access originates from the System Bus Access unit
    /// rather than from `data*`/`progbuf*`/abstract-command plumbing.
    pub system_bus: bool,
}

impl MemTxAttrs {
    pub const DM: Self = Self { system_bus: false };
    pub const SBA: Self = Self { system_bus: true };
}

/// A byte-addressable memory space the Debug Module reads and writes
/// through. An embedder wires this to the emulator's actual RAM/ROM/MMIO
/// routing; this crate never constructs memory regions itself.
pub trait AddressSpace: Send {
    /// Read `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&mut self, addr: u64, attrs: MemTxAttrs, buf: &mut [u8]) -> Result<(), AddressSpaceError>;

    /// Write `buf` to `addr`.
    fn write(&mut self, addr: u64, attrs: MemTxAttrs, buf: &[u8]) -> Result<(), AddressSpaceError>;

    /// Convenience: read a little-endian `u32`.
    fn read_u32(&mut self, addr: u64, attrs: MemTxAttrs) -> Result<u32, AddressSpaceError> {
        let mut buf = [0u8; 4];
        self.read(addr, attrs, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Convenience: write a little-endian `u32`.
    fn write_u32(&mut self, addr: u64, attrs: MemTxAttrs, value: u32) -> Result<(), AddressSpaceError> {
        self.write(addr, attrs, &value.to_le_bytes())
    }
}

/// A flat, growable-on-construction `Vec<u8>`-backed [`AddressSpace`], used
/// by tests and by simple embedders that don't need sparse MMIO routing.
#[derive(Debug)]
pub struct FlatAddressSpace {
    base: u64,
    data: Vec<u8>,
}

impl FlatAddressSpace {
    pub fn new(base: u64, size: usize) -> Self {
        Self { base, data: vec![0u8; size] }
    }

    fn offset(&self, addr: u64, len: usize) -> Result<usize, AddressSpaceError> {
        let offset = addr
            .checked_sub(self.base)
            .ok_or(AddressSpaceError::Unmapped(addr))?;
        let offset = usize::try_from(offset).map_err(|_| AddressSpaceError::Unmapped(addr))?;
        let fits = matches!(offset.checked_add(len), Some(end) if end <= self.data.len());
        if !fits {
            return Err(AddressSpaceError::Unmapped(addr));
        }
        Ok(offset)
    }
}

impl AddressSpace for FlatAddressSpace {
    fn read(&mut self, addr: u64, _attrs: MemTxAttrs, buf: &mut [u8]) -> Result<(), AddressSpaceError> {
        let offset = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u64, _attrs: MemTxAttrs, buf: &[u8]) -> Result<(), AddressSpaceError> {
        let offset = self.offset(addr, buf.len())?;
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}
