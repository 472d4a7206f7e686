//! Debug Transport Module: the `dtmcs`/`dmi` scan registers and DMI routing
//! to registered Debug Modules (spec §4.3).
//!
//! Grounded on `probe-rs/src/architecture/riscv/dtm/jtag_dtm.rs`'s `Dtmcs`
//! bitfield and DMI wire encoding (`DMI_ADDRESS_BIT_OFFSET`,
//! `DMI_VALUE_BIT_OFFSET`, `DMI_OP_MASK`, `transform_dmi_result`) — that
//! file decodes a DMI *response* on the debugger side; this module produces
//! exactly the response it expects, and consumes exactly the request shape
//! its `DmiOperation::register_value` produces.

use std::sync::{Arc, Mutex};

use crate::error::ConfigError;
use crate::tap::ScanHandler;

/// DMI operation status, latched into `dtmcs.dmistat` until `dmireset`
/// (spec §7 "DMI status"). Numeric values match the RISC-V debug spec's
/// `op` status encoding, the same one `probe-rs`'s `DmiOperationStatus`
/// decodes on the debugger side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiStatus {
    NoErr = 0,
    Reserved = 1,
    Failed = 2,
    Busy = 3,
}

impl DmiStatus {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => DmiStatus::NoErr,
            1 => DmiStatus::Reserved,
            2 => DmiStatus::Failed,
            _ => DmiStatus::Busy,
        }
    }

    fn bits(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmiOp {
    Ignore = 0,
    Read = 1,
    Write = 2,
    Reserved = 3,
}

impl DmiOp {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => DmiOp::Ignore,
            1 => DmiOp::Read,
            2 => DmiOp::Write,
            _ => DmiOp::Reserved,
        }
    }
}

bitfield::bitfield! {
    /// Capture layout: version/abits/dmistat. Update fields: dmireset
    /// (clears sticky dmistat), dmihardreset (log-only, spec §4.3).
    #[derive(Copy, Clone)]
    pub struct Dtmcs(u32);
    impl Debug;
    pub _, set_dmihardreset: 17;
    pub _, set_dmireset: 16;
    pub idle, _: 14, 12;
    pub dmistat, set_dmistat: 11, 10;
    pub abits, set_abits: 9, 4;
    pub version, set_version: 3, 0;
}

impl From<u32> for Dtmcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dtmcs> for u32 {
    fn from(register: Dtmcs) -> Self {
        register.0
    }
}

/// RISC-V External Debug Spec version this DTM reports in `dtmcs.version`.
pub const DEBUG_SPEC_VERSION_0_13: u8 = 1;

/// A Debug Module as seen from the DTM's routing table (spec §4.3 "DM
/// routing"). Implemented by [`crate::dm::DebugModule`].
pub trait DmDevice: Send {
    /// `addr` is already translated to be relative to this device's base.
    fn read_rq(&mut self, addr: u32) -> (u32, DmiStatus);
    /// `addr` is already translated to be relative to this device's base.
    fn write_rq(&mut self, addr: u32, value: u32) -> DmiStatus;
}

struct DmRoute {
    base: u32,
    size: u32,
    device: Box<dyn DmDevice>,
}

struct DtmShared {
    abits: u8,
    dmistat: DmiStatus,
    last_addr: u32,
    last_read_value: u32,
    routes: Vec<DmRoute>,
    mru: Option<usize>,
}

impl DtmShared {
    fn route_index_for(&mut self, addr: u32) -> Option<usize> {
        if let Some(i) = self.mru {
            let r = &self.routes[i];
            if addr >= r.base && addr < r.base + r.size {
                return Some(i);
            }
        }
        let found = self
            .routes
            .iter()
            .position(|r| addr >= r.base && addr < r.base + r.size);
        if found.is_some() {
            self.mru = found;
        }
        found
    }

    fn dispatch_read(&mut self, addr: u32) -> (u32, DmiStatus) {
        match self.route_index_for(addr) {
            Some(i) => {
                let base = self.routes[i].base;
                self.routes[i].device.read_rq(addr - base)
            }
            None => {
                tracing::warn!(addr, "DTM: DMI read to unrouted address");
                (0, DmiStatus::Failed)
            }
        }
    }

    fn dispatch_write(&mut self, addr: u32, value: u32) -> DmiStatus {
        match self.route_index_for(addr) {
            Some(i) => {
                let base = self.routes[i].base;
                self.routes[i].device.write_rq(addr - base, value)
            }
            None => {
                tracing::warn!(addr, "DTM: DMI write to unrouted address");
                DmiStatus::Failed
            }
        }
    }
}

/// Owns the `dtmcs`/`dmi` scan handlers and the DM routing table. Construct,
/// register DMs, then [`Dtm::bind`] into a [`crate::tap::Tap`].
pub struct Dtm {
    shared: Arc<Mutex<DtmShared>>,
    abits: u8,
}

impl Dtm {
    /// `abits` is the DMI address width (spec §3: 7..30).
    pub fn new(abits: u8) -> Result<Self, ConfigError> {
        if !(7..=30).contains(&abits) {
            return Err(ConfigError::InvalidAbits(abits));
        }
        Ok(Self {
            shared: Arc::new(Mutex::new(DtmShared {
                abits,
                dmistat: DmiStatus::NoErr,
                last_addr: 0,
                last_read_value: 0,
                routes: Vec::new(),
                mru: None,
            })),
            abits,
        })
    }

    /// Register a DM covering `[base, base+size)` of DMI address space
    /// (spec §4.3 "Registration is an ordered insert by base address;
    /// overlapping ranges are rejected as fatal at realize time").
    pub fn register_dm(&mut self, base: u32, size: u32, device: Box<dyn DmDevice>) -> Result<(), ConfigError> {
        let mut shared = self.shared.lock().unwrap();
        let insert_at = shared.routes.partition_point(|r| r.base < base);
        if let Some(prev) = insert_at.checked_sub(1).and_then(|i| shared.routes.get(i)) {
            if prev.base + prev.size > base {
                return Err(ConfigError::OverlappingDmRange {
                    new_base: base,
                    new_size: size,
                    existing_base: prev.base,
                    existing_size: prev.size,
                });
            }
        }
        if let Some(next) = shared.routes.get(insert_at) {
            if base + size > next.base {
                return Err(ConfigError::OverlappingDmRange {
                    new_base: base,
                    new_size: size,
                    existing_base: next.base,
                    existing_size: next.size,
                });
            }
        }
        shared.routes.insert(insert_at, DmRoute { base, size, device });
        shared.mru = None;
        Ok(())
    }

    /// Bind this DTM's `dtmcs`/`dmi` handlers into `tap` at the
    /// conventional IR codes (spec §4.3, §6).
    pub fn bind(&self, tap: &mut crate::tap::Tap) {
        tap.register_handler(
            crate::tap::DTMCS_IR,
            Box::new(DtmcsHandler { shared: self.shared.clone() }),
        );
        tap.register_handler(
            crate::tap::DMI_IR,
            Box::new(DmiHandler {
                shared: self.shared.clone(),
                abits: self.abits,
                pending_op: None,
            }),
        );
    }

    /// Current sticky DMI status, for tests and diagnostics.
    pub fn dmistat(&self) -> DmiStatus {
        self.shared.lock().unwrap().dmistat
    }
}

struct DtmcsHandler {
    shared: Arc<Mutex<DtmShared>>,
}

impl std::fmt::Debug for DtmcsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtmcsHandler").finish_non_exhaustive()
    }
}

impl ScanHandler for DtmcsHandler {
    fn name(&self) -> &'static str {
        "dtmcs"
    }

    fn length(&self) -> u32 {
        32
    }

    fn capture(&mut self) -> u64 {
        let shared = self.shared.lock().unwrap();
        let mut dtmcs = Dtmcs(0);
        dtmcs.set_version(DEBUG_SPEC_VERSION_0_13);
        dtmcs.set_abits(shared.abits);
        dtmcs.set_dmistat(shared.dmistat.bits());
        dtmcs.0 as u64
    }

    fn update(&mut self, value: u64) {
        let dtmcs = Dtmcs(value as u32);
        let mut shared = self.shared.lock().unwrap();
        if dtmcs.get_dmireset_bit() {
            tracing::debug!("DTM: dmireset, clearing sticky dmistat");
            shared.dmistat = DmiStatus::NoErr;
        }
        if dtmcs.get_dmihardreset_bit() {
            tracing::info!("DTM: dmihardreset requested (log-only)");
        }
    }
}

// The `bitfield!` macro only generates `set_*` setters for write-only
// fields declared `pub _, set_x: ..`; reading them back for our own update
// logic needs a small manual accessor since the field isn't otherwise
// readable.
impl Dtmcs {
    fn get_dmireset_bit(&self) -> bool {
        (self.0 >> 16) & 1 != 0
    }
    fn get_dmihardreset_bit(&self) -> bool {
        (self.0 >> 17) & 1 != 0
    }
}

struct DmiHandler {
    shared: Arc<Mutex<DtmShared>>,
    abits: u8,
    /// Set by `update` when the last op was a READ, consumed eagerly by
    /// the next `capture` (spec §4.3: "last_read_value is evaluated
    /// eagerly during capture if the preceding update was a READ").
    pending_op: Option<u32>,
}

impl std::fmt::Debug for DmiHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmiHandler").field("abits", &self.abits).finish_non_exhaustive()
    }
}

impl ScanHandler for DmiHandler {
    fn name(&self) -> &'static str {
        "dmi"
    }

    fn length(&self) -> u32 {
        self.abits as u32 + 34
    }

    fn capture(&mut self) -> u64 {
        let mut shared = self.shared.lock().unwrap();
        if let Some(addr) = self.pending_op.take() {
            let (value, status) = shared.dispatch_read(addr);
            shared.last_read_value = value;
            if shared.dmistat == DmiStatus::NoErr {
                shared.dmistat = status;
            }
        }
        let data = shared.last_read_value as u64;
        let addr = shared.last_addr as u64;
        let dmistat = shared.dmistat.bits() as u64;
        (addr << 34) | (data << 2) | dmistat
    }

    fn update(&mut self, value: u64) {
        let op_mask = value & 0x3;
        let data = ((value >> 2) & 0xffff_ffff) as u32;
        let addr = (value >> 34) as u32;

        let mut shared = self.shared.lock().unwrap();
        if shared.dmistat != DmiStatus::NoErr {
            // Sticky: ignore further ops until dmireset (spec §4.3 item 3).
            return;
        }

        match DmiOp::from_bits(op_mask as u32) {
            DmiOp::Ignore => {}
            DmiOp::Read => {
                drop(shared);
                self.pending_op = Some(addr);
                shared = self.shared.lock().unwrap();
                shared.last_addr = addr;
            }
            DmiOp::Write => {
                let status = shared.dispatch_write(addr, data);
                if shared.dmistat == DmiStatus::NoErr {
                    shared.dmistat = status;
                }
                shared.last_addr = addr;
            }
            DmiOp::Reserved => {
                shared.dmistat = DmiStatus::Failed;
            }
        }
    }
}
