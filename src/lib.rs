//! A RISC-V external debug subsystem: a IEEE 1149.1 TAP controller, a
//! Remote-BitBang server front-end, a Debug Transport Module (`dtmcs`/`dmi`),
//! and a Debug Module implementing the RISC-V External Debug Spec v0.13.x
//! abstract-command/program-buffer/system-bus access mechanisms.
//!
//! The four pieces compose from the wire inward:
//!
//! ```text
//! host  <-- TCK/TMS/TDI/TDO -->  Tap  --ir/dr-->  Dtm  --dmi-->  DebugModule
//! ```
//!
//! [`tap::Tap`] runs the scan-chain state machine; [`tap::rbb::RbbServer`]
//! (behind the `rbb-server` feature) exposes it over a Remote-BitBang byte
//! stream. [`dtm::Dtm`] decodes `dtmcs`/`dmi` and routes `dmi` transactions to
//! whichever [`dm::DebugModule`] claims the target address, by analogy with
//! `probe-rs`'s `RiscvCommunicationInterface`, which drives this same
//! register set from the opposite end of the wire.

pub mod address_space;
pub mod dm;
pub mod dtm;
pub mod error;
pub mod hart;
pub mod tap;

pub use address_space::{AddressSpace, FlatAddressSpace, MemTxAttrs};
pub use dm::{DebugModule, DebugModuleConfig};
pub use dtm::{DmDevice, Dtm};
pub use error::{AddressSpaceError, ConfigError, TapServerError};
pub use hart::{CpuControl, Hart};
pub use tap::{Tap, TapState};
