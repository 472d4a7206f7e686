//! Rust-level failure types for the boundaries that use `Result` rather than
//! the spec's wire-visible sticky status fields (see `dm::CmdErr`,
//! `dtm::DmiStatus`, `dm::sbus::SbError` for those).

use thiserror::Error;

/// Fatal, realize-time configuration failures (spec §7 "Configuration
/// errors"). Returned from fallible constructors; never produced once a
/// component is constructed.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("IR length must be in 1..=8 bits, got {0}")]
    InvalidIrLength(u8),

    #[error("idcode_inst {0:#x} collides with the mandatory BYPASS encoding (IR=0 or IR=all-ones)")]
    IdcodeInstructionCollidesWithBypass(u32),

    #[error("DMI address width (abits) must be in 7..=30 bits, got {0}")]
    InvalidAbits(u8),

    #[error("data_count must be in 1..=12, got {0}")]
    InvalidDataCount(u8),

    #[error("progbuf_count must be in 0..=16, got {0}")]
    InvalidProgbufCount(u8),

    #[error("nscratch must be 1 or 2, got {0}")]
    InvalidNscratch(u8),

    #[error("DM address range [{new_base:#x}, {new_base:#x}+{new_size:#x}) overlaps an already-registered range [{existing_base:#x}, {existing_base:#x}+{existing_size:#x})")]
    OverlappingDmRange {
        new_base: u32,
        new_size: u32,
        existing_base: u32,
        existing_size: u32,
    },

    #[error("hart count {configured} does not match CPU enumeration ({enumerated})")]
    HartCountMismatch { configured: usize, enumerated: usize },
}

/// I/O failures from the Remote-BitBang TAP server's byte stream.
#[derive(Debug, Error)]
pub enum TapServerError {
    #[error("I/O error on TAP transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer closed the TAP transport")]
    Closed,
}

/// Failures an injected [`crate::address_space::AddressSpace`] implementor
/// may report back to a caller (SBA, abstract-command memory access, or
/// program-memory patching).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum AddressSpaceError {
    #[error("address {0:#x} is not mapped in this address space")]
    Unmapped(u64),

    #[error("access at {addr:#x} with width {width} is misaligned")]
    Misaligned { addr: u64, width: u8 },
}
