//! Remote-BitBang TAP server (spec §4.2).
//!
//! Byte encoding grounded directly on `probe-rs/src/probe/bitbang/
//! bitbang_adapter.rs`'s `BitBangAdapter`, which drives a *host*-side
//! remote-bitbang client against this exact wire format; this module is the
//! mirror-image *server* that a `BitBangAdapter` (or OpenOCD's
//! `remote_bitbang` driver) connects to.

use std::io::{Read, Write};

use crate::error::TapServerError;
use crate::tap::Tap;

/// Maximum bytes consumed from the peer between flow-control checks (spec
/// §4.2: "the server accepts up to ~4 KiB between reads").
pub const READ_CHUNK: usize = 4096;

/// Decoded outcome of processing one inbound byte, for callers that want to
/// observe protocol-level events (e.g. to gate `Quit` on configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbbEvent {
    /// A `0`..`7` clock/TMS/TDI write was applied.
    Clock,
    /// `r`/`s`/`t`/`u` reset lines were applied.
    Reset,
    /// `R` was answered with the current TDO bit.
    Read(bool),
    /// `B`/`b` LED control (no-op in emulation).
    Led,
    /// `Q` quit request; `accepted` reflects whether `enable_quit` allowed
    /// it to be honored.
    Quit { accepted: bool },
    /// An unrecognized byte, logged and discarded (spec §7 "Transport
    /// errors").
    Unknown(u8),
}

/// Drives a [`Tap`] from a Remote-BitBang byte stream. Single-threaded,
/// non-blocking per spec §5 ("the TAP server's `receive` callback is
/// non-blocking; it never yields mid-byte").
pub struct RbbServer {
    enable_quit: bool,
    quit_requested: bool,
}

impl RbbServer {
    pub fn new(enable_quit: bool) -> Self {
        Self { enable_quit, quit_requested: false }
    }

    /// True once a `Q` byte has been accepted (spec §7: "A `Q` byte over
    /// the TAP triggers an orderly guest shutdown only if `enable_quit` is
    /// true").
    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Process a single already-read byte against `tap`, writing any
    /// required response (only `R` produces one) to `respond`.
    pub fn process_byte(
        &mut self,
        tap: &mut Tap,
        byte: u8,
        respond: &mut impl Write,
    ) -> Result<RbbEvent, TapServerError> {
        let event = match byte {
            b'0'..=b'7' => {
                let bits = byte - b'0';
                let tck = (bits & 0b100) != 0;
                let tms = (bits & 0b010) != 0;
                let tdi = (bits & 0b001) != 0;
                tracing::trace!(tck, tms, tdi, "RBB: clock");
                tap.step(tck, tms, tdi);
                RbbEvent::Clock
            }
            b'r' => {
                tap.reset(false, false);
                RbbEvent::Reset
            }
            b's' => {
                tap.reset(false, true);
                RbbEvent::Reset
            }
            b't' => {
                tap.reset(true, false);
                RbbEvent::Reset
            }
            b'u' => {
                tap.reset(true, true);
                RbbEvent::Reset
            }
            b'R' => {
                let tdo = tap.tdo();
                respond.write_all(&[if tdo { b'1' } else { b'0' }])?;
                tracing::trace!(tdo, "RBB: read");
                RbbEvent::Read(tdo)
            }
            b'B' | b'b' => RbbEvent::Led,
            b'Q' => {
                let accepted = self.enable_quit;
                if accepted {
                    self.quit_requested = true;
                    tracing::debug!("RBB: quit requested and accepted");
                } else {
                    tracing::info!("RBB: quit requested but enable_quit is false, ignoring");
                }
                RbbEvent::Quit { accepted }
            }
            other => {
                tracing::warn!(byte = other, "RBB: unknown byte, discarding");
                RbbEvent::Unknown(other)
            }
        };
        Ok(event)
    }

    /// Read up to [`READ_CHUNK`] bytes from `stream` and process each
    /// against `tap`, writing responses back to the same stream. Returns
    /// the number of bytes processed, or `0` on a clean peer close.
    #[tracing::instrument(skip_all)]
    pub fn pump(&mut self, tap: &mut Tap, stream: &mut (impl Read + Write)) -> Result<usize, TapServerError> {
        let mut buf = [0u8; READ_CHUNK];
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(TapServerError::Closed);
        }
        for &byte in &buf[..n] {
            self.process_byte(tap, byte, stream)?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn tap() -> Tap {
        Tap::new(5, 0x1234_5678, 1).unwrap()
    }

    #[test]
    fn clock_bytes_drive_tck_tms_tdi_bits() {
        let mut tap = tap();
        let mut server = RbbServer::new(false);
        let mut out = Cursor::new(Vec::new());
        // byte '5' = 0b101 = (tck=1, tms=0, tdi=1)
        let event = server.process_byte(&mut tap, b'5', &mut out).unwrap();
        assert_eq!(event, RbbEvent::Clock);
    }

    #[test]
    fn read_byte_replies_with_ascii_digit() {
        let mut tap = tap();
        let mut server = RbbServer::new(false);
        let mut out = Cursor::new(Vec::new());
        server.process_byte(&mut tap, b'R', &mut out).unwrap();
        let written = out.into_inner();
        assert_eq!(written.len(), 1);
        assert!(written[0] == b'0' || written[0] == b'1');
    }

    #[test]
    fn reset_bytes_map_to_trst_srst_combinations() {
        let mut tap = tap();
        let mut server = RbbServer::new(false);
        let mut out = Cursor::new(Vec::new());
        for byte in [b'r', b's', b't', b'u'] {
            assert_eq!(
                server.process_byte(&mut tap, byte, &mut out).unwrap(),
                RbbEvent::Reset
            );
        }
    }

    #[test]
    fn quit_is_gated_by_enable_quit() {
        let mut tap = tap();
        let mut out = Cursor::new(Vec::new());

        let mut gated = RbbServer::new(false);
        assert_eq!(
            gated.process_byte(&mut tap, b'Q', &mut out).unwrap(),
            RbbEvent::Quit { accepted: false }
        );
        assert!(!gated.quit_requested());

        let mut allowed = RbbServer::new(true);
        assert_eq!(
            allowed.process_byte(&mut tap, b'Q', &mut out).unwrap(),
            RbbEvent::Quit { accepted: true }
        );
        assert!(allowed.quit_requested());
    }

    #[test]
    fn unknown_byte_is_logged_and_discarded_without_error() {
        let mut tap = tap();
        let mut server = RbbServer::new(false);
        let mut out = Cursor::new(Vec::new());
        assert_eq!(
            server.process_byte(&mut tap, b'!', &mut out).unwrap(),
            RbbEvent::Unknown(b'!')
        );
    }
}
