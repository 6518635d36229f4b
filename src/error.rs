//! Error surface and the pluggable diagnostic/abort sinks.
//!
//! The spec distinguishes two failure classes: a caller invariant violation
//! (fatal — write one line then abort) and ordinary exhaustion (return
//! `None`/null, not an error). [`FatalError`] models the former;
//! exhaustion never constructs one.

use core::fmt;

/// A caller invariant was violated. Every variant here is fatal: the
/// allocator cannot continue servicing requests once its contract with the
/// caller is broken, so the only correct response is to report and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// `reinit`'s buffer pointer was not aligned to the page size.
    MisalignedBuffer,
    /// `reinit`'s size was not a page multiple, or fell outside
    /// `128 KiB..=4 GiB`.
    SizeOutOfWindow,
    /// A pointer passed to `free`/`realloc` was not a page-base (or, for the
    /// slab layer, cell-base) address. Only detected when the `guards`
    /// feature is enabled.
    UnalignedPointer,
    /// A pointer was freed twice. Only detectable under `guards`, and even
    /// then only heuristically — see [`crate::error`] module docs.
    DoubleFreeSuspected,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::MisalignedBuffer => "buffer is not page-aligned",
            Self::SizeOutOfWindow => "size is not a page multiple in [128 KiB, 4 GiB]",
            Self::UnalignedPointer => "pointer is not a valid allocation base",
            Self::DoubleFreeSuspected => "pointer appears to already be free",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FatalError {}

/// The pluggable diagnostic/abort surface named in spec §6 ("Debug/print/abort:
/// three pluggable sinks"). The default implementation logs through
/// `tracing` when the `tracing` feature is enabled, and through `eprintln!`
/// otherwise; both routes end in [`std::process::abort`] for [`report_fatal`].
pub trait Diagnostics {
    /// Emits a single diagnostic line. Never called on a path that must
    /// stay O(1) except when something has already gone wrong.
    fn debug_line(&self, msg: &str);

    /// Reports a fatal invariant violation and does not return.
    fn abort(&self, err: FatalError) -> ! {
        self.debug_line(&format!("fatal: {err}"));
        std::process::abort()
    }
}

/// The default [`Diagnostics`] sink used by both allocator tiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDiagnostics;

impl Diagnostics for DefaultDiagnostics {
    fn debug_line(&self, msg: &str) {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!("{msg}");
        }
        #[cfg(not(feature = "tracing"))]
        {
            eprintln!("tessera: {msg}");
        }
    }
}

/// Reports `err` through the default sink and aborts. Called from every
/// fatal path in [`crate::page`] and [`crate::slab`].
pub fn report_fatal(err: FatalError) -> ! {
    DefaultDiagnostics.abort(err)
}

/// Emits a trace-level debug line through the default sink without aborting.
/// Used for the ambient exhaustion/coalescing/reclamation events called out
/// in SPEC_FULL.md §4.2–4.3; compiles to nothing observable unless the
/// `tracing` feature is on.
pub(crate) fn trace(msg: &str) {
    DefaultDiagnostics.debug_line(msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_non_empty() {
        for e in [
            FatalError::MisalignedBuffer,
            FatalError::SizeOutOfWindow,
            FatalError::UnalignedPointer,
            FatalError::DoubleFreeSuspected,
        ] {
            assert!(!e.to_string().is_empty());
        }
    }
}
