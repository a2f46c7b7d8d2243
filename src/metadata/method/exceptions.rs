//! Exception handler representation for CIL method bodies.
//!
//! Handler boundaries are instruction handles rather than byte offsets, so a region keeps
//! pointing at the same instructions while code is inserted around it. End boundaries are
//! exclusive; an absent end means "end of the method body".

use bitflags::bitflags;

use crate::{assembly::InstrId, metadata::token::Token};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    ///
    /// These flags determine how the exception handler processes exceptions and
    /// control flow within try/catch/finally blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// `catch_type` holds the exception type this handler catches.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        const FILTER = 0x0001;

        /// A finally clause.
        ///
        /// Runs regardless of whether an exception occurs.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a protected region and its handler block.
///
/// # Layout in IL
///
/// ```text
/// try {
///     // try_start .. try_end (exclusive)
/// }
/// catch (CatchType) {
///     // handler_start .. handler_end (exclusive)
/// }
/// ```
///
/// # References
/// - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// First protected instruction
    pub try_start: InstrId,
    /// First instruction after the protected region, `None` for end of body
    pub try_end: Option<InstrId>,
    /// First handler instruction
    pub handler_start: InstrId,
    /// First instruction after the handler, `None` for end of body
    pub handler_end: Option<InstrId>,
    /// If flags == EXCEPTION, then this type will handle the exception.
    pub catch_type: Option<Token>,
}

impl ExceptionHandler {
    /// Creates a typed catch clause
    #[must_use]
    pub fn catch(
        try_start: InstrId,
        try_end: Option<InstrId>,
        handler_start: InstrId,
        handler_end: Option<InstrId>,
        catch_type: Token,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start,
            try_end,
            handler_start,
            handler_end,
            catch_type: Some(catch_type),
        }
    }

    /// True for a typed catch clause
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionHandlerFlags::EXCEPTION
    }

    /// Iterates the boundaries that must reference live instructions
    pub fn boundaries(&self) -> impl Iterator<Item = InstrId> {
        [
            Some(self.try_start),
            self.try_end,
            Some(self.handler_start),
            self.handler_end,
        ]
        .into_iter()
        .flatten()
    }
}
