//! Defines the status codes carried on the wire and the Rust-level error type
//! that wraps them.

use enum_primitive_derive::Primitive;
use thiserror::Error;

use super::uuid::Uuid;

/// A status code, as exchanged on the wire in `Status` messages and returned
/// internally by every engine operation.
///
/// `NoError` and `NoFurtherProcessingRequired` are not failures:
/// `NoFurtherProcessingRequired` is an internal sentinel meaning "stop
/// processing at this level", not an error to propagate.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum Status {
    /// The operation completed successfully.
    NoError = 0,
    /// Internal sentinel: short-circuit the current level, not an error.
    NoFurtherProcessingRequired = 1,
    /// Read past the end of the buffer.
    ErrorOverflow = 2,
    /// An integer could not be represented in the target width.
    ErrorValueOverflow = 3,
    /// The caller supplied inconsistent settings.
    ErrorInvalidArgument = 4,
    /// The wire protocol version is unknown to this implementation.
    ErrorNotSupportedProtocolVersion = 5,
    /// No common interface version could be negotiated.
    ErrorNotSupportedInterfaceVersion = 6,
    /// The active flag combination is disallowed by the struct's category,
    /// or by a `long double`-equivalent field under an endianness swap.
    ErrorNotSupportedSerializationSettingsForStruct = 7,
    /// The server has no handler registered for the requested struct id.
    ErrorNoSuchHandler = 8,
    /// The operation was attempted on an uninitialized session.
    ErrorNotInited = 9,
    /// Re-initialization of an already-initialized session was attempted.
    ErrorAlreadyInited = 10,
    /// An internal invariant was violated (unresolvable back-reference,
    /// corrupt header).
    ErrorInternal = 11,
}

impl Status {
    /// Returns `true` if this status represents a failure that should abort
    /// the current encode/decode pass.
    pub fn is_error(self) -> bool {
        !matches!(self, Status::NoError | Status::NoFurtherProcessingRequired)
    }
}

/// The error type returned by every fallible operation in the engine.
///
/// Wire-level failures carry a [`Status`]; this type adds the handful of
/// Rust-native failure modes (I/O, malformed input) that don't correspond to
/// a single protocol status but still need to be reported to the caller.
#[derive(Error, Debug)]
pub enum CspError {
    /// An I/O error occurred while reading from or writing to the underlying
    /// channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The encoded message or struct body was malformed.
    #[error("malformed CSP message: {0}")]
    Invalid(String),
    /// A protocol-level status was returned instead of success.
    #[error("CSP status: {0:?}")]
    Status(Status),
    /// The remote peer does not have a handler for the given input struct id.
    #[error("no handler registered for struct id {0:?}")]
    NoSuchHandler(Uuid),
    /// No version-conversion link exists between two adjacent private
    /// versions of a type.
    #[error("no version converter from {from} to {to} for struct {id:?}")]
    NoSuchConverter {
        /// Struct identity the converter was being sought for.
        id: Uuid,
        /// Source private version.
        from: u32,
        /// Target private version.
        to: u32,
    },
}

impl From<Status> for CspError {
    fn from(status: Status) -> Self {
        CspError::Status(status)
    }
}

/// The result type returned by every fallible engine operation.
pub type Result<T> = std::result::Result<T, CspError>;
