use crate::types::ErrorCode;

/// Errors that can report themselves as a machine-readable [`ErrorCode`].
///
/// Every user-facing operation ends in an [`ActionResult`](crate::ActionResult);
/// this is the bridge from a crate-local error to that shape.
pub trait Coded: std::fmt::Display {
    fn code(&self) -> ErrorCode;
}
