use std::error::Error;
use std::fmt;
use std::io;

/// Enum representing errors happening while trying to send packets to
/// the network.
#[derive(Debug)]
pub enum TxError {
    /// Returned when the payload does not fit in the given protocol.
    /// For example sending a packet with more than 2^16 bytes in a
    /// protocol with a 16 bit length field.
    TooLargePayload,

    /// Returned when the stack was not able to lock an internal lock.
    /// Should not happen, indicates an internal error.
    PoisonedLock,

    /// Returned when there was an `IoError` during transmission.
    IoError(io::Error),

    /// Any other error not covered by the more specific enum variants.
    Other(String),
}

impl From<io::Error> for TxError {
    fn from(e: io::Error) -> Self {
        TxError::IoError(e)
    }
}

impl From<TxError> for io::Error {
    fn from(e: TxError) -> Self {
        let other = |msg: String| io::Error::new(io::ErrorKind::Other, msg);
        match e {
            TxError::TooLargePayload => other("Too large payload".to_owned()),
            TxError::PoisonedLock => other("Poisoned lock".to_owned()),
            TxError::IoError(e2) => e2,
            TxError::Other(msg) => other(format!("Other: {}", msg)),
        }
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use crate::TxError::*;
        match *self {
            TooLargePayload => fmt.write_str("Too large payload"),
            PoisonedLock => fmt.write_str("Poisoned lock"),
            IoError(ref e) => write!(fmt, "IO error: {}", e),
            Other(ref s) => write!(fmt, "Other error: {}", s),
        }
    }
}

impl Error for TxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        if let TxError::IoError(ref e) = *self {
            Some(e)
        } else {
            None
        }
    }
}

/// Type binding for the type of `Result` that a send method returns.
pub type TxResult = Result<(), TxError>;

/// Error produced by a receive path when there is something wrong with
/// the incoming packet.
#[derive(Debug, Eq, PartialEq)]
pub enum RxError {
    /// When nothing is listening for this packet, so it becomes
    /// silently discarded.
    NoListener(String),

    /// When a packet contains an invalid checksum.
    InvalidChecksum,

    /// When the length of the packet does not match the requirements
    /// or header content of a protocol.
    InvalidLength,

    /// When other packet content is invalid.
    InvalidContent,

    /// When a lock inside the stack is poisoned so locking can't be
    /// performed. Should not happen.
    PoisonedLock,

    /// Some error that was not covered by the more specific errors in
    /// this enum.
    Other(String),
}

impl fmt::Display for RxError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use crate::RxError::*;
        match *self {
            NoListener(ref s) => write!(fmt, "No listener for packet: {}", s),
            InvalidChecksum => fmt.write_str("Invalid checksum in packet"),
            InvalidLength => fmt.write_str("Invalid length of packet"),
            InvalidContent => fmt.write_str("Invalid content in packet"),
            PoisonedLock => fmt.write_str("Poisoned lock"),
            Other(ref s) => write!(fmt, "Other error: {}", s),
        }
    }
}

impl Error for RxError {}

/// A receive path that has to answer on the network (ARP replies, ICMP
/// errors, acks) can fail in transmission. The failure is only ever
/// logged, so it collapses into the generic receive error.
impl From<TxError> for RxError {
    fn from(e: TxError) -> Self {
        RxError::Other(format!("Unable to transmit response: {}", e))
    }
}

/// Simple type definition for the return type of receive paths.
pub type RxResult = Result<(), RxError>;
