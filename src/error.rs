use atat::Error as AtError;

/// Result kind shared by all driver operations.
///
/// Command APIs return this synchronously for non-blocking submissions
/// (`Ok` means "enqueued") and after pipeline completion for blocking ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Generic failure, usually a plain `ERROR` reply from the modem
    Err,

    /// An input parameter was rejected before anything was sent
    ParamErr,

    /// Out of memory: queue full, completion slots exhausted or heap empty
    NoMem,

    /// The command did not produce a terminal reply in time, or a blocking
    /// call gave up waiting. The command itself is not cancelled; its reply
    /// is consumed and discarded when it eventually arrives.
    Timeout,

    /// More data is expected before the operation can complete
    Cont,

    /// The connection is closed or was never opened
    Closed,

    /// The modem reported `busy p...`, a previous command is still running
    InProgress,

    /// The requested feature is not enabled on this connection/driver
    NotEnabled,

    /// The transport reported a failure while exchanging bytes
    NoDevice,

    /// The modem reported `FAIL`, e.g. joining an access point failed
    ConnFail,
}

impl From<AtError> for Error {
    fn from(e: AtError) -> Self {
        match e {
            AtError::Timeout => Error::Timeout,
            AtError::Read | AtError::Write => Error::NoDevice,
            _ => Error::Err,
        }
    }
}
