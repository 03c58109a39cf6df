use thiserror::Error;

use crate::dma::DmaError;

/// Which way the FIFO handshake was supposed to go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoDirection {
    /// Host writes a command or parameter byte
    HostToController,
    /// Host reads a result byte
    ControllerToHost,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloppyError {
    /// The controller never raised "ready" within the poll budget. The byte
    /// was not written and the command in flight is abandoned
    #[error("controller not ready for {direction:?} transfer after {polls} polls")]
    TransientBusy { direction: FifoDirection, polls: u32 },

    /// The controller's DIO bit asked for the opposite transfer direction
    #[error("controller expected the opposite of a {expected:?} transfer (msr {msr:#04x})")]
    ProtocolViolation { expected: FifoDirection, msr: u8 },

    /// The head never settled on the requested cylinder
    #[error("seek to cylinder {cylinder} failed after {attempts} attempts")]
    SeekFailure { cylinder: u8, attempts: u32 },

    /// CRC error, overrun or missing sector persisted through every retry
    #[error("data error at block {lba} (st0 {st0:#04x}, st1 {st1:#04x}, st2 {st2:#04x})")]
    DataError { lba: u32, st0: u8, st1: u8, st2: u8 },

    #[error("disk is write protected")]
    WriteProtected,

    #[error("no interrupt from the controller within {timeout_ms} ms")]
    InterruptTimeout { timeout_ms: u32 },

    /// An interrupt wait was started without a command that generates one
    #[error("waited for an interrupt with no command outstanding")]
    UnexpectedWait,

    #[error("interrupt wait was canceled")]
    Cancelled,

    /// The controller rejected a command as invalid
    #[error("controller rejected command {opcode:#04x}")]
    InvalidCommand { opcode: u8 },

    #[error("blocks {lba}..{lba}+{count} lie outside the disk")]
    OutOfRange { lba: u32, count: u32 },

    /// Buffers must hold a whole, non-zero number of sectors
    #[error("buffer of {len} bytes is not a whole number of sectors")]
    InvalidBuffer { len: usize },

    #[error(transparent)]
    Dma(#[from] DmaError),
}

impl FloppyError {
    /// Faults after which the controller's protocol state is unknown. A reset
    /// has to happen before the next command
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            FloppyError::TransientBusy { .. }
                | FloppyError::ProtocolViolation { .. }
                | FloppyError::SeekFailure { .. }
                | FloppyError::InterruptTimeout { .. }
                | FloppyError::Cancelled
                | FloppyError::InvalidCommand { .. }
        )
    }
}

pub type FloppyResult<T> = Result<T, FloppyError>;
