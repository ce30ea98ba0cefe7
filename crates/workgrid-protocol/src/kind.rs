use crate::error::Error;
use crate::error::Error::BufferTooSmall;

/// Size in bytes of a kind tag on the wire.
pub const KIND_SIZE: usize = 3;

/// The 3-byte ASCII tag prepended to every request payload. The set is
/// closed: a payload carrying any other tag is dropped by the listener
/// before it reaches a dispatcher.
///
/// `Halt` and `WorkerDied` are dispatcher-internal sentinels; listeners
/// refuse them when they arrive over the network.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Kind {
    /// `ALV` - liveness probe, answered with `IMALIVE`.
    CheckAlive,
    /// `TSK` - submit a task for execution.
    SubmitTask,
    /// `TRM` - terminate a running task.
    TerminateTask,
    /// `RSL` - fetch a task's result.
    GetResult,
    /// `TRN` - is the task still running?
    TaskRunning,
    /// `EXC` - fetch the exception a task raised.
    GetException,
    /// `EXR` - did the task raise an exception?
    ExceptionRaised,
    /// `EVS` - set an event.
    SetEvent,
    /// `EVR` - register an event on the workers.
    RegisterEvent,
    /// `QUR` - register a queue on the workers.
    RegisterQueue,
    /// `QUP` - put an item on a queue.
    PutOnQueue,
    /// `QUG` - request the next item from a queue.
    GetFromQueue,
    /// `LCR` - register a lock on the workers.
    RegisterLock,
    /// `LCA` - acquire a lock.
    AcquireLock,
    /// `LCU` - release a lock; also the wake signal sent to a granted waiter.
    ReleaseLock,
    /// `SER` - register a semaphore on the workers.
    RegisterSemaphore,
    /// `SEA` - acquire a semaphore permit.
    AcquireSemaphore,
    /// `SEU` - release a semaphore permit; also the grant signal.
    ReleaseSemaphore,
    /// `MNS` - shared-map set.
    MapSet,
    /// `MNG` - shared-map get.
    MapGet,
    /// `MNK` - shared-map key listing.
    MapKeys,
    /// `CON` - shared-map contains test.
    MapContains,
    /// `LGH` - shared-map length.
    MapLength,
    /// `NPR` - print on the master.
    NetPrint,
    /// `NCR` - register a net class on the workers.
    RegisterNetClass,
    /// `HLT` - dispatcher shutdown sentinel.
    Halt,
    /// `DWR` - internal worker-died follow-up.
    WorkerDied,
}

impl Kind {
    /// Returns the on-the-wire representation of this kind.
    pub const fn wire_value(&self) -> [u8; KIND_SIZE] {
        match self {
            Kind::CheckAlive => *b"ALV",
            Kind::SubmitTask => *b"TSK",
            Kind::TerminateTask => *b"TRM",
            Kind::GetResult => *b"RSL",
            Kind::TaskRunning => *b"TRN",
            Kind::GetException => *b"EXC",
            Kind::ExceptionRaised => *b"EXR",
            Kind::SetEvent => *b"EVS",
            Kind::RegisterEvent => *b"EVR",
            Kind::RegisterQueue => *b"QUR",
            Kind::PutOnQueue => *b"QUP",
            Kind::GetFromQueue => *b"QUG",
            Kind::RegisterLock => *b"LCR",
            Kind::AcquireLock => *b"LCA",
            Kind::ReleaseLock => *b"LCU",
            Kind::RegisterSemaphore => *b"SER",
            Kind::AcquireSemaphore => *b"SEA",
            Kind::ReleaseSemaphore => *b"SEU",
            Kind::MapSet => *b"MNS",
            Kind::MapGet => *b"MNG",
            Kind::MapKeys => *b"MNK",
            Kind::MapContains => *b"CON",
            Kind::MapLength => *b"LGH",
            Kind::NetPrint => *b"NPR",
            Kind::RegisterNetClass => *b"NCR",
            Kind::Halt => *b"HLT",
            Kind::WorkerDied => *b"DWR",
        }
    }

    /// Return the `Kind` for the first three bytes of `bytes`, or
    /// `Error::InvalidKind` if they do not name one.
    pub const fn from_wire(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < KIND_SIZE {
            return Err(BufferTooSmall(KIND_SIZE, bytes.len()));
        }

        match [bytes[0], bytes[1], bytes[2]] {
            [b'A', b'L', b'V'] => Ok(Kind::CheckAlive),
            [b'T', b'S', b'K'] => Ok(Kind::SubmitTask),
            [b'T', b'R', b'M'] => Ok(Kind::TerminateTask),
            [b'R', b'S', b'L'] => Ok(Kind::GetResult),
            [b'T', b'R', b'N'] => Ok(Kind::TaskRunning),
            [b'E', b'X', b'C'] => Ok(Kind::GetException),
            [b'E', b'X', b'R'] => Ok(Kind::ExceptionRaised),
            [b'E', b'V', b'S'] => Ok(Kind::SetEvent),
            [b'E', b'V', b'R'] => Ok(Kind::RegisterEvent),
            [b'Q', b'U', b'R'] => Ok(Kind::RegisterQueue),
            [b'Q', b'U', b'P'] => Ok(Kind::PutOnQueue),
            [b'Q', b'U', b'G'] => Ok(Kind::GetFromQueue),
            [b'L', b'C', b'R'] => Ok(Kind::RegisterLock),
            [b'L', b'C', b'A'] => Ok(Kind::AcquireLock),
            [b'L', b'C', b'U'] => Ok(Kind::ReleaseLock),
            [b'S', b'E', b'R'] => Ok(Kind::RegisterSemaphore),
            [b'S', b'E', b'A'] => Ok(Kind::AcquireSemaphore),
            [b'S', b'E', b'U'] => Ok(Kind::ReleaseSemaphore),
            [b'M', b'N', b'S'] => Ok(Kind::MapSet),
            [b'M', b'N', b'G'] => Ok(Kind::MapGet),
            [b'M', b'N', b'K'] => Ok(Kind::MapKeys),
            [b'C', b'O', b'N'] => Ok(Kind::MapContains),
            [b'L', b'G', b'H'] => Ok(Kind::MapLength),
            [b'N', b'P', b'R'] => Ok(Kind::NetPrint),
            [b'N', b'C', b'R'] => Ok(Kind::RegisterNetClass),
            [b'H', b'L', b'T'] => Ok(Kind::Halt),
            [b'D', b'W', b'R'] => Ok(Kind::WorkerDied),
            [a, b, c] => Err(Error::InvalidKind(u32::from_be_bytes([0, a, b, c]))),
        }
    }

    /// Kinds that only ever originate inside a dispatcher. Listeners drop
    /// them when a peer sends them over the network.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Kind::Halt | Kind::WorkerDied)
    }
}
