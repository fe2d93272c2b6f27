use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HsaError>;

/// Status codes of the HSA runtime API, with their ABI values.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0x0,
    InfoBreak = 0x1,
    Error = 0x1000,
    InvalidArgument = 0x1001,
    InvalidQueueCreation = 0x1002,
    InvalidAllocation = 0x1003,
    InvalidAgent = 0x1004,
    InvalidRegion = 0x1005,
    InvalidSignal = 0x1006,
    InvalidQueue = 0x1007,
    OutOfResources = 0x1008,
    InvalidPacketFormat = 0x1009,
    ResourceFree = 0x100A,
    NotInitialized = 0x100B,
    RefcountOverflow = 0x100C,
    IncompatibleArguments = 0x100D,
    InvalidIndex = 0x100E,
    InvalidIsa = 0x100F,
    InvalidCodeObject = 0x1010,
    InvalidExecutable = 0x1011,
    FrozenExecutable = 0x1012,
    InvalidSymbolName = 0x1013,
    VariableAlreadyDefined = 0x1014,
    VariableUndefined = 0x1015,
    Exception = 0x1016,
    InvalidIsaName = 0x1017,
    InvalidCodeSymbol = 0x1018,
    InvalidExecutableSymbol = 0x1019,
    InvalidFile = 0x1020,
    InvalidCodeObjectReader = 0x1021,
    InvalidCache = 0x1022,
    InvalidWavefront = 0x1023,
    InvalidSignalGroup = 0x1024,
    InvalidRuntimeState = 0x1025,
    Fatal = 0x1026,
}

impl Status {
    pub const ALL: [Status; 35] = [
        Status::Success,
        Status::InfoBreak,
        Status::Error,
        Status::InvalidArgument,
        Status::InvalidQueueCreation,
        Status::InvalidAllocation,
        Status::InvalidAgent,
        Status::InvalidRegion,
        Status::InvalidSignal,
        Status::InvalidQueue,
        Status::OutOfResources,
        Status::InvalidPacketFormat,
        Status::ResourceFree,
        Status::NotInitialized,
        Status::RefcountOverflow,
        Status::IncompatibleArguments,
        Status::InvalidIndex,
        Status::InvalidIsa,
        Status::InvalidCodeObject,
        Status::InvalidExecutable,
        Status::FrozenExecutable,
        Status::InvalidSymbolName,
        Status::VariableAlreadyDefined,
        Status::VariableUndefined,
        Status::Exception,
        Status::InvalidIsaName,
        Status::InvalidCodeSymbol,
        Status::InvalidExecutableSymbol,
        Status::InvalidFile,
        Status::InvalidCodeObjectReader,
        Status::InvalidCache,
        Status::InvalidWavefront,
        Status::InvalidSignalGroup,
        Status::InvalidRuntimeState,
        Status::Fatal,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_raw() == raw)
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn is_error(self) -> bool {
        self.as_raw() >= Status::Error.as_raw()
    }

    /// Program-facing text for the status, in the wording of the HSA
    /// programmer's reference.
    pub fn description(self) -> &'static str {
        match self {
            Status::Success => "HSA_STATUS_SUCCESS: The function has been executed successfully.",
            Status::InfoBreak => {
                "HSA_STATUS_INFO_BREAK: A traversal over a list of elements has been interrupted by the application before completing."
            }
            Status::Error => "HSA_STATUS_ERROR: A generic error has occurred.",
            Status::InvalidArgument => {
                "HSA_STATUS_ERROR_INVALID_ARGUMENT: One of the actual arguments does not meet a precondition stated in the documentation of the corresponding formal argument."
            }
            Status::InvalidQueueCreation => {
                "HSA_STATUS_ERROR_INVALID_QUEUE_CREATION: The requested queue creation is not valid."
            }
            Status::InvalidAllocation => {
                "HSA_STATUS_ERROR_INVALID_ALLOCATION: The requested allocation is not valid."
            }
            Status::InvalidAgent => "HSA_STATUS_ERROR_INVALID_AGENT: The agent is invalid.",
            Status::InvalidRegion => "HSA_STATUS_ERROR_INVALID_REGION: The memory region is invalid.",
            Status::InvalidSignal => "HSA_STATUS_ERROR_INVALID_SIGNAL: The signal is invalid.",
            Status::InvalidQueue => "HSA_STATUS_ERROR_INVALID_QUEUE: The queue is invalid.",
            Status::OutOfResources => {
                "HSA_STATUS_ERROR_OUT_OF_RESOURCES: The runtime failed to allocate the necessary resources."
            }
            Status::InvalidPacketFormat => {
                "HSA_STATUS_ERROR_INVALID_PACKET_FORMAT: The AQL packet is malformed."
            }
            Status::ResourceFree => {
                "HSA_STATUS_ERROR_RESOURCE_FREE: An error has been detected while releasing a resource."
            }
            Status::NotInitialized => {
                "HSA_STATUS_ERROR_NOT_INITIALIZED: An API other than hsa_init has been invoked while the reference count of the HSA runtime is zero."
            }
            Status::RefcountOverflow => {
                "HSA_STATUS_ERROR_REFCOUNT_OVERFLOW: The maximum reference count for the object has been reached."
            }
            Status::IncompatibleArguments => {
                "HSA_STATUS_ERROR_INCOMPATIBLE_ARGUMENTS: The arguments passed to a functions are not compatible."
            }
            Status::InvalidIndex => "HSA_STATUS_ERROR_INVALID_INDEX: The index is invalid.",
            Status::InvalidIsa => "HSA_STATUS_ERROR_INVALID_ISA: The instruction set architecture is invalid.",
            Status::InvalidCodeObject => "HSA_STATUS_ERROR_INVALID_CODE_OBJECT: The code object is invalid.",
            Status::InvalidExecutable => "HSA_STATUS_ERROR_INVALID_EXECUTABLE: The executable is invalid.",
            Status::FrozenExecutable => "HSA_STATUS_ERROR_FROZEN_EXECUTABLE: The executable is frozen.",
            Status::InvalidSymbolName => {
                "HSA_STATUS_ERROR_INVALID_SYMBOL_NAME: There is no symbol with the given name."
            }
            Status::VariableAlreadyDefined => {
                "HSA_STATUS_ERROR_VARIABLE_ALREADY_DEFINED: The variable is already defined."
            }
            Status::VariableUndefined => "HSA_STATUS_ERROR_VARIABLE_UNDEFINED: The variable is undefined.",
            Status::Exception => {
                "HSA_STATUS_ERROR_EXCEPTION: An HSAIL operation resulted in a hardware exception."
            }
            Status::InvalidIsaName => {
                "HSA_STATUS_ERROR_INVALID_ISA_NAME: The instruction set architecture name is invalid."
            }
            Status::InvalidCodeSymbol => "HSA_STATUS_ERROR_INVALID_CODE_SYMBOL: The code object symbol is invalid.",
            Status::InvalidExecutableSymbol => {
                "HSA_STATUS_ERROR_INVALID_EXECUTABLE_SYMBOL: The executable symbol is invalid."
            }
            Status::InvalidFile => "HSA_STATUS_ERROR_INVALID_FILE: The file descriptor is invalid.",
            Status::InvalidCodeObjectReader => {
                "HSA_STATUS_ERROR_INVALID_CODE_OBJECT_READER: The code object reader is invalid."
            }
            Status::InvalidCache => "HSA_STATUS_ERROR_INVALID_CACHE: The cache is invalid.",
            Status::InvalidWavefront => "HSA_STATUS_ERROR_INVALID_WAVEFRONT: The wavefront is invalid.",
            Status::InvalidSignalGroup => "HSA_STATUS_ERROR_INVALID_SIGNAL_GROUP: The signal group is invalid.",
            Status::InvalidRuntimeState => {
                "HSA_STATUS_ERROR_INVALID_RUNTIME_STATE: The HSA runtime is not in the configuration state."
            }
            Status::Fatal => "HSA_STATUS_ERROR_FATAL: The runtime encountered a fatal error.",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:x})", self, self.as_raw())
    }
}

#[derive(Debug, Error)]
pub enum HsaError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Queue creation failed: {0}")]
    InvalidQueueCreation(String),

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Invalid agent: {0}")]
    InvalidAgent(String),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid queue: {0}")]
    InvalidQueue(String),

    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Invalid packet format: {0}")]
    InvalidPacketFormat(String),

    #[error("Runtime not initialized: {0}")]
    NotInitialized(String),

    #[error("Reference count overflow: {0}")]
    RefcountOverflow(String),

    #[error("Incompatible arguments: {0}")]
    IncompatibleArguments(String),

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Invalid code object: {0}")]
    InvalidCodeObject(String),

    #[error("Invalid executable: {0}")]
    InvalidExecutable(String),

    #[error("Frozen executable: {0}")]
    FrozenExecutable(String),

    #[error("Invalid symbol name: {0}")]
    InvalidSymbolName(String),

    #[error("Variable already defined: {0}")]
    VariableAlreadyDefined(String),

    #[error("Variable undefined: {0}")]
    VariableUndefined(String),

    #[error("Fatal HSA error: {0}")]
    Fatal(String),

    #[error("HSA error {status}: {description}")]
    HsaStatus { status: u32, description: String },

    #[error("No agent matching {0} found")]
    AgentNotFound(&'static str),

    #[error("Required memory region not found")]
    MemoryRegionNotFound,

    #[error("Thread group capacity {capacity} exceeded: {requested} work items requested")]
    CapacityExceeded { capacity: usize, requested: usize },

    #[error("Thread group started while a round is still in flight")]
    GroupBusy,

    #[error("Thread group started after exit")]
    GroupExited,

    #[error("Case skipped: {0}")]
    CaseSkipped(String),

    #[error("String conversion error")]
    StringConversionError,
}

impl HsaError {
    pub fn from_status(status: Status) -> Self {
        Self::from_status_with_context(status, status.description())
    }

    pub fn from_status_with_context(status: Status, context: impl Into<String>) -> Self {
        let msg = context.into();

        match status {
            Status::InvalidArgument => Self::InvalidArgument(msg),
            Status::InvalidQueueCreation => Self::InvalidQueueCreation(msg),
            Status::InvalidAllocation => Self::InvalidAllocation(msg),
            Status::InvalidAgent => Self::InvalidAgent(msg),
            Status::InvalidRegion => Self::InvalidRegion(msg),
            Status::InvalidSignal => Self::InvalidSignal(msg),
            Status::InvalidQueue => Self::InvalidQueue(msg),
            Status::OutOfResources => Self::OutOfResources(msg),
            Status::InvalidPacketFormat => Self::InvalidPacketFormat(msg),
            Status::NotInitialized => Self::NotInitialized(msg),
            Status::RefcountOverflow => Self::RefcountOverflow(msg),
            Status::IncompatibleArguments => Self::IncompatibleArguments(msg),
            Status::InvalidIndex => Self::InvalidIndex(msg),
            Status::InvalidCodeObject => Self::InvalidCodeObject(msg),
            Status::InvalidExecutable => Self::InvalidExecutable(msg),
            Status::FrozenExecutable => Self::FrozenExecutable(msg),
            Status::InvalidSymbolName => Self::InvalidSymbolName(msg),
            Status::VariableAlreadyDefined => Self::VariableAlreadyDefined(msg),
            Status::VariableUndefined => Self::VariableUndefined(msg),
            Status::Fatal => Self::Fatal(msg),
            // Success and InfoBreak shouldn't reach here, but handle gracefully
            other => Self::HsaStatus {
                status: other.as_raw(),
                description: msg,
            },
        }
    }

    /// Status code this error stands for. Harness-side errors that have no
    /// runtime counterpart report the generic `Status::Error`.
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidArgument(_) => Status::InvalidArgument,
            Self::InvalidQueueCreation(_) => Status::InvalidQueueCreation,
            Self::InvalidAllocation(_) => Status::InvalidAllocation,
            Self::InvalidAgent(_) => Status::InvalidAgent,
            Self::InvalidRegion(_) => Status::InvalidRegion,
            Self::InvalidSignal(_) => Status::InvalidSignal,
            Self::InvalidQueue(_) => Status::InvalidQueue,
            Self::OutOfResources(_) => Status::OutOfResources,
            Self::InvalidPacketFormat(_) => Status::InvalidPacketFormat,
            Self::NotInitialized(_) => Status::NotInitialized,
            Self::RefcountOverflow(_) => Status::RefcountOverflow,
            Self::IncompatibleArguments(_) => Status::IncompatibleArguments,
            Self::InvalidIndex(_) => Status::InvalidIndex,
            Self::InvalidCodeObject(_) => Status::InvalidCodeObject,
            Self::InvalidExecutable(_) => Status::InvalidExecutable,
            Self::FrozenExecutable(_) => Status::FrozenExecutable,
            Self::InvalidSymbolName(_) => Status::InvalidSymbolName,
            Self::VariableAlreadyDefined(_) => Status::VariableAlreadyDefined,
            Self::VariableUndefined(_) => Status::VariableUndefined,
            Self::Fatal(_) => Status::Fatal,
            Self::HsaStatus { status, .. } => Status::from_raw(*status).unwrap_or(Status::Error),
            Self::AgentNotFound(_)
            | Self::MemoryRegionNotFound
            | Self::CapacityExceeded { .. }
            | Self::GroupBusy
            | Self::GroupExited
            | Self::CaseSkipped(_)
            | Self::StringConversionError => Status::Error,
        }
    }
}

/// Collapses a call result into the status the runtime reported.
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Success,
        Err(err) => err.status(),
    }
}

/// Asserts that a runtime call produced one of the expected statuses.
///
/// A mismatch panics with the expected pattern, the actual status and the
/// caller's source location; conformance failures are never recovered from.
///
/// ```
/// use hsa_cts::{assert_status, HsaError, Status};
///
/// let result: hsa_cts::Result<()> = Err(HsaError::from_status(Status::InvalidSignal));
/// assert_status!(result, Status::InvalidSignal | Status::InvalidArgument);
/// ```
#[macro_export]
macro_rules! assert_status {
    ($result:expr, $($expected:pat_param)|+ $(,)?) => {{
        let result = &$result;
        let actual = $crate::error::status_of(result);
        if !matches!(actual, $($expected)|+) {
            let detail = match result {
                Ok(_) => ::std::string::String::from("call succeeded"),
                Err(err) => ::std::string::ToString::to_string(err),
            };
            panic!(
                "status mismatch for `{}`: expected {}, got {} ({})",
                stringify!($result),
                stringify!($($expected)|+),
                actual,
                detail
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_round_trip_through_from_raw() {
        for status in Status::ALL {
            assert_eq!(Status::from_raw(status.as_raw()), Some(status));
        }
        assert_eq!(Status::from_raw(0x2000), None);
    }

    #[test]
    fn abi_values_match_hsa_header() {
        assert_eq!(Status::InvalidSignal.as_raw(), 0x1006);
        assert_eq!(Status::NotInitialized.as_raw(), 0x100B);
        assert_eq!(Status::RefcountOverflow.as_raw(), 0x100C);
        assert_eq!(Status::Fatal.as_raw(), 0x1026);
    }

    #[test]
    fn error_maps_back_to_its_status() {
        for status in Status::ALL.into_iter().filter(|s| s.is_error()) {
            assert_eq!(HsaError::from_status(status).status(), status);
        }
    }

    #[test]
    fn context_is_kept_in_message() {
        let err = HsaError::from_status_with_context(Status::InvalidQueue, "queue 0x42");
        assert!(err.to_string().contains("queue 0x42"));
    }

    #[test]
    fn info_statuses_are_not_errors() {
        assert!(!Status::Success.is_error());
        assert!(!Status::InfoBreak.is_error());
        assert!(Status::Error.is_error());
    }

    #[test]
    fn assert_status_accepts_alternatives() {
        let result: Result<()> = Err(HsaError::from_status(Status::InvalidArgument));
        assert_status!(result, Status::InvalidSignal | Status::InvalidArgument);
        let ok: Result<u8> = Ok(1);
        assert_status!(ok, Status::Success);
    }

    #[test]
    #[should_panic(expected = "status mismatch")]
    fn assert_status_panics_on_mismatch() {
        let result: Result<()> = Ok(());
        assert_status!(result, Status::NotInitialized);
    }
}
