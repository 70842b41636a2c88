//! Defines the error types and `Result` alias used throughout the `omp-topology` crate.
//!
//! This module provides a centralized way to handle errors that can occur during
//! topology discovery, canonicalization, subset filtering, place-list construction,
//! or thread binding. The primary error type is [`Error`], and the standard
//! `Result` type is aliased as [`Result<T>`] for convenience.

/// A specialized `Result` type for `omp-topology` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of discovery-back-end failure ids. The default discovery
/// policy tries each back-end in turn and only surfaces one of these to the
/// caller when every back-end (including the flat fallback, which cannot
/// fail) has been exhausted -- in practice this only happens when
/// `top_method` pins a single back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DetectionFailure {
    /// CPUID leaf 4 (cache parameters) is not supported by this processor.
    #[error("CPUID leaf 4 is not supported on this processor")]
    NoLeaf4Support,
    /// The APIC is not present or cannot be queried.
    #[error("APIC is not present or could not be queried")]
    ApicNotPresent,
    /// Per-package `max_cores_per_pkg`/`max_threads_per_pkg` figures disagree
    /// across logical processors on the same package.
    #[error("CPUID package topology figures are inconsistent across logical processors")]
    InconsistentCpuidInfo,
    /// The legacy-APIC back-end derived two logical processors with identical
    /// `(package, core, thread)` ids.
    #[error("legacy APIC ids are not unique across logical processors")]
    LegacyApicIdsNotUnique,
    /// `/proc/cpuinfo` contained no processor records at all.
    #[error("/proc/cpuinfo reported no processor records")]
    NoProcRecords,
    /// `/proc/cpuinfo` reported an implausibly large number of processor
    /// records (protects against a runaway parse).
    #[error("/proc/cpuinfo reported an implausible number of processor records")]
    TooManyProcRecords,
    /// A record in `/proc/cpuinfo` was missing a field required to place it
    /// in the topology.
    #[error("/proc/cpuinfo record is missing a required field: {0}")]
    MissingProcField(String),
    /// A line in `/proc/cpuinfo` exceeded the parser's line-length budget.
    #[error("/proc/cpuinfo contained an implausibly long line")]
    LongLineCpuinfo,
    /// No back-end could determine anything about the machine's topology.
    #[error("unable to determine machine topology by any available method")]
    UnknownTopology,
}

/// The primary error enum for all operations within the `omp-topology` crate.
///
/// This enum consolidates four error categories: config errors
/// (`InvalidParameter`, `InvalidCoreId`, `NotFound`), discovery errors
/// (`Detection`), binding errors (`Affinity`, `PermissionDenied`,
/// `SystemCall`), and the general platform/I/O escape hatches
/// (`Unsupported`, `Io`).
#[derive(Debug, Clone, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// A discovery back-end failed with one of the closed [`DetectionFailure`] ids.
    #[error("topology detection error: {0}")]
    Detection(DetectionFailure),

    /// An invalid logical processor (OS id) was supplied to a function.
    #[error("invalid OS processor id: {0}")]
    InvalidCoreId(usize),

    /// No core of the requested type/attribute could be found.
    #[error("no core of type {0} found")]
    NoCoreOfType(String),

    /// An error occurred during thread affinity operations.
    #[error("thread affinity error: {0}")]
    Affinity(String),

    /// The requested operation is not supported on the current OS/back-end.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The operation could not be completed due to insufficient permissions.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An underlying I/O error occurred (reading `/proc`, `/sys`, etc.).
    #[error("I/O error: {0}")]
    Io(String),

    /// A system call failed outside the cases covered by [`Error::Io`].
    #[error("system call error: {0}")]
    SystemCall(String),

    /// A requested resource (layer, place, attribute) was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A configuration value failed validation: unknown layer name,
    /// out-of-range proc id, absurd stride, mutually exclusive attributes,
    /// malformed grammar, empty subset result.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested feature is not yet implemented.
    #[error("operation not implemented")]
    NotImplemented,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
