//! JIT scaffolding. A backend may precompile verified bytecode to native
//! code; the contract is that compiled execution is indistinguishable from
//! the interpreter in everything but latency, and that a compile-time
//! failure falls back to the interpreter transparently.
//!
//! Code pages follow a strict lifecycle: allocate writable, fill, seal to
//! read+execute, and release when the owner drops. Release happens on
//! every exit path because it lives in `Drop`.

use crate::BpfProgram;
use log::debug;
use std::ptr::NonNull;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JitError {
    #[error("backend {backend} does not support this program: {reason}")]
    Unsupported {
        backend: &'static str,
        reason: String,
    },
    #[error("failed to allocate {size} bytes of code memory")]
    AllocationFailed { size: usize },
    #[error("failed to seal code memory to read+execute")]
    SealFailed,
    #[error("cannot allocate an empty code buffer")]
    Empty,
}

/// Native code pages with explicit lifecycle management. After `new`
/// returns, the pages are sealed read+execute; the writable window never
/// outlives the constructor.
#[derive(Debug)]
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// the pages are never written after sealing
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl ExecutableMemory {
    pub fn new(code: &[u8]) -> Result<Self, JitError> {
        if code.is_empty() {
            return Err(JitError::Empty);
        }
        let len = code.len();
        // allocate writable
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(JitError::AllocationFailed { size: len });
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or(JitError::AllocationFailed { size: len })?;
        // fill
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.as_ptr(), len);
        }
        // seal to read+execute
        let sealed = unsafe {
            libc::mprotect(
                ptr.as_ptr() as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if sealed != 0 {
            unsafe {
                libc::munmap(ptr.as_ptr() as *mut libc::c_void, len);
            }
            return Err(JitError::SealFailed);
        }
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A compiled program: the sealed pages plus bookkeeping.
#[derive(Debug)]
pub struct CompiledProgram {
    pub memory: ExecutableMemory,
    pub backend: &'static str,
}

/// A native-code backend. Implementations must preserve the interpreter's
/// register semantics, every fault point, and observable side-effect order;
/// they may only differ in latency.
pub trait JitBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compile `program` or decline with `JitError::Unsupported`; the
    /// caller falls back to the interpreter either way.
    fn compile(&self, program: &BpfProgram) -> Result<CompiledProgram, JitError>;
}

/// The default backend: declines every program. No target-ISA emitter is
/// shipped; the scaffold exists so a real backend slots in behind the same
/// trait without touching the engine.
pub struct NullJitBackend;

impl JitBackend for NullJitBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn compile(&self, _program: &BpfProgram) -> Result<CompiledProgram, JitError> {
        debug!("null jit backend declining compilation");
        Err(JitError::Unsupported {
            backend: self.name(),
            reason: "no native emitter for this target".to_string(),
        })
    }
}
