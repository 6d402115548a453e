//! Buffer acquisition and the dimension overflow guard.
//!
//! The engines never allocate their own outputs. Scratch and result buffers
//! come from a [`BufferService`]; release is scoped (the returned `Vec`s free
//! themselves on drop, including on early-return and abort paths).
//!
//! Before any buffer whose size is a product of state count and sequence
//! length is requested, callers consult [`check_dimensions`]: the byte size
//! arithmetic is checked up front rather than after a failed allocation.

use core::mem::size_of;

use cyanea_core::{CyaneaError, OverflowLevel, Result};

use crate::matrix::Matrix;

/// Source of exclusively owned, zero-initialized buffers.
///
/// Implementations must never hand out shared or resized storage. A failed
/// request is reported as [`CyaneaError::Allocation`].
pub trait BufferService: Sync {
    /// A zero-filled `f64` buffer of exactly `len` elements.
    fn allocate(&self, len: usize) -> Result<Vec<f64>>;

    /// A zero-filled index buffer of exactly `len` elements.
    fn allocate_indices(&self, len: usize) -> Result<Vec<usize>>;

    /// A zero-filled `rows × cols` matrix.
    fn allocate_matrix(&self, rows: usize, cols: usize) -> Result<Matrix> {
        let len = rows.checked_mul(cols).ok_or_else(|| {
            CyaneaError::Allocation(format!("{rows}x{cols} matrix overflows usize"))
        })?;
        Matrix::from_vec(self.allocate(len)?, rows, cols)
    }
}

/// Heap-backed [`BufferService`] using fallible reservation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapBuffers;

fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        CyaneaError::Allocation(format!(
            "{len} elements of {} bytes: {e}",
            size_of::<T>()
        ))
    })?;
    buf.resize(len, value);
    Ok(buf)
}

impl BufferService for HeapBuffers {
    fn allocate(&self, len: usize) -> Result<Vec<f64>> {
        try_filled(len, 0.0)
    }

    fn allocate_indices(&self, len: usize) -> Result<Vec<usize>> {
        try_filled(len, 0)
    }
}

// ---------------------------------------------------------------------------
// Overflow guard
// ---------------------------------------------------------------------------

/// Largest byte size a single Rust allocation may have.
const MAX_ALLOC_BYTES: usize = isize::MAX as usize;

/// Which structures, if any, a `(n_states, seq_len)` shape would overflow.
///
/// `None` means every training buffer is addressable. `XiOnly` still allows
/// forward-only work (evaluation, decoding); `All` allows nothing.
pub fn overflow_level(n_states: usize, seq_len: usize) -> Option<OverflowLevel> {
    let per_table = n_states
        .checked_mul(size_of::<f64>())
        .and_then(|b| b.checked_mul(seq_len))
        .filter(|&b| b <= MAX_ALLOC_BYTES);
    let Some(per_table) = per_table else {
        return Some(OverflowLevel::All);
    };
    match per_table
        .checked_mul(n_states)
        .filter(|&b| b <= MAX_ALLOC_BYTES)
    {
        Some(_) => None,
        None => Some(OverflowLevel::XiOnly),
    }
}

/// Fail with [`CyaneaError::Overflow`] if any structure would overflow.
///
/// # Errors
///
/// Returns the overflow level as an error.
pub fn check_dimensions(n_states: usize, seq_len: usize) -> Result<()> {
    match overflow_level(n_states, seq_len) {
        Some(level) => Err(CyaneaError::Overflow(level)),
        None => Ok(()),
    }
}

/// Like [`check_dimensions`], but tolerates [`OverflowLevel::XiOnly`].
///
/// For callers that never build xi (evaluation and decoding).
///
/// # Errors
///
/// Returns [`CyaneaError::Overflow`] with [`OverflowLevel::All`].
pub fn check_dimensions_without_xi(n_states: usize, seq_len: usize) -> Result<()> {
    match overflow_level(n_states, seq_len) {
        Some(OverflowLevel::All) => Err(CyaneaError::Overflow(OverflowLevel::All)),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Grants a fixed number of allocations, then fails every request.
    #[derive(Debug)]
    pub(crate) struct LimitedBuffers {
        remaining: AtomicUsize,
        pub(crate) requests: AtomicUsize,
    }

    impl LimitedBuffers {
        pub(crate) fn new(grants: usize) -> Self {
            Self {
                remaining: AtomicUsize::new(grants),
                requests: AtomicUsize::new(0),
            }
        }

        fn grant(&self) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map(|_| ())
                .map_err(|_| CyaneaError::Allocation("allocation budget exhausted".into()))
        }
    }

    impl BufferService for LimitedBuffers {
        fn allocate(&self, len: usize) -> Result<Vec<f64>> {
            self.grant()?;
            HeapBuffers.allocate(len)
        }

        fn allocate_indices(&self, len: usize) -> Result<Vec<usize>> {
            self.grant()?;
            HeapBuffers.allocate_indices(len)
        }
    }
}
