//! Parallel per-method processing.
//!
//! The [`MethodProcessor`] runs one task per method on a rayon pool, for both the
//! read-only analysis sweep and the rewriting sweep after a lens was installed.
//! Tasks never wait on each other; the only synchronization is the submit-all /
//! await-all boundary around each sweep.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::{
    analysis::IrCode,
    compiler::{CompilerContext, CompilerOptions},
    graph::MethodRef,
    Result,
};

/// Runs per-method work in parallel over the bodies of a [`CompilerContext`].
pub struct MethodProcessor<'a> {
    ctx: &'a CompilerContext,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> MethodProcessor<'a> {
    /// Creates a processor, with a dedicated pool if `options.threads` is set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the thread pool cannot be created.
    pub fn new(ctx: &'a CompilerContext, options: &CompilerOptions) -> Result<Self> {
        let pool = match options.threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| internal_error!("Failed to create thread pool: {}", e))?,
            ),
            None => None,
        };
        Ok(Self { ctx, pool })
    }

    /// Calls `f` on the body of every method in `methods`, in no particular order.
    ///
    /// Methods without a body are skipped. Bodies are only read, so `f` may run
    /// concurrently with other readers of the context.
    pub fn scan<F>(&self, methods: &[MethodRef], f: F)
    where
        F: Fn(&IrCode) + Send + Sync,
    {
        let sweep = || {
            methods.par_iter().for_each(|method| {
                if let Some(code) = self.ctx.codes.get(method) {
                    f(code.value());
                }
            });
        };
        self.install(sweep);
    }

    /// Calls `f` with exclusive access to the body of every method in `methods`.
    ///
    /// Each body is removed from the context while `f` runs and inserted again
    /// afterwards, whether or not `f` succeeded.
    ///
    /// # Returns
    ///
    /// The number of bodies for which `f` reported a change.
    ///
    /// # Errors
    ///
    /// Returns the first error `f` produced.
    pub fn process<F>(&self, methods: &[MethodRef], f: F) -> Result<usize>
    where
        F: Fn(&mut IrCode) -> Result<bool> + Send + Sync,
    {
        let changed = AtomicUsize::new(0);
        let sweep = || {
            methods.par_iter().try_for_each(|method| {
                // Remove the body (brief lock, then released)
                let Some((key, mut code)) = self.ctx.codes.remove(method) else {
                    return Ok(());
                };
                let result = f(&mut code);
                self.ctx.codes.insert(key, code);
                if result? {
                    changed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            })
        };
        self.install(sweep)?;
        Ok(changed.load(Ordering::Relaxed))
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}
