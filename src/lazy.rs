/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */
use std::sync::OnceLock;

use crate::error::Result;

/// One-shot fallible initialization.
///
/// Everything this crate materializes on demand (object headers, child
/// maps, chunk indexes, decoded chunks) sits behind one of these:
/// the initializer runs at most once across all threads, every concurrent
/// caller observes the same outcome, and a failure is cached and re-raised
/// on every later access to the same handle.
#[derive(Debug, Default)]
pub struct Lazy<T> {
    cell: OnceLock<Result<T>>,
}

impl<T: Clone> Lazy<T> {
    pub fn new() -> Self {
        Lazy {
            cell: OnceLock::new(),
        }
    }

    /// Return the stored value, running `init` first if nothing is stored
    /// yet.  Concurrent callers block until the one running initializer
    /// finishes.
    pub fn get_or_try<F>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.cell.get_or_init(init).clone()
    }

    /// The stored outcome, if initialization has already run.
    pub fn get(&self) -> Option<&Result<T>> {
        self.cell.get()
    }
}

#[cfg(test)]
mod t {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    use super::*;
    use crate::error::Error;

    #[test]
    fn initializes_once_across_threads() {
        let lazy = Arc::new(Lazy::<u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lazy = lazy.clone();
                let runs = runs.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    lazy.get_or_try(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(42)
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_cached() {
        let lazy = Lazy::<u32>::new();
        let err = lazy.get_or_try(|| Err(Error::Closed)).unwrap_err();
        assert!(matches!(err, Error::Closed));

        // The initializer must not get a second chance.
        let err = lazy.get_or_try(|| Ok(1)).unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
