//! Debug-only single-writer assertion
//!
//! The allocator is not locked. Every entry point asserts it runs on the
//! thread that first used it; release builds compile the check away.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


#[cfg(debug_assertions)]
use std::sync::OnceLock;
#[cfg(debug_assertions)]
use std::thread::{self, ThreadId};

/// Binds to the first thread that calls [`SequenceChecker::is_current`]
#[derive(Debug, Default)]
pub struct SequenceChecker {
    #[cfg(debug_assertions)]
    bound: OnceLock<ThreadId>,
}

impl SequenceChecker {
    /// Create a detached checker
    pub fn new() -> Self {
        Self::default()
    }

    /// True if called on the bound thread, binding it on first use
    pub fn is_current(&self) -> bool {
        #[cfg(debug_assertions)]
        {
            let current = thread::current().id();
            *self.bound.get_or_init(|| current) == current
        }
        #[cfg(not(debug_assertions))]
        {
            true
        }
    }

    /// Forget the bound thread so the next caller binds again
    pub fn detach(&mut self) {
        #[cfg(debug_assertions)]
        {
            self.bound = OnceLock::new();
        }
    }
}
