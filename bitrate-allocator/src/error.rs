//! Error types for the bitrate allocator
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


use thiserror::Error;

/// Result type for allocator operations
pub type AllocatorResult<T> = Result<T, AllocatorError>;

/// Errors that can occur when mutating the observer registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// The observer handle is already registered
    #[error("Observer already registered (track: {track_id})")]
    ObserverAlreadyRegistered { track_id: String },

    /// The observer handle is not registered
    #[error("Observer not registered (track: {track_id})")]
    ObserverNotFound { track_id: String },
}
