// Copyright 2025 RisingWave Labs
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

use std::time::Duration;

use derive_builder::Builder;

use crate::clock::Nanos;

/// Configuration for span inference, which affects the behavior of all roots
/// constructed with it.
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct Config {
    /// Inferred spans with an observed lifetime shorter than this are dropped
    /// during spanification.
    min_duration: Duration,

    /// Number of call tree nodes the pool keeps ready for reuse. Acquiring
    /// beyond it falls back to direct allocation.
    pool_capacity: usize,

    /// Whether the external sampling scheduler should start profiling
    /// sessions on its own. Not consumed by the engine itself.
    start_scheduled_profiling: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_duration: Duration::ZERO,
            pool_capacity: 512,
            start_scheduled_profiling: true,
        }
    }
}

impl Config {
    /// The minimum observed lifetime of an emitted inferred span.
    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    pub(crate) fn min_nanos(&self) -> Nanos {
        self.min_duration.as_nanos() as Nanos
    }

    /// The number of pooled call tree nodes.
    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    /// Whether the external scheduler is active.
    pub fn start_scheduled_profiling(&self) -> bool {
        self.start_scheduled_profiling
    }
}
