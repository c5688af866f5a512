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

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic timestamps in nanoseconds.
pub type Nanos = u64;

/// Port to the time source.
pub trait Clock {
    /// The current monotonic time.
    fn now(&self) -> Nanos;
}

/// The default monotonic wall clock.
#[derive(Debug, Clone)]
pub struct SystemClock(quanta::Clock);

impl SystemClock {
    /// Create a calibrated system clock.
    pub fn new() -> Self {
        Self(quanta::Clock::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl From<quanta::Clock> for SystemClock {
    fn from(clock: quanta::Clock) -> Self {
        Self(clock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Nanos {
        let raw = self.0.raw();
        self.0.delta(0, raw).as_nanos() as Nanos
    }
}

/// A clock that only moves when explicitly told to, for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Create a manual clock starting at `now`.
    pub fn new(now: Nanos) -> Self {
        Self(AtomicU64::new(now))
    }

    /// Set the current time.
    pub fn set(&self, now: Nanos) {
        self.0.store(now, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Nanos {
        self.0.load(Ordering::Relaxed)
    }
}
