// Copyright 2025 eraflo
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

//! sysinfo-based implementation of the SystemMemoryProbe trait.

use orama_core::SystemMemoryProbe;
use std::sync::Mutex;
use sysinfo::System;

/// A host memory probe that uses the `sysinfo` crate.
pub struct SysinfoMemoryProbe {
    system: Mutex<System>,
}

impl SysinfoMemoryProbe {
    /// Creates the probe with an initial memory refresh.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl SystemMemoryProbe for SysinfoMemoryProbe {
    fn available_bytes(&self) -> Option<u64> {
        let mut system = self.system.lock().unwrap();
        system.refresh_memory();
        Some(system.available_memory())
    }
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// A probe that reports whatever it is told to. Used by tests and headless
/// tools to stage memory-pressure scenarios.
pub struct FixedMemoryProbe {
    available: Mutex<Option<u64>>,
}

impl FixedMemoryProbe {
    /// Creates a probe reporting `available` bytes.
    pub fn new(available: Option<u64>) -> Self {
        Self {
            available: Mutex::new(available),
        }
    }

    /// Changes the reported headroom.
    pub fn set_available(&self, available: Option<u64>) {
        *self.available.lock().unwrap() = available;
    }
}

impl SystemMemoryProbe for FixedMemoryProbe {
    fn available_bytes(&self) -> Option<u64> {
        *self.available.lock().unwrap()
    }
}
