// Nasmon - NAS enclosure and disk statistics agent
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

#![cfg(test)]

use crate::sensor::core::{I2cBus, SensorError, SensorErrorKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// I2cBus implementation backed by a map of register (or command) to bytes.
///
/// Every write sets the register pointer to its first byte and is recorded so
/// tests can verify the commands a driver sent. Reads return bytes stored for
/// the current pointer, zero padded if fewer bytes are stored than requested.
#[derive(Debug, Default)]
pub(crate) struct MockI2cBus {
    registers: HashMap<u8, Vec<u8>>,
    pointer: u8,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_reads: bool,
}

impl MockI2cBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_register(mut self, register: u8, bytes: &[u8]) -> Self {
        self.registers.insert(register, bytes.to_vec());
        self
    }

    pub(crate) fn with_word(self, register: u8, value: u16) -> Self {
        self.with_register(register, &value.to_be_bytes())
    }

    /// Shared handle to every write made, usable after the bus is moved into a driver.
    pub(crate) fn write_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.writes.clone()
    }

    pub(crate) fn failing() -> Self {
        MockI2cBus {
            fail_reads: true,
            ..Default::default()
        }
    }
}

impl I2cBus for MockI2cBus {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SensorError> {
        if let Some(&register) = bytes.first() {
            self.pointer = register;
        }

        self.writes.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<(), SensorError> {
        if self.fail_reads {
            return Err(SensorError::KindMsg(SensorErrorKind::Read, "mock read failure"));
        }

        buffer.iter_mut().for_each(|b| *b = 0);
        if let Some(bytes) = self.registers.get(&self.pointer) {
            let len = bytes.len().min(buffer.len());
            buffer[..len].copy_from_slice(&bytes[..len]);
        }

        Ok(())
    }

    fn write_read(&mut self, bytes: &[u8], buffer: &mut [u8]) -> Result<(), SensorError> {
        self.write(bytes)?;
        self.read(buffer)
    }
}
