// Weatherpi - Environmental sampling job for a Raspberry PI
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

use crate::sensor::bmp280::{CALIBRATION_SIZE, CHIP_ID, REG_CALIBRATION, REG_CHIP_ID, REG_DATA, REG_STATUS};
use crate::sensor::core::{
    DataPin, Humidity, HumiditySensor, PressureHpa, PressureSensor, RegisterBus, SensorError, SensorErrorKind,
    TemperatureCelsius,
};
use crate::sensor::dht::FRAME_SIZE;
use rppal::gpio::Mode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const LOW_CYCLE_COUNT: u32 = 400;
const ONE_CYCLE_COUNT: u32 = 600;
const ZERO_CYCLE_COUNT: u32 = 200;

/// DataPin that reports fixed levels forever. Reporting both low and high
/// means the pin never transitions, reporting neither means every transition
/// takes zero cycles.
pub(crate) struct StuckDataPin {
    low: bool,
    high: bool,
}

impl StuckDataPin {
    pub(crate) fn both() -> Self {
        StuckDataPin { low: true, high: true }
    }

    pub(crate) fn neither() -> Self {
        StuckDataPin { low: false, high: false }
    }
}

impl DataPin for StuckDataPin {
    fn is_low(&self) -> bool {
        self.low
    }

    fn is_high(&self) -> bool {
        self.high
    }

    fn pin(&self) -> u8 {
        0
    }

    fn set_high(&mut self) {}

    fn set_low(&mut self) {}

    fn set_mode(&mut self, _mode: Mode) {}
}

/// DataPin that plays back the signal a sensor would send for the given frame.
pub(crate) struct SignalDataPin {
    frame: [u8; FRAME_SIZE],
    bit: AtomicUsize,
    low_calls: AtomicU32,
    high_calls: AtomicU32,
}

impl SignalDataPin {
    pub(crate) fn new(frame: [u8; FRAME_SIZE]) -> Self {
        SignalDataPin {
            frame,
            bit: AtomicUsize::new(0),
            low_calls: AtomicU32::new(0),
            high_calls: AtomicU32::new(0),
        }
    }

    fn current_bit_is_one(&self) -> bool {
        let idx = self.bit.load(Ordering::SeqCst);
        // Most significant bit of each byte is sent first
        self.frame[idx / 8] & (0x80 >> (idx % 8)) > 0
    }

    /// Return true for `target` calls then false once, restarting the count. The
    /// very first call returns false so that the response transition is empty.
    fn pulse(calls: &AtomicU32, target: u32, first: bool) -> bool {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if first {
            return false;
        }

        if n >= target {
            calls.store(1, Ordering::SeqCst);
            false
        } else {
            true
        }
    }
}

impl DataPin for SignalDataPin {
    fn is_low(&self) -> bool {
        let first = self.low_calls.load(Ordering::SeqCst) == 0;
        Self::pulse(&self.low_calls, LOW_CYCLE_COUNT + 1, first)
    }

    fn is_high(&self) -> bool {
        let first = self.high_calls.load(Ordering::SeqCst) == 0;
        let target = if first {
            0
        } else if self.current_bit_is_one() {
            ONE_CYCLE_COUNT
        } else {
            ZERO_CYCLE_COUNT
        };

        let level = Self::pulse(&self.high_calls, target + 1, first);
        if !level && !first {
            self.bit.fetch_add(1, Ordering::SeqCst);
        }

        level
    }

    fn pin(&self) -> u8 {
        0
    }

    fn set_high(&mut self) {}

    fn set_low(&mut self) {}

    fn set_mode(&mut self, _mode: Mode) {}
}

/// RegisterBus backed by an in-memory register file, recording every write.
pub(crate) struct MockBus {
    registers: [u8; 256],
    writes: Arc<Mutex<Vec<(u8, u8)>>>,
}

impl MockBus {
    /// Bus with the calibration values from section 8.2 of the BMP280 datasheet
    /// and the given raw temperature and pressure samples.
    pub(crate) fn datasheet(adc_t: i32, adc_p: i32) -> Self {
        let words: [i32; 12] = [
            27504, 26435, -1000, 36477, -10685, 3024, 2855, 140, -7, 15500, -14600, 6000,
        ];

        let mut calibration = [0u8; CALIBRATION_SIZE];
        for (i, w) in words.iter().enumerate() {
            // Bit pattern is the same for the u16 and i16 words
            let bytes = (*w as u16).to_le_bytes();
            calibration[i * 2] = bytes[0];
            calibration[i * 2 + 1] = bytes[1];
        }

        Self::with_calibration(calibration, adc_t, adc_p)
    }

    pub(crate) fn with_calibration(calibration: [u8; CALIBRATION_SIZE], adc_t: i32, adc_p: i32) -> Self {
        let mut registers = [0u8; 256];
        registers[REG_CHIP_ID as usize] = CHIP_ID;

        let start = REG_CALIBRATION as usize;
        registers[start..start + CALIBRATION_SIZE].copy_from_slice(&calibration);

        let data = REG_DATA as usize;
        for (offset, raw) in [(0, adc_p), (3, adc_t)] {
            registers[data + offset] = (raw >> 12) as u8;
            registers[data + offset + 1] = (raw >> 4) as u8;
            registers[data + offset + 2] = ((raw & 0x0F) << 4) as u8;
        }

        MockBus {
            registers,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn calibration_bytes(&self) -> [u8; CALIBRATION_SIZE] {
        let start = REG_CALIBRATION as usize;
        let mut out = [0u8; CALIBRATION_SIZE];
        out.copy_from_slice(&self.registers[start..start + CALIBRATION_SIZE]);
        out
    }

    pub(crate) fn set_chip_id(&mut self, id: u8) {
        self.registers[REG_CHIP_ID as usize] = id;
    }

    pub(crate) fn set_status(&mut self, status: u8) {
        self.registers[REG_STATUS as usize] = status;
    }

    pub(crate) fn writes(&self) -> Arc<Mutex<Vec<(u8, u8)>>> {
        self.writes.clone()
    }
}

impl RegisterBus for MockBus {
    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        let start = register as usize;
        buf.copy_from_slice(&self.registers[start..start + buf.len()]);
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.writes.lock().unwrap().push((register, value));
        Ok(())
    }
}

/// HumiditySensor that returns queued results in order and times out once
/// the queue is empty. Counts every read.
pub(crate) struct ScriptedHumiditySensor {
    results: VecDeque<Result<(f64, f64), SensorErrorKind>>,
    reads: Arc<AtomicU32>,
}

impl ScriptedHumiditySensor {
    pub(crate) fn new(results: Vec<Result<(f64, f64), SensorErrorKind>>) -> Self {
        ScriptedHumiditySensor {
            results: results.into(),
            reads: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn reads(&self) -> Arc<AtomicU32> {
        self.reads.clone()
    }
}

impl HumiditySensor for ScriptedHumiditySensor {
    fn read(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.results.pop_front() {
            Some(Ok((t, h))) => Ok((t.into(), h.into())),
            Some(Err(kind)) => Err(SensorError::KindMsg(kind, "scripted failure")),
            None => Err(SensorError::KindMsg(SensorErrorKind::ReadTimeout, "scripted timeout")),
        }
    }
}

/// PressureSensor that always returns the same reading, or always fails.
pub(crate) struct FixedPressureSensor {
    reading: Option<(f64, f64)>,
}

impl FixedPressureSensor {
    pub(crate) fn new(temperature: f64, pressure: f64) -> Self {
        FixedPressureSensor {
            reading: Some((temperature, pressure)),
        }
    }

    pub(crate) fn broken() -> Self {
        FixedPressureSensor { reading: None }
    }
}

impl PressureSensor for FixedPressureSensor {
    fn read(&mut self) -> Result<(TemperatureCelsius, PressureHpa), SensorError> {
        match self.reading {
            Some((t, p)) => Ok((t.into(), p.into())),
            None => Err(SensorError::KindMsg(SensorErrorKind::Bus, "scripted bus failure")),
        }
    }
}
