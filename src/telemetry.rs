use tracing::{debug, warn};

use crate::{
    error::Result,
    types::{
        Acceleration, BatteryCalibration, BatteryReading, MotionEvent, Position, TelemetrySample,
    },
};

/// Raw accelerometer read
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionReading {
    /// Current acceleration in g
    pub acceleration: Acceleration,
    /// Motion interrupt latched since the previous read; cleared by reading
    pub interrupt: bool,
}

/// Accelerometer driver
pub trait MotionSensor {
    /// Read acceleration and drain the motion interrupt latch
    ///
    /// # Errors
    ///
    /// Returns [`crate::TrackerError::HardwareUnavailable`] if the sensor does not answer.
    fn read_motion_event(&mut self) -> Result<MotionReading>;
}

/// Battery ADC
pub trait BatterySensor {
    /// Raw ADC count of the battery divider
    ///
    /// # Errors
    ///
    /// Returns [`crate::TrackerError::HardwareUnavailable`] if the ADC cannot be sampled.
    fn read_battery_raw(&mut self) -> Result<u16>;
}

/// Source of already-resolved position fixes
pub trait PositionSource {
    /// Latest fix, if any
    fn latest_position(&mut self) -> Option<Position>;
}

impl<T: MotionSensor + ?Sized> MotionSensor for Box<T> {
    fn read_motion_event(&mut self) -> Result<MotionReading> {
        (**self).read_motion_event()
    }
}

impl<T: BatterySensor + ?Sized> BatterySensor for Box<T> {
    fn read_battery_raw(&mut self) -> Result<u16> {
        (**self).read_battery_raw()
    }
}

impl<T: PositionSource + ?Sized> PositionSource for Box<T> {
    fn latest_position(&mut self) -> Option<Position> {
        (**self).latest_position()
    }
}

/// Convert a raw ADC count into battery voltage
#[must_use]
pub fn battery_voltage(raw_adc: u16, calibration: &BatteryCalibration) -> f32 {
    f32::from(raw_adc) * (calibration.reference_voltage / calibration.adc_max_value)
        * calibration.divider_multiplier
}

/// Map a voltage linearly onto 0..=100, clamped
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn battery_percent(voltage: f32, calibration: &BatteryCalibration) -> u8 {
    let span = calibration.max_voltage - calibration.min_voltage;
    if span <= 0.0 || !voltage.is_finite() {
        return 0;
    }
    let percent = ((voltage - calibration.min_voltage) / span * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Produces motion, battery and position samples on demand
pub struct TelemetrySampler<M, B, P> {
    motion: M,
    battery: B,
    position: P,
    calibration: BatteryCalibration,
    motion_threshold: f32,
    last_acceleration: Acceleration,
    last_position: Position,
    motion_degraded: bool,
    battery_degraded: bool,
}

impl<M: MotionSensor, B: BatterySensor, P: PositionSource> TelemetrySampler<M, B, P> {
    /// Create a sampler
    pub fn new(
        motion: M,
        battery: B,
        position: P,
        calibration: BatteryCalibration,
        motion_threshold: f32,
    ) -> Self {
        Self {
            motion,
            battery,
            position,
            calibration,
            motion_threshold,
            last_acceleration: Acceleration::default(),
            last_position: Position::default(),
            motion_degraded: false,
            battery_degraded: false,
        }
    }

    /// Follow a new `motion_threshold` from the device configuration
    pub fn set_motion_threshold(&mut self, threshold: f32) {
        if threshold.is_finite() && threshold >= 0.0 {
            self.motion_threshold = threshold;
        }
    }

    /// Current motion threshold in g
    #[must_use]
    pub const fn motion_threshold(&self) -> f32 {
        self.motion_threshold
    }

    /// Sample the accelerometer
    ///
    /// Motion is detected when the interrupt latched or the deviation from 1 g
    /// exceeds the threshold. An unavailable sensor reports no motion.
    pub fn sample_motion(&mut self) -> MotionEvent {
        let reading = match self.motion.read_motion_event() {
            Ok(reading) => {
                self.motion_degraded = false;
                reading
            }
            Err(e) => {
                if !self.motion_degraded {
                    warn!("Accelerometer unavailable, reporting zero motion: {}", e);
                    self.motion_degraded = true;
                }
                return MotionEvent::default();
            }
        };

        self.last_acceleration = reading.acceleration;
        let magnitude = (reading.acceleration.norm() - 1.0).abs();
        let detected = reading.interrupt || magnitude > self.motion_threshold;
        if detected {
            debug!(magnitude, interrupt = reading.interrupt, "Motion detected");
        }

        MotionEvent {
            detected,
            magnitude,
            acceleration: reading.acceleration,
        }
    }

    /// Sample the battery
    ///
    /// `None` if the ADC could not be read; callers must not treat that as an
    /// empty battery.
    pub fn sample_battery(&mut self) -> Option<BatteryReading> {
        let raw_adc = match self.battery.read_battery_raw() {
            Ok(raw) => {
                self.battery_degraded = false;
                raw
            }
            Err(e) => {
                if !self.battery_degraded {
                    warn!("Battery ADC unavailable, reporting zero: {}", e);
                    self.battery_degraded = true;
                }
                return None;
            }
        };

        let voltage = battery_voltage(raw_adc, &self.calibration);
        let percent = battery_percent(voltage, &self.calibration);
        debug!(raw_adc, voltage, percent, "Battery sampled");

        Some(BatteryReading {
            raw_adc,
            voltage,
            percent,
        })
    }

    /// Build a report from the latest motion sample, a fresh battery read and the last fix
    ///
    /// Non-finite readings are reported as zero so every status field stays a number.
    pub fn snapshot(&mut self, motion: bool) -> TelemetrySample {
        if let Some(position) = self.position.latest_position() {
            self.last_position = position;
        }
        let battery_percent = self.sample_battery().map_or(0, |reading| reading.percent);

        TelemetrySample {
            latitude: finite_or_zero(self.last_position.latitude),
            longitude: finite_or_zero(self.last_position.longitude),
            accel_x: finite_or_zero_f32(self.last_acceleration.x),
            accel_y: finite_or_zero_f32(self.last_acceleration.y),
            accel_z: finite_or_zero_f32(self.last_acceleration.z),
            motion,
            battery_percent,
        }
    }
}

const fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

const fn finite_or_zero_f32(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FixedPosition, SimBattery, SimMotion};

    fn calibration() -> BatteryCalibration {
        BatteryCalibration::default()
    }

    #[test]
    fn test_voltage_derivation() {
        let v = battery_voltage(4095, &calibration());
        assert!((v - 6.6).abs() < 0.001);
        assert!(battery_voltage(0, &calibration()).abs() < f32::EPSILON);
    }

    #[test]
    fn test_percent_clamped() {
        assert_eq!(battery_percent(2.0, &calibration()), 0);
        assert_eq!(battery_percent(5.0, &calibration()), 100);
        assert_eq!(battery_percent(3.3, &calibration()), 0);
        assert_eq!(battery_percent(4.2, &calibration()), 100);
    }

    #[test]
    fn test_midpoint_is_fifty_percent() {
        assert_eq!(battery_percent(3.75, &calibration()), 50);

        // 2327 counts -> ~3.7505 V
        let voltage = battery_voltage(2327, &calibration());
        assert_eq!(battery_percent(voltage, &calibration()), 50);
    }

    #[test]
    fn test_raw_extremes_stay_in_range() {
        for raw in [0u16, 100, 2000, 4095, u16::MAX] {
            let percent = battery_percent(battery_voltage(raw, &calibration()), &calibration());
            assert!(percent <= 100, "raw {raw} gave {percent}");
        }
    }

    #[test]
    fn test_motion_threshold_and_interrupt() {
        let motion = SimMotion::default();
        let mut sampler = TelemetrySampler::new(
            motion.clone(),
            SimBattery::new(3000),
            FixedPosition::none(),
            calibration(),
            0.5,
        );

        motion.set_acceleration(Acceleration { x: 0.0, y: 0.0, z: 1.0 });
        assert!(!sampler.sample_motion().detected);

        motion.set_acceleration(Acceleration { x: 1.2, y: 0.0, z: 1.0 });
        let event = sampler.sample_motion();
        assert!(event.detected);
        assert!(event.magnitude > 0.5);

        motion.set_acceleration(Acceleration { x: 0.0, y: 0.0, z: 1.0 });
        motion.trigger_interrupt();
        assert!(sampler.sample_motion().detected);
        assert!(!sampler.sample_motion().detected);
    }

    #[test]
    fn test_unavailable_sensors_degrade_to_zero() {
        let motion = SimMotion::default();
        motion.set_available(false);
        let battery = SimBattery::new(3000);
        battery.set_available(false);
        let mut sampler =
            TelemetrySampler::new(motion, battery, FixedPosition::none(), calibration(), 0.5);

        assert_eq!(sampler.sample_motion(), MotionEvent::default());
        assert_eq!(sampler.sample_battery(), None);
        assert_eq!(sampler.snapshot(false), TelemetrySample::default());
    }

    #[test]
    fn test_snapshot_uses_latest_fix() {
        let motion = SimMotion::default();
        motion.set_acceleration(Acceleration { x: 0.1, y: 0.2, z: 0.9 });
        let mut sampler = TelemetrySampler::new(
            motion,
            SimBattery::new(4095),
            FixedPosition::at(52.52, 13.405),
            calibration(),
            0.5,
        );
        sampler.sample_motion();

        let sample = sampler.snapshot(true);
        assert!((sample.latitude - 52.52).abs() < 1e-9);
        assert!((sample.accel_y - 0.2).abs() < f32::EPSILON);
        assert!(sample.motion);
        assert_eq!(sample.battery_percent, 100);
    }

    #[test]
    fn test_snapshot_replaces_non_finite_values() {
        let motion = SimMotion::default();
        motion.set_acceleration(Acceleration { x: f32::NAN, y: f32::INFINITY, z: 1.0 });
        let mut sampler = TelemetrySampler::new(
            motion,
            SimBattery::new(4095),
            FixedPosition::at(f64::NAN, 13.405),
            calibration(),
            0.5,
        );
        sampler.sample_motion();

        let sample = sampler.snapshot(false);
        assert!(sample.latitude.abs() < f64::EPSILON);
        assert!((sample.longitude - 13.405).abs() < 1e-9);
        assert!(sample.accel_x.abs() < f32::EPSILON);
        assert!(sample.accel_y.abs() < f32::EPSILON);
        assert!((sample.accel_z - 1.0).abs() < f32::EPSILON);

        let payload = crate::protocol::status_payload(&sample).unwrap();
        assert!(!String::from_utf8(payload).unwrap().contains("null"));
    }

    #[test]
    fn test_threshold_update_validated() {
        let mut sampler = TelemetrySampler::new(
            SimMotion::default(),
            SimBattery::new(0),
            FixedPosition::none(),
            calibration(),
            0.5,
        );
        sampler.set_motion_threshold(-1.0);
        assert!((sampler.motion_threshold() - 0.5).abs() < f32::EPSILON);
        sampler.set_motion_threshold(1.5);
        assert!((sampler.motion_threshold() - 1.5).abs() < f32::EPSILON);
    }
}
