//! Demo conveyor: a belt moves a part toward a presence sensor.

use std::time::Duration;

use icsim_runtime::device::{Controller, ControllerLogic, ProcessModel};
use icsim_runtime::store::Store;
use icsim_runtime::{CycleTiming, RuntimeError, TagValue};

pub const BELT_STATUS: &str = "conveyor_belt_engine_status";
pub const BELT_MODE: &str = "conveyor_belt_engine_mode";
pub const PART_DISTANCE: &str = "part_distance_to_sensor_value";
pub const PART_PRESENT: &str = "part_present";

/// Centimeters per millisecond.
const BELT_SPEED: f64 = 0.003;
/// Spacing between parts on the belt, in centimeters.
const PART_SPACING: f64 = 7.0;
/// The sensor sees a part closer than this.
const SENSOR_RANGE: f64 = 1.5;
/// Time an operator needs to print and place a sticker.
const STICKER_DWELL: Duration = Duration::from_secs(10);

/// Process-side physics.
#[derive(Debug, Default)]
pub struct ConveyorModel;

impl ProcessModel for ConveyorModel {
    fn step(&mut self, store: &dyn Store, elapsed: Duration) -> Result<(), RuntimeError> {
        let running = store.get(BELT_STATUS)?.is_on();
        let mut distance = store.get(PART_DISTANCE)?.as_f64().unwrap_or(PART_SPACING);
        if running {
            distance -= elapsed.as_secs_f64() * 1000.0 * BELT_SPEED;
            distance = distance.rem_euclid(PART_SPACING);
        }
        store.set(PART_DISTANCE, &TagValue::Number(distance))?;
        store.set(PART_PRESENT, &TagValue::from(distance < SENSOR_RANGE))?;
        Ok(())
    }
}

/// Controller logic: honor the operator mode, otherwise hold the belt while a
/// part sits in front of the sensor and release it after the sticker dwell.
#[derive(Debug, Default)]
pub struct ConveyorLogic {
    dwell: Duration,
}

impl ControllerLogic for ConveyorLogic {
    fn run(&mut self, controller: &mut Controller, timing: &CycleTiming) -> Result<(), RuntimeError> {
        if controller.check_manual_input(BELT_MODE, BELT_STATUS)? {
            return Ok(());
        }
        let Some(distance) = controller.get(PART_DISTANCE)?.and_then(|value| value.as_f64()) else {
            return Ok(());
        };
        if distance >= SENSOR_RANGE {
            self.dwell = Duration::ZERO;
            return controller.set(BELT_STATUS, &TagValue::Number(1.0));
        }
        self.dwell = self.dwell.saturating_add(timing.elapsed());
        let status = if self.dwell >= STICKER_DWELL { 1.0 } else { 0.0 };
        controller.set(BELT_STATUS, &TagValue::Number(status))
    }
}
