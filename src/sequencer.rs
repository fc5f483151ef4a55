// src/sequencer.rs

//! # Mode and Test-Point Sequencing
//!
//! The `ModeSequencer` reads debounced pilot switches once per frame and
//! decides which controller group is engaged, which research controller is
//! armed as next in line, whether an excitation is running, and which global
//! controller mode the banks should run in.
//!
//! Switch roles:
//!
//! * SoC-engage hands the aircraft to the flight computer.
//! * Research-select chooses the research group of the current test point
//!   over the baseline group.
//! * Test-increment and test-decrement pick the test-select state. With
//!   neither held the sequencer is in the excite state.
//! * Trigger acts once per debounced press: step the test point, or toggle
//!   the excitation in the excite state.

pub mod debounce;
pub use debounce::*;

use crate::config::SequencerConfig;
use crate::error::ConfigError;
use crate::CtrlMode;
use alloc::string::String;
use alloc::vec::Vec;
use log::{debug, info};

/// A controller or sensor-processing group selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Group {
    /// The baseline group, which is also the failsafe.
    #[default]
    Baseline,
    /// A research group, by index into its group table.
    Research(usize),
}

/// What the trigger does on its next press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestSelect {
    /// Advance to the next test point.
    Increment,
    /// Return to the first test point.
    Decrement,
    /// Toggle the excitation of the current test point.
    #[default]
    Excite,
}

/// A test point with its group names resolved to indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestPoint {
    /// Sensor-processing group index.
    pub sensor_processing: usize,
    /// Control group index.
    pub control: usize,
    /// Excitation group index.
    pub excitation: usize,
}

/// Output of one sequencer frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SequencerOut {
    /// Mission time in seconds.
    pub time_s: f32,
    /// Frames since start.
    pub frame: u64,
    /// The flight computer has the aircraft.
    pub engaged: bool,
    /// The research group is selected.
    pub research: bool,
    /// Global controller mode.
    pub ctrl_mode: CtrlMode,
    /// Controller group driving the aircraft.
    pub engaged_control: Group,
    /// Research controller kept initialized for the next test point.
    pub armed_control: Group,
    /// Sensor-processing group in use.
    pub engaged_sensor_processing: Group,
    /// Excitation group injected into the references, if any.
    pub engaged_excitation: Option<usize>,
    /// Test-select state.
    pub select: TestSelect,
    /// Index of the current test point.
    pub current_test: usize,
    /// Index of the next test point.
    pub next_test: usize,
}

/// Snapshot of the sequencer for the data log.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SequencerLog {
    /// Last frame output.
    pub out: SequencerOut,
    /// Debounced switches: engage, research, increment, decrement, trigger.
    pub switches: [bool; 5],
    /// Number of test points.
    pub test_points: usize,
}

/// Debounced switch handling and test-point state.
pub struct ModeSequencer {
    soc_engage: Debounce,
    research_select: Debounce,
    test_increment: Debounce,
    test_decrement: Debounce,
    trigger: Trigger,
    test_points: Vec<TestPoint>,
    current_test: usize,
    next_test: usize,
    excite: bool,
    elapsed_us: u64,
    out: SequencerOut,
}

fn resolve(groups: &[String], name: &str) -> Result<usize, ConfigError> {
    groups
        .iter()
        .position(|group| group == name)
        .ok_or_else(|| ConfigError::UnknownGroup(name.into()))
}

impl ModeSequencer {
    /// Builds the sequencer and resolves every test-point group name.
    pub fn with_config(config: &SequencerConfig) -> Result<Self, ConfigError> {
        if config.test_points.is_empty() {
            return Err(ConfigError::Empty("test points"));
        }
        let test_points = config
            .test_points
            .iter()
            .map(|point| {
                Ok(TestPoint {
                    sensor_processing: resolve(
                        &config.sensor_processing_groups,
                        &point.sensor_processing,
                    )?,
                    control: resolve(&config.control_groups, &point.control)?,
                    excitation: resolve(&config.excitation_groups, &point.excitation)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let next_test = 1 % test_points.len();
        info!(
            "mode sequencer configured with {} test points",
            test_points.len()
        );
        Ok(Self {
            soc_engage: Debounce::new(&config.soc_engage),
            research_select: Debounce::new(&config.research_select),
            test_increment: Debounce::new(&config.test_increment),
            test_decrement: Debounce::new(&config.test_decrement),
            trigger: Trigger::new(&config.trigger),
            test_points,
            current_test: 0,
            next_test,
            excite: false,
            elapsed_us: 0,
            out: SequencerOut {
                next_test,
                ..SequencerOut::default()
            },
        })
    }

    /// Resolved test-point table.
    pub fn test_points(&self) -> &[TestPoint] {
        &self.test_points
    }

    /// Runs one frame of switch handling.
    pub fn update(&mut self, raw: &[f32], dt_frame: f32) -> SequencerOut {
        // Mission time accumulates in whole microseconds.
        let dt_us = (dt_frame.max(0.0) * 1e6 + 0.5) as u64;
        self.elapsed_us = self.elapsed_us.saturating_add(dt_us);
        let time_s = (self.elapsed_us as f64 * 1e-6) as f32;
        let frame = self.out.frame + 1;

        let engaged = self.soc_engage.update(raw);
        let increment = self.test_increment.update(raw);
        let decrement = self.test_decrement.update(raw);
        let fired = self.trigger.update(raw);

        let select = if increment {
            TestSelect::Increment
        } else if decrement {
            TestSelect::Decrement
        } else {
            TestSelect::Excite
        };

        let research = if engaged {
            self.research_select.update(raw)
        } else {
            self.research_select.reset();
            false
        };

        if !engaged {
            if self.out.engaged {
                debug!("flight computer disengaged");
            }
            self.trigger.reset();
            self.excite = false;
        } else {
            if !research || select != TestSelect::Excite {
                self.excite = false;
            }
            if fired {
                self.on_trigger(select, research);
            }
        }

        let point = self.test_points[self.current_test];
        let next = self.test_points[self.next_test];
        let (ctrl_mode, engaged_control, engaged_sensor_processing) = match (engaged, research) {
            (false, _) => (CtrlMode::Standby, Group::Baseline, Group::Baseline),
            (true, false) => (CtrlMode::Init, Group::Baseline, Group::Baseline),
            (true, true) => (
                CtrlMode::Engage,
                Group::Research(point.control),
                Group::Research(point.sensor_processing),
            ),
        };
        if ctrl_mode != self.out.ctrl_mode {
            debug!(
                "controller mode {:?} -> {:?}",
                self.out.ctrl_mode, ctrl_mode
            );
        }

        self.out = SequencerOut {
            time_s,
            frame,
            engaged,
            research,
            ctrl_mode,
            engaged_control,
            armed_control: Group::Research(next.control),
            engaged_sensor_processing,
            engaged_excitation: self.excite.then_some(point.excitation),
            select: if engaged { select } else { TestSelect::Excite },
            current_test: self.current_test,
            next_test: self.next_test,
        };
        self.out
    }

    fn on_trigger(&mut self, select: TestSelect, research: bool) {
        match select {
            TestSelect::Increment => {
                self.current_test = self.next_test;
                self.next_test = (self.next_test + 1) % self.test_points.len();
                debug!("test point {} armed {}", self.current_test, self.next_test);
            }
            TestSelect::Decrement => {
                self.current_test = 0;
                self.next_test = 1 % self.test_points.len();
                debug!("test point reset to 0");
            }
            TestSelect::Excite if research => {
                self.excite = !self.excite;
                let state = if self.excite { "engaged" } else { "disengaged" };
                debug!("excitation {}", state);
            }
            TestSelect::Excite => {}
        }
    }

    /// Output of the last frame.
    pub fn out(&self) -> SequencerOut {
        self.out
    }

    /// Snapshot for the data log.
    pub fn log(&self) -> SequencerLog {
        SequencerLog {
            out: self.out,
            switches: [
                self.soc_engage.state(),
                self.research_select.state(),
                self.test_increment.state(),
                self.test_decrement.state(),
                self.trigger.state(),
            ],
            test_points: self.test_points.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SwitchConfig, TestPointConfig};
    use crate::test_utils::*;

    const ENGAGE: usize = 0;
    const RESEARCH: usize = 1;
    const INCREMENT: usize = 2;
    const DECREMENT: usize = 3;
    const TRIGGER: usize = 4;

    fn names(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| alloc::format!("{prefix}{i}")).collect()
    }

    fn switch(channel: usize) -> SwitchConfig {
        SwitchConfig {
            channel: Some(channel),
            persistence: 2,
            ..SwitchConfig::default()
        }
    }

    fn config(test_points: usize) -> SequencerConfig {
        SequencerConfig {
            soc_engage: switch(ENGAGE),
            research_select: switch(RESEARCH),
            test_increment: switch(INCREMENT),
            test_decrement: switch(DECREMENT),
            trigger: switch(TRIGGER),
            sensor_processing_groups: names("sens", 2),
            control_groups: names("ctrl", test_points),
            excitation_groups: names("exc", 2),
            test_points: (0..test_points)
                .map(|i| TestPointConfig {
                    sensor_processing: alloc::format!("sens{}", i % 2),
                    control: alloc::format!("ctrl{i}"),
                    excitation: alloc::format!("exc{}", i % 2),
                })
                .collect(),
        }
    }

    /// Holds one set of raw switch values for enough frames to debounce.
    fn hold(sequencer: &mut ModeSequencer, raw: &[f32; 5]) -> SequencerOut {
        sequencer.update(raw, 0.02);
        sequencer.update(raw, 0.02)
    }

    fn raw(
        engage: bool,
        research: bool,
        increment: bool,
        decrement: bool,
        trigger: bool,
    ) -> [f32; 5] {
        let level = |on: bool| if on { 1.0 } else { -1.0 };
        [
            level(engage),
            level(research),
            level(increment),
            level(decrement),
            level(trigger),
        ]
    }

    #[test]
    fn test_sequencer_rejects_unknown_group() {
        let mut config = config(3);
        config.test_points[1].control = String::from("missing");
        assert_eq!(
            ModeSequencer::with_config(&config).err(),
            Some(ConfigError::UnknownGroup(String::from("missing")))
        );

        let mut config = self::config(3);
        config.test_points.clear();
        assert!(matches!(
            ModeSequencer::with_config(&config),
            Err(ConfigError::Empty(_))
        ));
    }

    #[test]
    fn test_sequencer_modes() {
        let mut sequencer = ModeSequencer::with_config(&config(3)).unwrap();

        let out = hold(&mut sequencer, &raw(false, true, false, false, false));
        assert!(!out.engaged);
        assert_eq!(out.ctrl_mode, CtrlMode::Standby);
        assert_eq!(out.engaged_control, Group::Baseline);
        assert_eq!(out.armed_control, Group::Research(1));

        let out = hold(&mut sequencer, &raw(true, false, false, false, false));
        assert_eq!(out.ctrl_mode, CtrlMode::Init);
        assert_eq!(out.engaged_control, Group::Baseline);

        let out = hold(&mut sequencer, &raw(true, true, false, false, false));
        assert_eq!(out.ctrl_mode, CtrlMode::Engage);
        assert_eq!(out.engaged_control, Group::Research(0));
        assert_eq!(out.engaged_sensor_processing, Group::Research(0));

        assert!(value_close(0.12, out.time_s));
        assert_eq!(out.frame, 6);
    }

    /// Each trigger press advances once, wrapping at the table size.
    #[test]
    fn test_sequencer_increment_and_decrement() {
        let mut sequencer = ModeSequencer::with_config(&config(3)).unwrap();
        hold(&mut sequencer, &raw(true, false, true, false, false));

        let out = hold(&mut sequencer, &raw(true, false, true, false, true));
        assert_eq!((out.current_test, out.next_test), (1, 2));

        // Holding the trigger does not fire again.
        for _ in 0..10 {
            sequencer.update(&raw(true, false, true, false, true), 0.02);
        }
        assert_eq!(sequencer.out().current_test, 1);

        hold(&mut sequencer, &raw(true, false, true, false, false));
        let out = hold(&mut sequencer, &raw(true, false, true, false, true));
        assert_eq!((out.current_test, out.next_test), (2, 0));
        hold(&mut sequencer, &raw(true, false, true, false, false));
        let out = hold(&mut sequencer, &raw(true, false, true, false, true));
        assert_eq!((out.current_test, out.next_test), (0, 1));
        hold(&mut sequencer, &raw(true, false, true, false, false));
        let out = hold(&mut sequencer, &raw(true, false, true, false, true));
        assert_eq!(out.current_test, 1);
        assert_eq!(out.armed_control, Group::Research(2));

        hold(&mut sequencer, &raw(true, false, false, true, false));
        let out = hold(&mut sequencer, &raw(true, false, false, true, true));
        assert_eq!(out.select, TestSelect::Decrement);
        assert_eq!((out.current_test, out.next_test), (0, 1));
    }

    /// In the excite state the trigger toggles the excitation, and leaving
    /// the excite state stops it.
    #[test]
    fn test_sequencer_excitation_toggle() {
        let mut sequencer = ModeSequencer::with_config(&config(3)).unwrap();
        hold(&mut sequencer, &raw(true, true, false, false, false));

        let out = hold(&mut sequencer, &raw(true, true, false, false, true));
        assert_eq!(out.engaged_excitation, Some(0));

        hold(&mut sequencer, &raw(true, true, false, false, false));
        let out = hold(&mut sequencer, &raw(true, true, false, false, true));
        assert_eq!(out.engaged_excitation, None);

        hold(&mut sequencer, &raw(true, true, false, false, false));
        let out = hold(&mut sequencer, &raw(true, true, false, false, true));
        assert_eq!(out.engaged_excitation, Some(0));
        let out = hold(&mut sequencer, &raw(true, true, true, false, true));
        assert_eq!(out.select, TestSelect::Increment);
        assert_eq!(out.engaged_excitation, None);
    }

    /// Dropping the engage switch resets trigger and excitation state but
    /// keeps the test-point indices.
    #[test]
    fn test_sequencer_disengage_resets() {
        let mut sequencer = ModeSequencer::with_config(&config(3)).unwrap();
        hold(&mut sequencer, &raw(true, false, true, false, false));
        hold(&mut sequencer, &raw(true, false, true, false, true));
        hold(&mut sequencer, &raw(true, true, false, false, false));
        hold(&mut sequencer, &raw(true, true, false, false, true));
        assert_eq!(sequencer.out().engaged_excitation, Some(1));

        let out = hold(&mut sequencer, &raw(false, true, false, false, true));
        assert_eq!(out.ctrl_mode, CtrlMode::Standby);
        assert_eq!(out.engaged_excitation, None);
        assert_eq!(out.current_test, 1);
        assert_eq!(sequencer.log().switches, [false; 5]);

        // Re-engaging starts from the baseline group with no excitation.
        let out = hold(&mut sequencer, &raw(true, false, false, false, false));
        assert_eq!(out.ctrl_mode, CtrlMode::Init);
        assert_eq!(out.engaged_excitation, None);
    }

    /// A sequencer with no switch channels never engages.
    #[test]
    fn test_sequencer_unconfigured_switches() {
        let mut config = config(2);
        config.soc_engage = SwitchConfig::default();
        let mut sequencer = ModeSequencer::with_config(&config).unwrap();
        for _ in 0..20 {
            let out = sequencer.update(&[1.0; 5], 0.02);
            assert!(!out.engaged);
            assert_eq!(out.ctrl_mode, CtrlMode::Standby);
        }
        assert_eq!(sequencer.log().test_points, 2);
        assert_eq!(sequencer.test_points()[1].control, 1);
    }

    /// An hour of 50 Hz frames adds up to an hour of mission time.
    #[test]
    fn test_sequencer_mission_time() {
        let mut sequencer = ModeSequencer::with_config(&config(1)).unwrap();
        let idle = raw(false, false, false, false, false);
        for _ in 0..180_000 {
            sequencer.update(&idle, 0.02);
        }
        let out = sequencer.out();
        assert_eq!(out.frame, 180_000);
        assert!(slice_within(&[3600.0], &[out.time_s], 1e-3));
    }

    /// A release shorter than the persistence count still re-arms the
    /// trigger, so the next full press advances again.
    #[test]
    fn test_sequencer_trigger_short_release() {
        let mut config = config(3);
        config.trigger.persistence = 5;
        let mut sequencer = ModeSequencer::with_config(&config).unwrap();
        hold(&mut sequencer, &raw(true, false, true, false, false));

        for _ in 0..10 {
            sequencer.update(&raw(true, false, true, false, true), 0.02);
        }
        assert_eq!(sequencer.out().current_test, 1);
        for _ in 0..2 {
            sequencer.update(&raw(true, false, true, false, false), 0.02);
        }
        for _ in 0..10 {
            sequencer.update(&raw(true, false, true, false, true), 0.02);
        }
        assert_eq!(sequencer.out().current_test, 2);
    }
}
