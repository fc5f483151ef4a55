// src/sequencer/debounce.rs

//! # Switch Debouncing
//!
//! A pilot switch arrives as a normalized analog channel. `Debounce` turns it
//! into a boolean that only changes after the threshold comparison has
//! disagreed with the current state for a number of consecutive frames.
//! `Trigger` wraps a switch for push-button use: it fires once per press
//! and re-arms on the first raw-low frame.

use crate::config::SwitchConfig;

/// Debounced boolean switch backed by a persistence counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Debounce {
    channel: Option<usize>,
    threshold: f32,
    gain: f32,
    persistence: u32,
    count: u32,
    state: bool,
}

impl Debounce {
    /// Creates a switch in the low state.
    pub fn new(config: &SwitchConfig) -> Self {
        Self {
            channel: config.channel,
            threshold: config.threshold,
            gain: config.gain,
            persistence: config.persistence,
            count: 0,
            state: false,
        }
    }

    /// Debounced state.
    pub fn state(&self) -> bool {
        self.state
    }

    /// Undebounced comparison for one frame of raw channels.
    pub fn raw(&self, raw: &[f32]) -> bool {
        self.channel
            .and_then(|channel| raw.get(channel))
            .is_some_and(|value| self.threshold < value * self.gain)
    }

    /// Feeds one frame of raw channels and returns the debounced state.
    ///
    /// An unset or out-of-range channel reads as low, so the switch never
    /// leaves its initial state.
    pub fn update(&mut self, raw: &[f32]) -> bool {
        let high = self.raw(raw);

        if high == self.state {
            self.count = 0;
        } else {
            self.count = self.count.saturating_add(1);
            if self.persistence <= self.count {
                self.state = high;
                self.count = 0;
            }
        }
        self.state
    }

    /// Returns to the low state.
    pub fn reset(&mut self) {
        self.count = 0;
        self.state = false;
    }
}

/// A push-button trigger that fires once per qualifying press.
///
/// A press qualifies once the raw comparison has been high for the
/// persistence count. Any raw-low frame re-arms the trigger, however short
/// the release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    switch: Debounce,
    held: u32,
    armed: bool,
}

impl Trigger {
    /// Creates an armed trigger.
    pub fn new(config: &SwitchConfig) -> Self {
        Self {
            switch: Debounce::new(config),
            held: 0,
            armed: true,
        }
    }

    /// Debounced state of the underlying switch.
    pub fn state(&self) -> bool {
        self.switch.state()
    }

    /// Feeds one frame of raw channels. True on the frame a press fires.
    pub fn update(&mut self, raw: &[f32]) -> bool {
        let high = self.switch.raw(raw);
        self.switch.update(raw);
        if !high {
            self.held = 0;
            self.armed = true;
            return false;
        }

        self.held = self.held.saturating_add(1);
        if self.armed && self.switch.persistence <= self.held {
            self.armed = false;
            return true;
        }
        false
    }

    /// Returns to the low, armed state.
    pub fn reset(&mut self) {
        self.switch.reset();
        self.held = 0;
        self.armed = true;
    }
}
