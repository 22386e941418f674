//! The seam between the crossfade scheduler and whatever actually makes noise.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use anyhow::{bail, Result};

use crate::log_info;

use super::AmbientSound;

const ENABLE_LOGS: bool = true;

/// One looping ambient track.
pub trait AudioPlayer {
    fn play(&mut self);
    fn pause(&mut self);
    /// Stops for good; the player is dropped right after.
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn volume(&self) -> f32;
}

pub trait PlayerFactory {
    fn create(&self, sound: AmbientSound) -> Result<Box<dyn AudioPlayer>>;
}

/// Accepts every request and produces no audio. Used when the crate is built
/// without an output backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPlayerFactory;

struct SilentPlayer {
    volume: f32,
}

impl AudioPlayer for SilentPlayer {
    fn play(&mut self) {}

    fn pause(&mut self) {}

    fn stop(&mut self) {}

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn volume(&self) -> f32 {
        self.volume
    }
}

impl PlayerFactory for SilentPlayerFactory {
    fn create(&self, sound: AmbientSound) -> Result<Box<dyn AudioPlayer>> {
        log_info!("Ambient sound {} selected (no audio output)", sound);
        Ok(Box::new(SilentPlayer { volume: 0.0 }))
    }
}

/// What a [`RecordingPlayerFactory`] saw happen to one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub sound: AmbientSound,
    pub volume: f32,
    pub playing: bool,
    pub stopped: bool,
    pub released: bool,
    pub volume_history: Vec<f32>,
}

struct RecordingPlayer {
    record: Rc<RefCell<PlayerRecord>>,
}

impl AudioPlayer for RecordingPlayer {
    fn play(&mut self) {
        self.record.borrow_mut().playing = true;
    }

    fn pause(&mut self) {
        self.record.borrow_mut().playing = false;
    }

    fn stop(&mut self) {
        let mut record = self.record.borrow_mut();
        record.playing = false;
        record.stopped = true;
    }

    fn set_volume(&mut self, volume: f32) {
        let mut record = self.record.borrow_mut();
        record.volume = volume;
        record.volume_history.push(volume);
    }

    fn volume(&self) -> f32 {
        self.record.borrow().volume
    }
}

impl Drop for RecordingPlayer {
    fn drop(&mut self) {
        self.record.borrow_mut().released = true;
    }
}

/// Test double that keeps a record of every player it hands out.
#[derive(Clone, Default)]
pub struct RecordingPlayerFactory {
    records: Rc<RefCell<Vec<Rc<RefCell<PlayerRecord>>>>>,
    fail_next: Rc<Cell<bool>>,
}

impl RecordingPlayerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `create` call fails, as a missing asset would.
    pub fn fail_next(&self) {
        self.fail_next.set(true);
    }

    pub fn players(&self) -> Vec<PlayerRecord> {
        self.records
            .borrow()
            .iter()
            .map(|record| record.borrow().clone())
            .collect()
    }

    /// Players created and not yet dropped.
    pub fn live_players(&self) -> Vec<PlayerRecord> {
        self.players()
            .into_iter()
            .filter(|player| !player.released)
            .collect()
    }
}

impl PlayerFactory for RecordingPlayerFactory {
    fn create(&self, sound: AmbientSound) -> Result<Box<dyn AudioPlayer>> {
        if self.fail_next.replace(false) {
            bail!("asset for {sound} could not be opened");
        }
        let record = Rc::new(RefCell::new(PlayerRecord {
            sound,
            volume: 1.0,
            playing: false,
            stopped: false,
            released: false,
            volume_history: Vec::new(),
        }));
        self.records.borrow_mut().push(record.clone());
        Ok(Box::new(RecordingPlayer { record }))
    }
}
