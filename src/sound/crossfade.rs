use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{FocusError, FocusResult},
    events::EventChannel,
    log_debug, log_error, log_info,
    scheduler::{CancellationHandle, Scheduler},
};

use super::{AmbientSound, AudioPlayer, PlayerFactory};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossfadeConfig {
    #[serde(with = "millis")]
    pub duration: Duration,
    #[serde(with = "millis")]
    pub step: Duration,
    pub target_volume: f32,
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(1),
            step: Duration::from_millis(50),
            target_volume: 0.5,
        }
    }
}

impl CrossfadeConfig {
    pub fn total_steps(&self) -> u32 {
        let step = self.step.as_millis().max(1);
        ((self.duration.as_millis() / step) as u32).max(1)
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

struct Ramp {
    step: u32,
    total_steps: u32,
    outgoing_start_volume: f32,
}

struct FadeState {
    /// Last sound asked for; repeated requests for it are ignored.
    requested: AmbientSound,
    /// Sound currently published to observers.
    current_sound: AmbientSound,
    incoming: Option<Box<dyn AudioPlayer>>,
    outgoing: Option<Box<dyn AudioPlayer>>,
    ramp: Option<Ramp>,
    target_volume: f32,
    is_playing: bool,
}

/// Notifications collected under the state borrow and delivered after it.
#[derive(Default)]
struct Pending {
    sound: Option<AmbientSound>,
    playing: Option<bool>,
}

struct CrossfadeInner {
    factory: Rc<dyn PlayerFactory>,
    scheduler: Rc<dyn Scheduler>,
    config: CrossfadeConfig,
    state: RefCell<FadeState>,
    fade: RefCell<Option<CancellationHandle>>,
    current_sound_changed: EventChannel<AmbientSound>,
    is_playing_changed: EventChannel<bool>,
}

/// Plays one ambient sound at a time and crossfades between sounds.
///
/// A new request always settles the ramp in flight first: the outgoing player
/// is stopped and released and the incoming one snaps to the target volume.
/// So there is never more than one incoming and one outgoing player.
#[derive(Clone)]
pub struct CrossfadeScheduler {
    inner: Rc<CrossfadeInner>,
}

impl CrossfadeScheduler {
    pub fn new(
        factory: Rc<dyn PlayerFactory>,
        scheduler: Rc<dyn Scheduler>,
        config: CrossfadeConfig,
    ) -> Self {
        let target_volume = config.target_volume.clamp(0.0, 1.0);
        Self {
            inner: Rc::new(CrossfadeInner {
                factory,
                scheduler,
                config,
                state: RefCell::new(FadeState {
                    requested: AmbientSound::None,
                    current_sound: AmbientSound::None,
                    incoming: None,
                    outgoing: None,
                    ramp: None,
                    target_volume,
                    is_playing: false,
                }),
                fade: RefCell::new(None),
                current_sound_changed: EventChannel::new(),
                is_playing_changed: EventChannel::new(),
            }),
        }
    }

    pub fn current_sound(&self) -> AmbientSound {
        self.inner.state.borrow().current_sound
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.borrow().is_playing
    }

    pub fn volume(&self) -> f32 {
        self.inner.state.borrow().target_volume
    }

    pub fn is_fading(&self) -> bool {
        self.inner.state.borrow().ramp.is_some()
    }

    /// (current players, outgoing players)
    pub fn player_counts(&self) -> (usize, usize) {
        let state = self.inner.state.borrow();
        (
            usize::from(state.incoming.is_some()),
            usize::from(state.outgoing.is_some()),
        )
    }

    pub fn current_sound_changed(&self) -> &EventChannel<AmbientSound> {
        &self.inner.current_sound_changed
    }

    pub fn is_playing_changed(&self) -> &EventChannel<bool> {
        &self.inner.is_playing_changed
    }

    pub fn play(&self, sound: AmbientSound) -> FocusResult<()> {
        if self.inner.state.borrow().requested == sound {
            return Ok(());
        }

        let mut pending = self.settle();

        if sound.is_silent() {
            pending.merge(self.begin_fade_out());
            self.deliver(pending);
            return Ok(());
        }

        let mut player = match self.inner.factory.create(sound) {
            Ok(player) => player,
            Err(err) => {
                log_error!("Failed to open ambient sound {}: {:#}", sound, err);
                self.deliver(pending);
                return Err(FocusError::AudioPlaybackFailed(format!("{err:#}")));
            }
        };
        player.set_volume(0.0);
        player.play();

        {
            let mut state = self.inner.state.borrow_mut();
            let outgoing = state.incoming.take();
            let outgoing_start_volume = outgoing.as_ref().map(|p| p.volume()).unwrap_or(0.0);
            state.outgoing = outgoing;
            state.incoming = Some(player);
            state.ramp = Some(Ramp {
                step: 0,
                total_steps: self.inner.config.total_steps(),
                outgoing_start_volume,
            });
            state.requested = sound;
            if state.current_sound != sound {
                state.current_sound = sound;
                pending.sound = Some(sound);
            }
            if !state.is_playing {
                state.is_playing = true;
                pending.playing = Some(true);
            }
        }

        log_info!("Crossfading to {}", sound);
        self.schedule_ramp();
        self.deliver(pending);
        Ok(())
    }

    pub fn pause(&self) {
        let mut pending = self.settle();
        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(player) = state.incoming.as_mut() {
                player.pause();
            }
            if state.is_playing {
                state.is_playing = false;
                pending.playing = Some(false);
            }
        }
        self.deliver(pending);
    }

    pub fn resume(&self) {
        let mut pending = self.settle();
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.is_playing {
                if let Some(player) = state.incoming.as_mut() {
                    player.play();
                    state.is_playing = true;
                    pending.playing = Some(true);
                }
            }
        }
        self.deliver(pending);
    }

    /// Pauses when playing, resumes otherwise. Returns the new playing flag.
    pub fn toggle_playback(&self) -> bool {
        if self.is_playing() {
            self.pause();
        } else {
            self.resume();
        }
        self.is_playing()
    }

    pub fn stop(&self) {
        let mut pending = self.settle();
        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(mut player) = state.incoming.take() {
                player.stop();
            }
            state.requested = AmbientSound::None;
            if state.current_sound != AmbientSound::None {
                state.current_sound = AmbientSound::None;
                pending.sound = Some(AmbientSound::None);
            }
            if state.is_playing {
                state.is_playing = false;
                pending.playing = Some(false);
            }
        }
        self.deliver(pending);
    }

    /// Clamps to [0, 1]. Applies to the current player right away unless a
    /// ramp is running, in which case the ramp heads for the new level.
    pub fn set_volume(&self, level: f32) -> f32 {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        let mut state = self.inner.state.borrow_mut();
        state.target_volume = level;
        if state.ramp.is_none() {
            if let Some(player) = state.incoming.as_mut() {
                player.set_volume(level);
            }
        }
        level
    }

    fn begin_fade_out(&self) -> Pending {
        let mut pending = Pending::default();
        let fading = {
            let mut state = self.inner.state.borrow_mut();
            state.requested = AmbientSound::None;
            match state.incoming.take() {
                Some(player) => {
                    let outgoing_start_volume = player.volume();
                    state.outgoing = Some(player);
                    state.ramp = Some(Ramp {
                        step: 0,
                        total_steps: self.inner.config.total_steps(),
                        outgoing_start_volume,
                    });
                    true
                }
                None => {
                    if state.current_sound != AmbientSound::None {
                        state.current_sound = AmbientSound::None;
                        pending.sound = Some(AmbientSound::None);
                    }
                    if state.is_playing {
                        state.is_playing = false;
                        pending.playing = Some(false);
                    }
                    false
                }
            }
        };

        if fading {
            log_info!("Fading ambient sound to silence");
            self.schedule_ramp();
        }
        pending
    }

    fn schedule_ramp(&self) {
        self.cancel_fade();
        let weak: Weak<CrossfadeInner> = Rc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule_repeating(
            self.inner.config.step,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    CrossfadeScheduler { inner }.advance_ramp();
                }
            }),
        );
        *self.inner.fade.borrow_mut() = Some(handle);
    }

    fn cancel_fade(&self) {
        let handle = self.inner.fade.borrow_mut().take();
        if let Some(mut handle) = handle {
            handle.cancel();
        }
    }

    fn advance_ramp(&self) {
        let finished = {
            let mut state = self.inner.state.borrow_mut();
            let target = state.target_volume;
            let Some(ramp) = state.ramp.as_mut() else {
                return;
            };
            ramp.step += 1;
            let progress = (ramp.step as f32 / ramp.total_steps as f32).min(1.0);
            let outgoing_volume = ramp.outgoing_start_volume * (1.0 - progress);
            let finished = ramp.step >= ramp.total_steps;

            if let Some(player) = state.incoming.as_mut() {
                player.set_volume(target * progress);
            }
            if let Some(player) = state.outgoing.as_mut() {
                player.set_volume(outgoing_volume);
            }
            log_debug!("Crossfade step {:.2}", progress);
            finished
        };

        if finished {
            let pending = self.settle();
            self.deliver(pending);
        }
    }

    /// Ends any ramp immediately: ticking stops, the outgoing player is stopped
    /// and released, the incoming one sits at the target volume, and a pending
    /// fade to silence clears the selection.
    fn settle(&self) -> Pending {
        self.cancel_fade();

        let mut pending = Pending::default();
        let mut state = self.inner.state.borrow_mut();
        if state.ramp.take().is_none() {
            return pending;
        }

        if let Some(mut player) = state.outgoing.take() {
            player.stop();
        }
        let target = state.target_volume;
        match state.incoming.as_mut() {
            Some(player) => player.set_volume(target),
            None => {
                if state.current_sound != AmbientSound::None {
                    state.current_sound = AmbientSound::None;
                    pending.sound = Some(AmbientSound::None);
                }
                if state.is_playing {
                    state.is_playing = false;
                    pending.playing = Some(false);
                }
            }
        }
        log_info!("Crossfade settled on {}", state.current_sound);
        pending
    }

    fn deliver(&self, pending: Pending) {
        if let Some(sound) = pending.sound {
            self.inner.current_sound_changed.emit(&sound);
        }
        if let Some(playing) = pending.playing {
            self.inner.is_playing_changed.emit(&playing);
        }
    }
}

impl Pending {
    fn merge(&mut self, later: Pending) {
        if later.sound.is_some() {
            self.sound = later.sound;
        }
        if later.playing.is_some() {
            self.playing = later.playing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scheduler::{ManualClock, ManualScheduler},
        sound::RecordingPlayerFactory,
    };

    struct Harness {
        scheduler: ManualScheduler,
        factory: RecordingPlayerFactory,
        fader: CrossfadeScheduler,
        sounds: Rc<RefCell<Vec<AmbientSound>>>,
        playing: Rc<RefCell<Vec<bool>>>,
    }

    fn harness() -> Harness {
        let scheduler = ManualScheduler::new(ManualClock::at_epoch_day());
        let factory = RecordingPlayerFactory::new();
        let fader = CrossfadeScheduler::new(
            Rc::new(factory.clone()),
            Rc::new(scheduler.clone()),
            CrossfadeConfig {
                duration: Duration::from_secs(1),
                step: Duration::from_millis(50),
                target_volume: 0.8,
            },
        );

        let sounds = Rc::new(RefCell::new(Vec::new()));
        let sound_log = sounds.clone();
        fader
            .current_sound_changed()
            .subscribe(move |sound| sound_log.borrow_mut().push(*sound));
        let playing = Rc::new(RefCell::new(Vec::new()));
        let playing_log = playing.clone();
        fader
            .is_playing_changed()
            .subscribe(move |flag| playing_log.borrow_mut().push(*flag));

        Harness {
            scheduler,
            factory,
            fader,
            sounds,
            playing,
        }
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn fade_in_ramps_linearly_to_target() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();

        assert!(h.fader.is_fading());
        h.scheduler.advance(Duration::from_millis(500));
        let rain = &h.factory.players()[0];
        assert!(approx(rain.volume, 0.4));

        h.scheduler.advance(Duration::from_millis(500));
        let rain = &h.factory.players()[0];
        assert!(approx(rain.volume, 0.8));
        assert!(rain.playing);
        assert!(!h.fader.is_fading());
        assert_eq!(h.scheduler.active_count(), 0);
    }

    #[test]
    fn switching_sounds_leaves_exactly_one_player() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.fader.play(AmbientSound::Birds).unwrap();

        h.scheduler.advance(Duration::from_secs(1));

        let live = h.factory.live_players();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].sound, AmbientSound::Birds);
        assert!(approx(live[0].volume, 0.8));
        assert_eq!(h.fader.player_counts(), (1, 0));

        let rain = &h.factory.players()[0];
        assert!(rain.stopped && rain.released);
        assert_eq!(*h.sounds.borrow(), vec![AmbientSound::Rain, AmbientSound::Birds]);
    }

    #[test]
    fn outgoing_ramps_down_from_its_current_volume() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.scheduler.advance(Duration::from_secs(1));

        h.fader.play(AmbientSound::NightForest).unwrap();
        h.scheduler.advance(Duration::from_millis(250));

        let players = h.factory.players();
        assert!(approx(players[0].volume, 0.6));
        assert!(approx(players[1].volume, 0.2));
        assert_eq!(h.fader.player_counts(), (1, 1));

        h.scheduler.advance(Duration::from_millis(750));
        let players = h.factory.players();
        assert!(players[0].released);
        assert_eq!(h.fader.player_counts(), (1, 0));
    }

    #[test]
    fn same_sound_is_a_no_op() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.fader.play(AmbientSound::Rain).unwrap();
        assert_eq!(h.factory.players().len(), 1);
        assert_eq!(h.sounds.borrow().len(), 1);
    }

    #[test]
    fn none_fades_to_silence_then_clears_selection() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.scheduler.advance(Duration::from_secs(1));

        h.fader.play(AmbientSound::None).unwrap();
        assert_eq!(h.fader.current_sound(), AmbientSound::Rain);

        h.scheduler.advance(Duration::from_secs(1));
        assert_eq!(h.fader.current_sound(), AmbientSound::None);
        assert!(!h.fader.is_playing());
        assert!(h.factory.live_players().is_empty());
        assert_eq!(*h.playing.borrow(), vec![true, false]);
    }

    #[test]
    fn pause_settles_fade_and_keeps_selection() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.scheduler.advance(Duration::from_millis(200));

        h.fader.pause();

        assert!(!h.fader.is_fading());
        assert_eq!(h.scheduler.active_count(), 0);
        assert_eq!(h.fader.current_sound(), AmbientSound::Rain);
        let rain = &h.factory.players()[0];
        assert!(!rain.playing);
        assert!(approx(rain.volume, 0.8));

        h.fader.resume();
        assert!(h.factory.players()[0].playing);
        assert_eq!(*h.playing.borrow(), vec![true, false, true]);
    }

    #[test]
    fn toggle_flips_playback() {
        let h = harness();
        assert!(!h.fader.toggle_playback());

        h.fader.play(AmbientSound::Birds).unwrap();
        assert!(!h.fader.toggle_playback());
        assert!(h.fader.toggle_playback());
    }

    #[test]
    fn stop_releases_everything() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.scheduler.advance(Duration::from_millis(300));
        h.fader.play(AmbientSound::Birds).unwrap();

        h.fader.stop();

        assert!(h.factory.live_players().is_empty());
        assert_eq!(h.fader.current_sound(), AmbientSound::None);
        assert_eq!(h.fader.player_counts(), (0, 0));
        assert_eq!(h.scheduler.active_count(), 0);
    }

    #[test]
    fn set_volume_clamps_and_applies_when_idle() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.scheduler.advance(Duration::from_secs(1));

        assert_eq!(h.fader.set_volume(1.7), 1.0);
        assert!(approx(h.factory.players()[0].volume, 1.0));
        assert_eq!(h.fader.set_volume(-0.2), 0.0);
        assert!(!h.fader.is_fading());
    }

    #[test]
    fn failed_player_keeps_previous_sound() {
        let h = harness();
        h.fader.play(AmbientSound::Rain).unwrap();
        h.scheduler.advance(Duration::from_secs(1));

        h.factory.fail_next();
        let err = h.fader.play(AmbientSound::Birds).unwrap_err();

        assert!(matches!(err, FocusError::AudioPlaybackFailed(_)));
        assert_eq!(h.fader.current_sound(), AmbientSound::Rain);
        assert_eq!(h.factory.live_players().len(), 1);
    }
}
