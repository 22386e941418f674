use std::{
    fs::File,
    io::BufReader,
    path::PathBuf,
    sync::mpsc::{self, Sender},
    thread,
};

use anyhow::{anyhow, Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

use crate::log_info;

use super::{AmbientSound, AudioPlayer, PlayerFactory};

const ENABLE_LOGS: bool = true;

/// Opens ambient tracks from a directory of `<stem>.mp3` files and plays them
/// on the default output device.
///
/// `OutputStream` is not `Send`, so it lives on a dedicated audio thread for as
/// long as the factory does; players only hold the `Send` handle and sinks.
pub struct RodioPlayerFactory {
    sounds_dir: PathBuf,
    handle: OutputStreamHandle,
    // Dropping this sender lets the audio thread exit and close the device.
    _shutdown: Sender<()>,
}

impl RodioPlayerFactory {
    pub fn new(sounds_dir: PathBuf) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<OutputStreamHandle, String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("focusjournal-audio".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!(
                            "failed to create audio output stream: {err}"
                        )));
                        return;
                    }
                };
                if ready_tx.send(Ok(handle)).is_err() {
                    return;
                }
                // Park until the factory goes away.
                let _ = shutdown_rx.recv();
                drop(stream);
                log_info!("Audio output thread shutting down");
            })
            .context("failed to spawn audio thread")?;

        let handle = ready_rx
            .recv()
            .context("audio thread exited before signaling readiness")?
            .map_err(|err| anyhow!(err))?;

        log_info!("Audio output ready, sounds from {}", sounds_dir.display());
        Ok(Self {
            sounds_dir,
            handle,
            _shutdown: shutdown_tx,
        })
    }
}

impl PlayerFactory for RodioPlayerFactory {
    fn create(&self, sound: AmbientSound) -> Result<Box<dyn AudioPlayer>> {
        let stem = sound
            .file_name()
            .ok_or_else(|| anyhow!("{sound} has no audio asset"))?;
        let path = self.sounds_dir.join(format!("{stem}.mp3"));

        let file = File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let source = Decoder::new(BufReader::new(file))
            .with_context(|| format!("failed to decode {}", path.display()))?;

        let sink = Sink::try_new(&self.handle).context("failed to create audio sink")?;
        sink.pause();
        sink.append(source.repeat_infinite());

        Ok(Box::new(RodioPlayer { sink, volume: 1.0 }))
    }
}

struct RodioPlayer {
    sink: Sink,
    volume: f32,
}

impl AudioPlayer for RodioPlayer {
    fn play(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn stop(&mut self) {
        self.sink.stop();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.sink.set_volume(self.volume);
    }

    fn volume(&self) -> f32 {
        self.volume
    }
}
