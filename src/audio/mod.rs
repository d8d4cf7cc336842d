pub mod tone;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rodio::{OutputStream, Sink};
use std::sync::{
    mpsc::{self, Sender},
    Mutex,
};
use std::thread;
use std::time::Duration;

use crate::monitor::alert::{AlertKind, AlertSink};
use tone::ChimeTone;

const FIRST_NOTE_HZ: f32 = 880.0;
const SECOND_NOTE_HZ: f32 = 660.0;
const NOTE_LENGTH: Duration = Duration::from_millis(180);

enum AudioCommand {
    Chime { volume: f32 },
}

/// Plays a short chime for every alert on a dedicated audio thread.
///
/// rodio's output stream is not `Send`, so it never leaves that thread; the
/// sink only forwards commands to it.
pub struct ChimeAlertSink {
    tx: Mutex<Option<Sender<AudioCommand>>>,
    volume: f32,
}

impl ChimeAlertSink {
    pub fn new(volume: f32) -> Self {
        Self {
            tx: Mutex::new(None),
            volume: volume.clamp(0.0, 1.0),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| anyhow!("chime sender lock poisoned"))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("obserk-chime".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;

                fn ensure_sink(
                    stream: &mut Option<OutputStream>,
                    sink: &mut Option<Sink>,
                ) -> Result<(), String> {
                    if sink.is_none() {
                        let (s, handle) = OutputStream::try_default()
                            .map_err(|e| format!("Failed to create audio output stream: {}", e))?;
                        let new_sink = Sink::try_new(&handle)
                            .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                        *stream = Some(s);
                        *sink = Some(new_sink);
                    }
                    Ok(())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Chime { volume } => {
                            if let Err(err) = ensure_sink(&mut _stream, &mut sink) {
                                log::warn!("{err}");
                                continue;
                            }
                            if let Some(ref s) = sink {
                                s.set_volume(volume);
                                s.append(ChimeTone::new(FIRST_NOTE_HZ, SECOND_NOTE_HZ, NOTE_LENGTH));
                            }
                        }
                    }
                }
            })?;

        *guard = Some(tx.clone());
        Ok(tx)
    }
}

#[async_trait]
impl AlertSink for ChimeAlertSink {
    async fn fire(&self, _alert: &AlertKind) -> Result<()> {
        let tx = self.ensure_thread()?;
        tx.send(AudioCommand::Chime {
            volume: self.volume,
        })
        .map_err(|_| anyhow!("chime thread exited"))
    }
}
