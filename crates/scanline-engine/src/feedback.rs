//! Best-effort confirmation tone.
//!
//! `beep()` never blocks and never fails. A single worker task owns the
//! audio output: it acquires it on the first beep, plays tones on the
//! blocking pool, and drops the output after a playback error so the next
//! beep re-acquires. At most one beep waits in the queue; extra beeps while
//! one is pending are dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::provider::{AudioBackend, AudioOutput, Tone};

pub struct FeedbackEmitter {
    beep_tx: Option<mpsc::Sender<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FeedbackEmitter {
    /// Spawns the worker on the current runtime.
    pub fn spawn(backend: Arc<dyn AudioBackend>, tone: Tone) -> Self {
        let (beep_tx, beep_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = tokio::spawn(run_worker(backend, tone, beep_rx, shutdown_rx));

        FeedbackEmitter {
            beep_tx: Some(beep_tx),
            shutdown_tx: Some(shutdown_tx),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// An emitter that ignores every beep.
    pub fn disabled() -> Self {
        FeedbackEmitter {
            beep_tx: None,
            shutdown_tx: None,
            worker: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.beep_tx.is_some()
    }

    /// Queues a tone. Returns immediately.
    pub fn beep(&self) {
        let Some(tx) = &self.beep_tx else {
            return;
        };
        match tx.try_send(()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(())) => debug!("Beep already pending, dropping"),
            Err(mpsc::error::TrySendError::Closed(())) => debug!("Feedback worker gone, dropping beep"),
        }
    }

    /// Stops the worker and waits for it. Later beeps are dropped.
    pub async fn shutdown(&self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.try_send(());
        }
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "Feedback worker failed");
            }
        }
    }
}

async fn run_worker(
    backend: Arc<dyn AudioBackend>,
    tone: Tone,
    mut beep_rx: mpsc::Receiver<()>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut output: Option<Box<dyn AudioOutput>> = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            beep = beep_rx.recv() => {
                if beep.is_none() {
                    break;
                }
            }
        }

        let current = match output.take() {
            Some(out) => out,
            None => {
                let backend = backend.clone();
                match tokio::task::spawn_blocking(move || backend.acquire()).await {
                    Ok(Ok(out)) => {
                        info!("Audio output acquired");
                        out
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Audio output unavailable, beep skipped");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Audio acquisition task failed");
                        continue;
                    }
                }
            }
        };

        let played = tokio::task::spawn_blocking(move || {
            let mut out = current;
            let result = out.play_tone(&tone);
            (out, result)
        })
        .await;

        match played {
            Ok((out, Ok(()))) => output = Some(out),
            Ok((_, Err(e))) => warn!(error = %e, "Tone playback failed, releasing output"),
            Err(e) => warn!(error = %e, "Tone playback task failed"),
        }
    }

    debug!("Feedback worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RecordingAudio;
    use std::time::Duration;

    fn tone() -> Tone {
        Tone {
            frequency_hz: 1800,
            duration_ms: 150,
            volume: 0.3,
        }
    }

    #[tokio::test]
    async fn test_beep_plays_tone() {
        let audio = Arc::new(RecordingAudio::new());
        let emitter = FeedbackEmitter::spawn(audio.clone(), tone());

        emitter.beep();
        assert!(audio.wait_for_tones(1, Duration::from_secs(1)).await);

        assert_eq!(audio.tones(), vec![tone()]);
        assert_eq!(audio.acquisitions(), 1);
        emitter.shutdown().await;
    }

    #[tokio::test]
    async fn test_output_acquired_once() {
        let audio = Arc::new(RecordingAudio::new());
        let emitter = FeedbackEmitter::spawn(audio.clone(), tone());

        for expected in 1..=3 {
            emitter.beep();
            assert!(audio.wait_for_tones(expected, Duration::from_secs(1)).await);
        }

        assert_eq!(audio.acquisitions(), 1);
        emitter.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_acquisition_retried_on_next_beep() {
        let audio = Arc::new(RecordingAudio::failing_first(1));
        let emitter = FeedbackEmitter::spawn(audio.clone(), tone());

        emitter.beep();
        assert!(audio.wait_for_attempts(1, Duration::from_secs(1)).await);
        assert!(audio.tones().is_empty());

        emitter.beep();
        assert!(audio.wait_for_tones(1, Duration::from_secs(1)).await);
        assert_eq!(audio.acquisitions(), 2);
        emitter.shutdown().await;
    }

    #[tokio::test]
    async fn test_burst_of_beeps_is_bounded() {
        let audio = Arc::new(RecordingAudio::new().with_play_delay(Duration::from_millis(30)));
        let emitter = FeedbackEmitter::spawn(audio.clone(), tone());

        for _ in 0..10 {
            emitter.beep();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        // One playing, at most one queued behind it.
        assert!(audio.tones().len() <= 2);
        emitter.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_emitter_is_silent() {
        let emitter = FeedbackEmitter::disabled();
        assert!(!emitter.is_enabled());
        emitter.beep();
        emitter.shutdown().await;
    }

    #[tokio::test]
    async fn test_beep_after_shutdown_is_dropped() {
        let audio = Arc::new(RecordingAudio::new());
        let emitter = FeedbackEmitter::spawn(audio.clone(), tone());
        emitter.shutdown().await;

        emitter.beep();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(audio.tones().is_empty());
    }
}
