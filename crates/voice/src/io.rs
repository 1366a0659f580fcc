//! Microphone capture and speaker playback, abstracted so the pipeline can
//! run against real hardware or, in tests and headless deployments, a
//! no-op implementation.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Produces PCM frames from a microphone (or equivalent) until stopped.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Begin capture, returning the receiving half of a stream of raw PCM
    /// frames at the pipeline's configured sample rate.
    async fn start(&mut self) -> anyhow::Result<mpsc::Receiver<Bytes>>;
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// Plays back synthesized audio, interruptible mid-stream.
#[async_trait]
pub trait Player: Send + Sync {
    async fn play(&mut self, chunk: Bytes) -> anyhow::Result<()>;
    /// Stop playback immediately, discarding any buffered audio.
    async fn interrupt(&mut self) -> anyhow::Result<()>;
}

/// A recorder that never produces audio. Used in tests and on hosts with no
/// microphone.
#[derive(Default)]
pub struct NullRecorder;

#[async_trait]
impl Recorder for NullRecorder {
    async fn start(&mut self) -> anyhow::Result<mpsc::Receiver<Bytes>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A player that discards audio. Used in tests and on hosts with no speaker.
#[derive(Default)]
pub struct NullPlayer;

#[async_trait]
impl Player for NullPlayer {
    async fn play(&mut self, _chunk: Bytes) -> anyhow::Result<()> {
        Ok(())
    }

    async fn interrupt(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
