use knobd_core::audio::{self, MixerError, SinkInputInfo, Volume};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::mixer::Mixer;

/// Request to show the result of a volume or mute change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeNotice {
    pub label: String,
    /// Effective volume: stream volume scaled by its output device.
    pub percent: u8,
    pub muted: bool,
}

/// Applies mute and volume changes to sink-inputs.
///
/// State is re-read from the mixer before every write and again afterwards
/// for reporting, since other clients may change it at any time.
pub struct VolumeController<M> {
    mixer: M,
    step: f64,
    notice_tx: Option<mpsc::Sender<VolumeNotice>>,
    notify: bool,
}

impl<M: Mixer> VolumeController<M> {
    pub fn new(mixer: M, step: f64, notice_tx: Option<mpsc::Sender<VolumeNotice>>) -> Self {
        VolumeController {
            mixer,
            step,
            notice_tx,
            notify: true,
        }
    }

    pub fn mixer(&self) -> &M {
        &self.mixer
    }

    pub fn set_step(&mut self, step: f64) {
        self.step = step;
    }

    /// Enable or suppress notices. The returned value is unaffected.
    pub fn set_notify(&mut self, notify: bool) {
        self.notify = notify;
    }

    /// Flip the mute flag of every stream in `streams`.
    ///
    /// Streams are flipped independently. Streams that vanished are skipped.
    /// An empty set does nothing.
    pub async fn toggle_mute(
        &self,
        label: &str,
        streams: &[u32],
    ) -> Result<Option<VolumeNotice>, MixerError> {
        if streams.is_empty() {
            return Ok(None);
        }

        for &index in streams {
            let Some(current) = self.mixer.sink_input(index).await? else {
                debug!("sink-input {index} vanished before mute toggle");
                continue;
            };
            self.mixer
                .set_sink_input_mute(index, !current.muted)
                .await?;
            debug!("sink-input {index} muted={}", !current.muted);
        }

        self.report(label, streams).await
    }

    /// Move every stream in `streams` by `delta` detents, clamped to [0, 1].
    pub async fn adjust_volume(
        &self,
        label: &str,
        streams: &[u32],
        delta: i32,
    ) -> Result<Option<VolumeNotice>, MixerError> {
        if streams.is_empty() || delta == 0 {
            return Ok(None);
        }

        for &index in streams {
            let Some(current) = self.mixer.sink_input(index).await? else {
                debug!("sink-input {index} vanished before volume change");
                continue;
            };
            let target = current.volume.stepped(delta, self.step);
            if target == current.volume {
                continue;
            }
            self.mixer
                .set_sink_input_volume(index, target, current.channels)
                .await?;
            debug!(
                "sink-input {index} volume {:.3} -> {:.3}",
                current.volume.get(),
                target.get()
            );
        }

        self.report(label, streams).await
    }

    /// Re-read the first surviving stream and emit its effective volume.
    ///
    /// The change itself already happened, so failures here are logged and
    /// do not fail the gesture.
    async fn report(
        &self,
        label: &str,
        streams: &[u32],
    ) -> Result<Option<VolumeNotice>, MixerError> {
        let mut reread: Option<SinkInputInfo> = None;
        for &index in streams {
            if let Some(si) = self.mixer.sink_input(index).await? {
                reread = Some(si);
                break;
            }
        }
        let Some(stream) = reread else {
            return Ok(None);
        };

        let effective = match self.output_scaled(&stream).await {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to read output volume, reporting stream volume: {e}");
                stream.volume
            }
        };

        let notice = VolumeNotice {
            label: label.to_string(),
            percent: effective.percent(),
            muted: stream.muted,
        };
        if let Some(tx) = self.notice_tx.as_ref().filter(|_| self.notify) {
            if tx.try_send(notice.clone()).is_err() {
                debug!("notice channel full, dropping volume notice");
            }
        }
        Ok(Some(notice))
    }

    async fn output_scaled(&self, stream: &SinkInputInfo) -> Result<Volume, MixerError> {
        let sinks = self.mixer.sinks().await?;
        let server = self.mixer.server_info().await?;
        Ok(audio::effective_volume(stream, &sinks, &server))
    }
}
