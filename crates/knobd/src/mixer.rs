use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use knobd_core::audio::{MixerError, ServerInfo, SinkInfo, SinkInputInfo, Volume};
use tokio::sync::{oneshot, watch};

use crate::pulse::MixerRequest;

/// Per-request deadline for PA round trips.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Audio mixer operations used by the volume controller.
///
/// Every call is a fresh round trip; nothing is cached between calls.
pub trait Mixer {
    fn sink_inputs(&self) -> impl Future<Output = Result<Vec<SinkInputInfo>, MixerError>> + Send;

    /// `Ok(None)` when the stream no longer exists.
    fn sink_input(
        &self,
        index: u32,
    ) -> impl Future<Output = Result<Option<SinkInputInfo>, MixerError>> + Send;

    fn sinks(&self) -> impl Future<Output = Result<Vec<SinkInfo>, MixerError>> + Send;

    fn server_info(&self) -> impl Future<Output = Result<ServerInfo, MixerError>> + Send;

    fn set_sink_input_mute(
        &self,
        index: u32,
        mute: bool,
    ) -> impl Future<Output = Result<(), MixerError>> + Send;

    fn set_sink_input_volume(
        &self,
        index: u32,
        volume: Volume,
        channels: u8,
    ) -> impl Future<Output = Result<(), MixerError>> + Send;
}

/// Client half of the PA thread.
#[derive(Clone)]
pub struct PulseMixer {
    request_tx: std_mpsc::Sender<MixerRequest>,
    connected: watch::Receiver<bool>,
    timeout: Duration,
}

impl PulseMixer {
    pub fn new(
        request_tx: std_mpsc::Sender<MixerRequest>,
        connected: watch::Receiver<bool>,
    ) -> Self {
        PulseMixer {
            request_tx,
            connected,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Wait until the PA thread reports a connection, up to `limit`.
    pub async fn wait_connected(&mut self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.connected.wait_for(|c| *c))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, MixerError>>) -> MixerRequest,
    ) -> Result<T, MixerError> {
        if !*self.connected.borrow() {
            return Err(MixerError::Disconnected);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(make(reply_tx))
            .map_err(|_| MixerError::Disconnected)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            // Reply dropped: the PA session went away mid-request
            Ok(Err(_)) => Err(MixerError::Disconnected),
            Err(_) => Err(MixerError::Timeout),
        }
    }
}

impl Mixer for PulseMixer {
    async fn sink_inputs(&self) -> Result<Vec<SinkInputInfo>, MixerError> {
        self.request(|reply| MixerRequest::SinkInputs { reply }).await
    }

    async fn sink_input(&self, index: u32) -> Result<Option<SinkInputInfo>, MixerError> {
        self.request(|reply| MixerRequest::SinkInput { index, reply })
            .await
    }

    async fn sinks(&self) -> Result<Vec<SinkInfo>, MixerError> {
        self.request(|reply| MixerRequest::Sinks { reply }).await
    }

    async fn server_info(&self) -> Result<ServerInfo, MixerError> {
        self.request(|reply| MixerRequest::ServerInfo { reply }).await
    }

    async fn set_sink_input_mute(&self, index: u32, mute: bool) -> Result<(), MixerError> {
        self.request(|reply| MixerRequest::SetSinkInputMute { index, mute, reply })
            .await
    }

    async fn set_sink_input_volume(
        &self,
        index: u32,
        volume: Volume,
        channels: u8,
    ) -> Result<(), MixerError> {
        self.request(|reply| MixerRequest::SetSinkInputVolume {
            index,
            volume,
            channels,
            reply,
        })
        .await
    }
}

#[cfg(test)]
pub use mock::{stream, MockMixer};


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnected_client_fails_fast() {
        let (tx, _rx) = std_mpsc::channel();
        let (_connected_tx, connected_rx) = watch::channel(false);
        let mixer = PulseMixer::new(tx, connected_rx);
        assert_eq!(mixer.sink_inputs().await, Err(MixerError::Disconnected));
    }

    #[tokio::test]
    async fn dropped_reply_maps_to_disconnected() {
        let (tx, rx) = std_mpsc::channel::<MixerRequest>();
        let (_connected_tx, connected_rx) = watch::channel(true);
        let mixer = PulseMixer::new(tx, connected_rx);

        let server = std::thread::spawn(move || {
            // Receive and drop the request without replying
            let _ = rx.recv();
        });
        assert_eq!(mixer.sinks().await, Err(MixerError::Disconnected));
        server.join().unwrap();
    }

    #[tokio::test]
    async fn reply_is_forwarded() {
        let (tx, rx) = std_mpsc::channel::<MixerRequest>();
        let (_connected_tx, connected_rx) = watch::channel(true);
        let mixer = PulseMixer::new(tx, connected_rx);

        let server = std::thread::spawn(move || {
            if let Ok(MixerRequest::ServerInfo { reply }) = rx.recv() {
                let _ = reply.send(Ok(ServerInfo {
                    default_sink_name: Some("speakers".into()),
                }));
            }
        });
        let info = mixer.server_info().await.unwrap();
        assert_eq!(info.default_sink_name.as_deref(), Some("speakers"));
        server.join().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let (tx, _rx) = std_mpsc::channel::<MixerRequest>();
        let (_connected_tx, connected_rx) = watch::channel(true);
        let mixer = PulseMixer::new(tx, connected_rx);
        assert_eq!(
            mixer.set_sink_input_mute(1, true).await,
            Err(MixerError::Timeout)
        );
    }
}
