use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use knobd_core::app::ApplicationId;
use knobd_core::audio::{MixerError, ServerInfo, SinkInfo, SinkInputInfo, SinkState, Volume};
use libpulse_binding as pulse;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::introspect;
use libpulse_binding::context::{Context, FlagSet as CtxFlagSet, State as CtxState};
use libpulse_binding::mainloop::threaded::Mainloop;
use libpulse_binding::proplist::Proplist;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<Result<T, MixerError>>;

/// Requests served by the PA thread. Every request carries its reply channel.
#[derive(Debug)]
pub enum MixerRequest {
    SinkInputs {
        reply: Reply<Vec<SinkInputInfo>>,
    },
    SinkInput {
        index: u32,
        reply: Reply<Option<SinkInputInfo>>,
    },
    Sinks {
        reply: Reply<Vec<SinkInfo>>,
    },
    ServerInfo {
        reply: Reply<ServerInfo>,
    },
    SetSinkInputMute {
        index: u32,
        mute: bool,
        reply: Reply<()>,
    },
    SetSinkInputVolume {
        index: u32,
        volume: Volume,
        channels: u8,
        reply: Reply<()>,
    },
}

impl MixerRequest {
    /// True once the caller has given up waiting.
    fn is_abandoned(&self) -> bool {
        match self {
            MixerRequest::SinkInputs { reply } => reply.is_closed(),
            MixerRequest::SinkInput { reply, .. } => reply.is_closed(),
            MixerRequest::Sinks { reply } => reply.is_closed(),
            MixerRequest::ServerInfo { reply } => reply.is_closed(),
            MixerRequest::SetSinkInputMute { reply, .. }
            | MixerRequest::SetSinkInputVolume { reply, .. } => reply.is_closed(),
        }
    }
}

/// Main PulseAudio thread function.
///
/// Keeps a PA connection alive and answers [`MixerRequest`]s from the engine.
/// `connected_tx` reflects whether requests can currently be served.
pub fn run(
    request_rx: std_mpsc::Receiver<MixerRequest>,
    connected_tx: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut retry_delay_ms: u64 = 1000;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let session_start = Instant::now();
        match run_session(&request_rx, &connected_tx, &cancel) {
            Ok(()) => {
                break;
            }
            Err(e) => {
                let _ = connected_tx.send(false);
                warn!("PulseAudio session ended: {e}");
                if cancel.is_cancelled() {
                    return;
                }
                // Reset backoff if session was stable (ran >30s)
                if session_start.elapsed() > Duration::from_secs(30) {
                    retry_delay_ms = 1000;
                }
                fail_pending(&request_rx);
                std::thread::sleep(Duration::from_millis(retry_delay_ms));
                retry_delay_ms = (retry_delay_ms * 2).min(4000);
            }
        }
    }

    let _ = connected_tx.send(false);
    info!("PulseAudio thread exiting");
}

/// Answer everything queued while the connection was down.
fn fail_pending(request_rx: &std_mpsc::Receiver<MixerRequest>) {
    while let Ok(req) = request_rx.try_recv() {
        fail(req, MixerError::Disconnected);
    }
}

fn fail(req: MixerRequest, err: MixerError) {
    match req {
        MixerRequest::SinkInputs { reply } => drop(reply.send(Err(err))),
        MixerRequest::SinkInput { reply, .. } => drop(reply.send(Err(err))),
        MixerRequest::Sinks { reply } => drop(reply.send(Err(err))),
        MixerRequest::ServerInfo { reply } => drop(reply.send(Err(err))),
        MixerRequest::SetSinkInputMute { reply, .. }
        | MixerRequest::SetSinkInputVolume { reply, .. } => drop(reply.send(Err(err))),
    }
}

fn run_session(
    request_rx: &std_mpsc::Receiver<MixerRequest>,
    connected_tx: &watch::Sender<bool>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    // Rc<RefCell> is enough: only this thread touches the mainloop and context
    // handles, always under the mainloop lock. Callbacks own their state.
    let mainloop =
        Rc::new(RefCell::new(Mainloop::new().ok_or_else(|| {
            anyhow::anyhow!("failed to create PA mainloop")
        })?));

    let mut proplist =
        Proplist::new().ok_or_else(|| anyhow::anyhow!("failed to create PA proplist"))?;
    proplist
        .set_str(pulse::proplist::properties::APPLICATION_NAME, "knobd")
        .map_err(|_| anyhow::anyhow!("failed to set proplist"))?;

    let context = Rc::new(RefCell::new(
        Context::new_with_proplist(&*mainloop.borrow(), "knobd", &proplist)
            .ok_or_else(|| anyhow::anyhow!("failed to create PA context"))?,
    ));

    // Connect (before mainloop starts, no lock needed)
    context
        .borrow_mut()
        .connect(None, CtxFlagSet::NOFLAGS, None)
        .map_err(|e| anyhow::anyhow!("PA connect failed: {e}"))?;

    mainloop
        .borrow_mut()
        .start()
        .map_err(|e| anyhow::anyhow!("PA mainloop start failed: {e}"))?;

    // Wait for context to be ready.
    // Must hold the mainloop lock when accessing the context from our thread.
    loop {
        if cancel.is_cancelled() {
            mainloop.borrow_mut().stop();
            return Ok(());
        }

        mainloop.borrow_mut().lock();
        let state = context.borrow().get_state();
        mainloop.borrow_mut().unlock();

        match state {
            CtxState::Ready => break,
            CtxState::Failed | CtxState::Terminated => {
                mainloop.borrow_mut().stop();
                return Err(anyhow::anyhow!("PA context failed to connect"));
            }
            _ => {
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    info!("PulseAudio connected");
    let _ = connected_tx.send(true);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Block briefly for the next request so cancellation and context
        // health are still checked regularly.
        let first = match request_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(req) => Some(req),
            Err(std_mpsc::RecvTimeoutError::Timeout) => None,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                debug!("mixer request channel closed");
                break;
            }
        };

        mainloop.borrow_mut().lock();

        let state = context.borrow().get_state();
        if state != CtxState::Ready {
            mainloop.borrow_mut().unlock();
            mainloop.borrow_mut().stop();
            if let Some(req) = first {
                fail(req, MixerError::Disconnected);
            }
            return Err(anyhow::anyhow!("PA context disconnected"));
        }

        for req in first.into_iter().chain(std::iter::from_fn(|| request_rx.try_recv().ok())) {
            if req.is_abandoned() {
                debug!("skipping abandoned mixer request");
                continue;
            }
            execute_request(&context, req);
        }

        mainloop.borrow_mut().unlock();
    }

    // Clean shutdown
    mainloop.borrow_mut().lock();
    context.borrow_mut().disconnect();
    mainloop.borrow_mut().unlock();
    mainloop.borrow_mut().stop();
    Ok(())
}

/// Issue the PA operation for `req`. Caller must hold the mainloop lock.
///
/// Replies are sent from the PA callbacks on the mainloop thread.
fn execute_request(context: &Rc<RefCell<Context>>, req: MixerRequest) {
    let mut introspect = context.borrow().introspect();

    match req {
        MixerRequest::SinkInputs { reply } => {
            let mut items = Vec::new();
            let mut reply = Some(reply);
            introspect.get_sink_input_info_list(move |result| match result {
                ListResult::Item(info) => items.push(sink_input_from_pa(info)),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        let _ = reply.send(Ok(std::mem::take(&mut items)));
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        let _ = reply.send(Err(MixerError::Failed(
                            "listing sink-inputs failed".into(),
                        )));
                    }
                }
            });
        }
        MixerRequest::SinkInput { index, reply } => {
            let mut found = None;
            let mut reply = Some(reply);
            introspect.get_sink_input_info(index, move |result| match result {
                ListResult::Item(info) => found = Some(sink_input_from_pa(info)),
                // PA reports an unknown index as an error: the stream is gone
                ListResult::End | ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        let _ = reply.send(Ok(found.take()));
                    }
                }
            });
        }
        MixerRequest::Sinks { reply } => {
            let mut items = Vec::new();
            let mut reply = Some(reply);
            introspect.get_sink_info_list(move |result| match result {
                ListResult::Item(info) => items.push(sink_from_pa(info)),
                ListResult::End => {
                    if let Some(reply) = reply.take() {
                        let _ = reply.send(Ok(std::mem::take(&mut items)));
                    }
                }
                ListResult::Error => {
                    if let Some(reply) = reply.take() {
                        let _ = reply.send(Err(MixerError::Failed("listing sinks failed".into())));
                    }
                }
            });
        }
        MixerRequest::ServerInfo { reply } => {
            let mut reply = Some(reply);
            introspect.get_server_info(move |info| {
                if let Some(reply) = reply.take() {
                    let _ = reply.send(Ok(ServerInfo {
                        default_sink_name: info.default_sink_name.as_ref().map(|s| s.to_string()),
                    }));
                }
            });
        }
        MixerRequest::SetSinkInputMute { index, mute, reply } => {
            introspect.set_sink_input_mute(index, mute, Some(success_callback(reply, "mute")));
        }
        MixerRequest::SetSinkInputVolume {
            index,
            volume,
            channels,
            reply,
        } => {
            let cv = make_channel_volumes(volume, channels);
            introspect.set_sink_input_volume(index, &cv, Some(success_callback(reply, "volume")));
        }
    }
}

fn success_callback(reply: Reply<()>, what: &'static str) -> Box<dyn FnMut(bool) + 'static> {
    let mut reply = Some(reply);
    Box::new(move |success| {
        if let Some(reply) = reply.take() {
            let result = if success {
                Ok(())
            } else {
                Err(MixerError::Failed(format!("setting {what} failed")))
            };
            let _ = reply.send(result);
        }
    })
}

fn sink_input_from_pa(info: &introspect::SinkInputInfo<'_>) -> SinkInputInfo {
    let vol = volume_from_pa(info.volume.avg());
    let binary = info.proplist.get_str("application.process.binary");
    let app_name = info.proplist.get_str("application.name");
    let pid = info
        .proplist
        .get_str("application.process.id")
        .and_then(|s| s.parse::<u32>().ok());
    let name = app_name
        .clone()
        .or_else(|| info.name.as_ref().map(|s| s.to_string()))
        .unwrap_or_default();

    SinkInputInfo {
        index: info.index,
        app: ApplicationId::for_stream(binary.as_deref(), app_name.as_deref()),
        name,
        binary,
        pid,
        sink_index: info.sink,
        volume: Volume::new(vol),
        muted: info.mute,
        corked: info.corked,
        channels: info.volume.len(),
    }
}

fn sink_from_pa(info: &introspect::SinkInfo<'_>) -> SinkInfo {
    let vol = volume_from_pa(info.volume.avg());
    SinkInfo {
        index: info.index,
        name: info
            .name
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        description: info
            .description
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        volume: Volume::new(vol),
        muted: info.mute,
        channels: info.volume.len(),
        state: match info.state {
            pulse::def::SinkState::Running => SinkState::Running,
            pulse::def::SinkState::Idle => SinkState::Idle,
            pulse::def::SinkState::Suspended => SinkState::Suspended,
            _ => SinkState::Unknown,
        },
    }
}

/// PulseAudio's own scale, where `Volume::NORMAL` is 1.0 (what pavucontrol
/// shows as 100%). Steps are applied here, not on linear amplitude.
fn volume_from_pa(volume: pulse::volume::Volume) -> f64 {
    f64::from(volume.0) / f64::from(pulse::volume::Volume::NORMAL.0)
}

fn volume_to_pa(volume: Volume) -> pulse::volume::Volume {
    let raw = (volume.get() * f64::from(pulse::volume::Volume::NORMAL.0)).round();
    pulse::volume::Volume(raw as u32)
}

fn make_channel_volumes(volume: Volume, channels: u8) -> pulse::volume::ChannelVolumes {
    let pa_vol = volume_to_pa(volume);
    let mut cv = pulse::volume::ChannelVolumes::default();
    cv.set(channels.max(1), pa_vol);
    cv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_requests_fail_with_disconnected() {
        let (tx, rx) = std_mpsc::channel();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        tx.send(MixerRequest::SetSinkInputMute {
            index: 3,
            mute: true,
            reply: reply_tx,
        })
        .unwrap();

        fail_pending(&rx);
        assert_eq!(reply_rx.try_recv().unwrap(), Err(MixerError::Disconnected));
    }

    #[test]
    fn abandoned_request_detected() {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = MixerRequest::SinkInputs { reply: reply_tx };
        assert!(!req.is_abandoned());
        drop(reply_rx);
        assert!(req.is_abandoned());
    }

    #[test]
    fn channel_volumes_cover_all_channels() {
        let cv = make_channel_volumes(Volume::new(0.5), 2);
        assert_eq!(cv.len(), 2);
        let cv = make_channel_volumes(Volume::new(0.5), 0);
        assert_eq!(cv.len(), 1);
    }

    #[test]
    fn one_detent_is_half_a_percent_on_the_pa_scale() {
        let norm = pulse::volume::Volume::NORMAL.0;
        let up = Volume::new(0.0).stepped(1, 0.005);
        assert_eq!(volume_to_pa(up).0, (f64::from(norm) * 0.005).round() as u32);

        assert_eq!(volume_from_pa(pulse::volume::Volume::NORMAL), 1.0);
        assert_eq!(volume_from_pa(pulse::volume::Volume::MUTED), 0.0);
        assert_eq!(volume_to_pa(Volume::new(1.0)), pulse::volume::Volume::NORMAL);
        let half = volume_from_pa(volume_to_pa(Volume::new(0.5)));
        assert!((half - 0.5).abs() < 1e-4);
    }
}
