//! WebRTC transport: real peer connections carrying one PCMU audio track.
//!
//! Outbound audio takes 48 kHz capture frames, decimates them to 8 kHz and
//! writes mu-law samples onto the local track; inbound tracks are decoded
//! and fed straight to playback. PCMU keeps the codec path pure Rust and
//! interoperable with browser peers, which must support it.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use catcord_shared::constants::STUN_SERVERS;
use catcord_shared::{IceCandidate, SessionDescription};

use crate::audio::{start_playback, AudioConfig, LocalMedia};
use crate::codec;
use crate::error::{CallError, Result};
use crate::peer::{PeerConnection, PeerEvent, PeerFactory, PeerState};

const PCMU_SAMPLE_RATE: u32 = 8000;

/// Creates WebRTC peer connections configured with the public STUN servers
/// both clients agree on.
pub struct RtcPeerFactory {
    ice_servers: Vec<String>,
}

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self {
            ice_servers: STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for RtcPeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        media: &LocalMedia,
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::Peer(e.to_string()))?;

        let registry = Registry::new();
        let registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| CallError::Peer(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| CallError::Peer(e.to_string()))?,
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Locally gathered candidates go to the negotiator for publishing.
        let candidate_tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = candidate_tx.send(PeerEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_m_line_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(error) => warn!(%error, "Failed to serialize local candidate"),
                    }
                }
            })
        }));

        let state_tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(?state, "Peer connection state changed");
            let _ = state_tx.send(PeerEvent::StateChanged(map_state(state)));
            Box::pin(async {})
        }));

        attach_outbound_audio(&pc, media).await?;
        attach_inbound_audio(&pc, media.config().clone(), media.active_flag());

        Ok((Arc::new(RtcPeer { pc }) as Arc<dyn PeerConnection>, event_rx))
    }
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerState::New,
    }
}

/// Adds the local PCMU track and spawns the capture-encode-send loop.
async fn attach_outbound_audio(pc: &Arc<RTCPeerConnection>, media: &LocalMedia) -> Result<()> {
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_owned(),
            clock_rate: PCMU_SAMPLE_RATE,
            channels: 1,
            ..Default::default()
        },
        "audio".to_owned(),
        "catcord-voice".to_owned(),
    ));

    let rtp_sender = pc
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| CallError::Peer(e.to_string()))?;

    // The sender must be read so interceptors process incoming RTCP.
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
    });

    let mut frames = media
        .take_frames()
        .ok_or_else(|| CallError::Peer("local media frames already taken".to_string()))?;
    let frame_duration = Duration::from_millis(media.config().frame_size_ms as u64);

    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let narrow = codec::downsample_48k_to_8k(&frame);
            let payload = codec::encode_frame(&codec::f32_to_i16(&narrow));
            let sample = Sample {
                data: Bytes::from(payload),
                duration: frame_duration,
                ..Default::default()
            };
            if let Err(error) = track.write_sample(&sample).await {
                debug!(%error, "Stopping outbound audio");
                break;
            }
        }
        debug!("Outbound audio loop ended");
    });

    Ok(())
}

/// Plays the remote track: decode PCMU, upsample, feed the output device.
fn attach_inbound_audio(
    pc: &Arc<RTCPeerConnection>,
    config: AudioConfig,
    active: Arc<AtomicBool>,
) {
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let config = config.clone();
            let active = Arc::clone(&active);
            Box::pin(async move {
                info!(ssrc = track.ssrc(), "Remote track received");
                let playback = match start_playback(&config, active) {
                    Ok(tx) => tx,
                    Err(error) => {
                        error!(%error, "Cannot start playback for remote track");
                        return;
                    }
                };
                while let Ok((packet, _)) = track.read_rtp().await {
                    let wide = codec::upsample_8k_to_48k(&codec::i16_to_f32(
                        &codec::decode_frame(&packet.payload),
                    ));
                    if playback.send(wide).await.is_err() {
                        break;
                    }
                }
                debug!("Remote track ended");
            })
        },
    ));
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::Peer(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| CallError::Peer(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::Peer(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| CallError::Peer(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = if desc.kind == "answer" {
            RTCSessionDescription::answer(desc.sdp)
        } else {
            RTCSessionDescription::offer(desc.sdp)
        }
        .map_err(|e| CallError::Peer(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CallError::Peer(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| CallError::Peer(e.to_string()))
    }

    async fn close(&self) {
        if let Err(error) = self.pc.close().await {
            warn!(%error, "Error closing peer connection");
        }
    }
}
