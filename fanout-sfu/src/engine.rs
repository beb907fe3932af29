//! Transport engine backed by the `webrtc` crate
//!
//! Each transport is one `RTCPeerConnection`. Engine callbacks are turned
//! into [`TransportEvent`]s; the forwarding sink is a `TrackLocalStaticRTP`
//! that every viewer connection adds as its outbound track.

use async_trait::async_trait;
use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::marshal::Marshal;

use crate::config::SfuConfig;
use crate::error::TransportError;
use crate::media::{InboundTrack, MediaCodec, MediaSink, MediaUnit, TrackKind};
use crate::signal::{IceCandidate, SdpType, SessionDescription};
use crate::transport::{
    ConnectionState, EventSender, SenderInfo, Transport, TransportEngine, TransportEvent,
};
use crate::types::{SessionId, SessionRole};

const SINK_STREAM_ID: &str = "fanout";

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            _ => Self::New,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, webrtc::Error> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => Err(webrtc::Error::new("rollback is not supported".to_string())),
    }
}

/// `webrtc`-backed [`TransportEngine`]
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<String>,
    keyframe_interval: Option<Duration>,
}

impl WebRtcEngine {
    /// Build the media engine with default codecs and interceptors
    pub fn new(config: &SfuConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Create(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::Create(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!(
            ice_servers = ?config.ice_servers,
            keyframe_interval_secs = config.keyframe_interval_secs,
            "WebRTC transport engine initialized"
        );

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
            keyframe_interval: config.keyframe_interval(),
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn create_transport(
        &self,
        session_id: &SessionId,
        role: SessionRole,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map_err(|e| TransportError::Create(e.to_string()))?;

        debug!(session_id = %session_id, role = %role, "Peer connection created");

        Ok(Arc::new(WebRtcTransport {
            session_id: session_id.clone(),
            pc: Arc::new(pc),
            keyframe_interval: self.keyframe_interval,
            shutdown: CancellationToken::new(),
        }))
    }

    fn create_sink(&self, codec: &MediaCodec) -> Result<Arc<dyn MediaSink>, TransportError> {
        Ok(Arc::new(WebRtcSink::new(codec.clone())))
    }
}

/// One peer connection
pub struct WebRtcTransport {
    session_id: SessionId,
    pc: Arc<RTCPeerConnection>,
    keyframe_interval: Option<Duration>,
    /// Stops keyframe requests and RTCP readers when the transport closes
    shutdown: CancellationToken,
}

#[async_trait]
impl Transport for WebRtcTransport {
    fn register_events(&self, events: EventSender) {
        let tx = events.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::CandidateDiscovered(init.into()));
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
                }
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let _ = tx.send(TransportEvent::IceStateChanged(state.to_string()));
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let _ = tx.send(TransportEvent::ConnectionStateChanged(state.into()));
                Box::pin(async {})
            }));

        let tx = events;
        let pc = Arc::downgrade(&self.pc);
        let keyframe_interval = self.keyframe_interval;
        let shutdown = self.shutdown.clone();
        let session_id = self.session_id.clone();
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            if track.kind() == RTPCodecType::Video {
                if let Some(period) = keyframe_interval {
                    tokio::spawn(request_keyframes(
                        session_id.clone(),
                        pc.clone(),
                        track.ssrc(),
                        period,
                        shutdown.child_token(),
                    ));
                }
            }
            let _ = tx.send(TransportEvent::TrackArrived(Arc::new(WebRtcInboundTrack { track })));
            Box::pin(async {})
        }));
    }

    async fn set_remote_description(&self, offer: SessionDescription) -> Result<(), TransportError> {
        let desc = to_rtc_description(offer)
            .map_err(|e| TransportError::RemoteDescription(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| TransportError::RemoteDescription(e.to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Answer(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, answer: SessionDescription) -> Result<(), TransportError> {
        let desc = to_rtc_description(answer)
            .map_err(|e| TransportError::LocalDescription(e.to_string()))?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| TransportError::LocalDescription(e.to_string()))
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn attach_sink(&self, sink: Arc<dyn MediaSink>) -> Result<(), TransportError> {
        let Some(sink) = sink.as_any().downcast_ref::<WebRtcSink>() else {
            return Err(TransportError::Sink(format!(
                "sink {} was not created by this engine",
                sink.id()
            )));
        };

        let track = Arc::clone(&sink.track) as Arc<dyn TrackLocal + Send + Sync>;
        let sender = self
            .pc
            .add_track(track)
            .await
            .map_err(|e| TransportError::Sink(e.to_string()))?;

        tokio::spawn(drain_rtcp(sender, self.shutdown.child_token()));
        Ok(())
    }

    async fn senders(&self) -> Vec<SenderInfo> {
        let mut infos = Vec::new();
        for sender in self.pc.get_senders().await {
            let info = match sender.track().await {
                Some(track) => SenderInfo {
                    kind: Some(track.kind().into()),
                    track_id: Some(track.id().to_string()),
                },
                None => SenderInfo {
                    kind: None,
                    track_id: None,
                },
            };
            infos.push(info);
        }
        infos
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

/// Periodic Picture Loss Indication so late-joining viewers get a keyframe
async fn request_keyframes(
    session_id: SessionId,
    pc: Weak<RTCPeerConnection>,
    media_ssrc: u32,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(pc) = pc.upgrade() else {
            break;
        };
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        };
        if let Err(e) = pc.write_rtcp(&[Box::new(pli)]).await {
            debug!(session_id = %session_id, ssrc = media_ssrc, error = %e, "Stopping keyframe requests");
            break;
        }
    }
}

/// Read RTCP for an outbound sender so interceptors keep running
async fn drain_rtcp(sender: Arc<RTCRtpSender>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            result = sender.read_rtcp() => {
                if result.is_err() {
                    break;
                }
            }
        }
    }
}

struct WebRtcInboundTrack {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl InboundTrack for WebRtcInboundTrack {
    fn id(&self) -> String {
        self.track.id().to_string()
    }

    fn codec(&self) -> MediaCodec {
        let capability = self.track.codec().capability;
        MediaCodec {
            kind: self.track.kind().into(),
            mime_type: capability.mime_type,
            clock_rate: capability.clock_rate,
            channels: capability.channels,
            sdp_fmtp_line: capability.sdp_fmtp_line,
        }
    }

    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    async fn read_unit(&self) -> Result<MediaUnit, TransportError> {
        let (packet, _) = self
            .track
            .read_rtp()
            .await
            .map_err(|e| TransportError::Read(e.to_string()))?;
        let data = packet
            .marshal()
            .map_err(|e| TransportError::Read(e.to_string()))?;

        Ok(MediaUnit::new(
            data,
            packet.header.ssrc,
            packet.header.sequence_number,
            packet.header.timestamp,
        ))
    }
}

/// Forwarding sink: a static RTP track any number of viewers can add
pub struct WebRtcSink {
    codec: MediaCodec,
    track: Arc<TrackLocalStaticRTP>,
}

impl WebRtcSink {
    fn new(codec: MediaCodec) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: codec.mime_type.clone(),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            sdp_fmtp_line: codec.sdp_fmtp_line.clone(),
            rtcp_feedback: Vec::new(),
        };
        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            codec.kind.to_string(),
            SINK_STREAM_ID.to_string(),
        ));
        Self { codec, track }
    }
}

#[async_trait]
impl MediaSink for WebRtcSink {
    fn id(&self) -> String {
        self.track.id().to_string()
    }

    fn codec(&self) -> MediaCodec {
        self.codec.clone()
    }

    async fn write_unit(&self, unit: &MediaUnit) -> Result<(), TransportError> {
        self.track
            .write(&unit.data)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
