//! Local capture and remote playback handles.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;
use crate::models::CallMedium;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One live capture track (microphone or camera).
///
/// Capture resources are held until `stop` is called; disabling a track
/// only silences it.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Sending half to attach to a peer connection, if this track has one.
    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        None
    }
}

/// Tracks acquired for one call. Every track is stopped when the stream is
/// dropped, whichever path the call took to end.
pub struct LocalStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    /// Flips the enabled flag on every track of `kind`.
    ///
    /// Returns the new enabled state, or `None` when the stream has no track
    /// of that kind.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let enabled = !self.tracks_of(kind).next()?.is_enabled();
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
        Some(enabled)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            if !track.is_stopped() {
                track.stop();
            }
        }
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("tracks", &self.tracks.iter().map(|t| (t.id().to_string(), t.kind())).collect::<Vec<_>>())
            .finish()
    }
}

/// Track received from the peer.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    /// Stream grouping announced by the sender, if any.
    pub stream_id: Option<String>,
    pub handle: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id,
            handle: None,
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

const SYNTHETIC_STREAM_ID: &str = "remote";

/// Remote playback stream, filled one track at a time as they arrive.
#[derive(Debug, Default)]
pub struct RemoteStream {
    inner: RwLock<RemoteStreamInner>,
}

#[derive(Debug, Default)]
struct RemoteStreamInner {
    id: Option<String>,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `track`; returns false if a track with the same id is present.
    pub fn add_track(&self, track: RemoteTrack) -> bool {
        let mut inner = self.inner.write();
        if inner.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        if inner.id.is_none() {
            inner.id = Some(
                track
                    .stream_id
                    .clone()
                    .unwrap_or_else(|| SYNTHETIC_STREAM_ID.to_string()),
            );
        }
        inner.tracks.push(track);
        true
    }

    pub fn id(&self) -> Option<String> {
        self.inner.read().id.clone()
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.inner.read().tracks.clone()
    }

    pub fn has_video(&self) -> bool {
        self.inner.read().tracks.iter().any(|t| t.kind == TrackKind::Video)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().tracks.is_empty()
    }
}

/// Source of local capture for a call.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Opens microphone, plus camera for video calls.
    async fn acquire(&self, medium: CallMedium) -> Result<LocalStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTrack;

    fn stream(tracks: &[Arc<FakeTrack>]) -> LocalStream {
        LocalStream::new(tracks.iter().map(|t| t.clone() as Arc<dyn MediaTrack>).collect())
    }

    #[test]
    fn test_toggle_only_touches_matching_kind() {
        let mic = FakeTrack::new("mic", TrackKind::Audio);
        let cam = FakeTrack::new("cam", TrackKind::Video);
        let local = stream(&[mic.clone(), cam.clone()]);

        assert_eq!(local.toggle(TrackKind::Audio), Some(false));
        assert!(!mic.is_enabled());
        assert!(cam.is_enabled());

        assert_eq!(local.toggle(TrackKind::Audio), Some(true));
        assert!(mic.is_enabled());
    }

    #[test]
    fn test_toggle_without_tracks_of_kind() {
        let mic = FakeTrack::new("mic", TrackKind::Audio);
        let local = stream(&[mic.clone()]);

        assert_eq!(local.toggle(TrackKind::Video), None);
        assert!(mic.is_enabled());
    }

    #[test]
    fn test_drop_stops_every_track() {
        let mic = FakeTrack::new("mic", TrackKind::Audio);
        let cam = FakeTrack::new("cam", TrackKind::Video);
        drop(stream(&[mic.clone(), cam.clone()]));

        assert!(mic.is_stopped());
        assert!(cam.is_stopped());
    }

    #[test]
    fn test_remote_stream_synthesizes_grouping() {
        let remote = RemoteStream::new();
        assert!(remote.is_empty());

        assert!(remote.add_track(RemoteTrack::new("a1", TrackKind::Audio, None)));
        assert_eq!(remote.id().as_deref(), Some(SYNTHETIC_STREAM_ID));

        assert!(remote.add_track(RemoteTrack::new("v1", TrackKind::Video, None)));
        assert!(!remote.add_track(RemoteTrack::new("v1", TrackKind::Video, None)));
        assert_eq!(remote.tracks().len(), 2);
        assert!(remote.has_video());
    }

    #[test]
    fn test_remote_stream_adopts_sender_grouping() {
        let remote = RemoteStream::new();
        remote.add_track(RemoteTrack::new("a1", TrackKind::Audio, Some("peer-stream".into())));
        remote.add_track(RemoteTrack::new("v1", TrackKind::Video, None));

        assert_eq!(remote.id().as_deref(), Some("peer-stream"));
        assert_eq!(remote.tracks().len(), 2);
    }
}
