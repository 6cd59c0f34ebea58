//! Track source resolution
//!
//! Maps a track plus the selected sound quality to a playable URI.
//! Cached media always wins; remote media is subject to the network
//! policy checked by the engine before any resource is created.

use async_trait::async_trait;

use resona_common::{ErrorCode, SoundQuality, TrackDescriptor};

/// Resolution failure carrying the wire error code to report.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveError {
    pub code: ErrorCode,
    pub message: String,
}

impl ResolveError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// External collaborator resolving track sources.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Whether a local copy exists for this track at this quality.
    async fn is_cached(&self, track: &TrackDescriptor, quality: SoundQuality) -> bool;

    /// URI of the local copy, if any.
    async fn cached_uri(&self, track: &TrackDescriptor, quality: SoundQuality) -> Option<String>;

    /// Resolve the remote URI; only consulted when no cached copy
    /// exists and the network policy allows it.
    async fn remote_uri(
        &self,
        track: &TrackDescriptor,
        quality: SoundQuality,
    ) -> Result<String, ResolveError>;
}

/// Resolver that takes the track's own source URI at face value.
///
/// `file://` URIs and absolute paths count as cached; anything else is
/// remote. Suitable for local libraries and as default wiring.
pub struct DirectResolver;

fn is_local(uri: &str) -> bool {
    uri.starts_with("file://") || uri.starts_with('/')
}

#[async_trait]
impl TrackResolver for DirectResolver {
    async fn is_cached(&self, track: &TrackDescriptor, _quality: SoundQuality) -> bool {
        track.source_uri.as_deref().is_some_and(is_local)
    }

    async fn cached_uri(&self, track: &TrackDescriptor, _quality: SoundQuality) -> Option<String> {
        track.source_uri.clone().filter(|uri| is_local(uri))
    }

    async fn remote_uri(
        &self,
        track: &TrackDescriptor,
        _quality: SoundQuality,
    ) -> Result<String, ResolveError> {
        track.source_uri.clone().ok_or_else(|| {
            ResolveError::new(
                ErrorCode::FileNotFound,
                format!("track {} has no source uri", track.id),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(uri: Option<&str>) -> TrackDescriptor {
        TrackDescriptor {
            id: "t".into(),
            title: "t".into(),
            artist: "a".into(),
            album: "b".into(),
            source_uri: uri.map(Into::into),
            icon_uri: None,
            duration_ms: Some(1000),
            seek_forbidden: false,
        }
    }

    #[tokio::test]
    async fn file_uri_counts_as_cached() {
        let resolver = DirectResolver;
        let local = track(Some("file:///music/a.ogg"));
        assert!(resolver.is_cached(&local, SoundQuality::Standard).await);
        assert_eq!(
            resolver.cached_uri(&local, SoundQuality::Standard).await,
            Some("file:///music/a.ogg".to_string())
        );
    }

    #[tokio::test]
    async fn http_uri_is_remote() {
        let resolver = DirectResolver;
        let remote = track(Some("https://cdn.example/a.ogg"));
        assert!(!resolver.is_cached(&remote, SoundQuality::Standard).await);
        assert_eq!(
            resolver
                .remote_uri(&remote, SoundQuality::Standard)
                .await
                .unwrap(),
            "https://cdn.example/a.ogg"
        );
    }

    #[tokio::test]
    async fn missing_uri_is_file_not_found() {
        let resolver = DirectResolver;
        let none = track(None);
        let err = resolver
            .remote_uri(&none, SoundQuality::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FileNotFound);
    }
}
