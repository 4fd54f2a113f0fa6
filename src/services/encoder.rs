use async_trait::async_trait;
use serde::Serialize;

/// Ladder of output renditions for adaptive playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rendition {
    P1080,
    P720,
    P480,
    P360,
}

impl Rendition {
    pub const LADDER: [Rendition; 4] =
        [Rendition::P1080, Rendition::P720, Rendition::P480, Rendition::P360];

    pub fn label(&self) -> &'static str {
        match self {
            Rendition::P1080 => "1080p",
            Rendition::P720 => "720p",
            Rendition::P480 => "480p",
            Rendition::P360 => "360p",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub source_key: String,
    pub output_prefix: String,
    pub renditions: Vec<Rendition>,
}

#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub id: String,
    pub output_keys: Vec<String>,
}

/// Per-rendition progress sink: rendition and fraction complete in `[0, 1]`.
pub type ProgressSink<'a> = dyn Fn(Rendition, f64) + Send + Sync + 'a;

/// Boundary for a transcoding backend. Implementations submit work, report
/// per-rendition progress through the sink as it happens, and return the
/// keys the outputs will land under.
#[async_trait]
pub trait RenditionEncoder: Send + Sync {
    async fn submit(
        &self,
        request: EncodeRequest,
        on_progress: &ProgressSink<'_>,
    ) -> anyhow::Result<EncodeJob>;
}

/// Placeholder encoder: accepts every job without doing any work. Each
/// rendition is reported complete immediately.
pub struct NoOpEncoder;

#[async_trait]
impl RenditionEncoder for NoOpEncoder {
    async fn submit(
        &self,
        request: EncodeRequest,
        on_progress: &ProgressSink<'_>,
    ) -> anyhow::Result<EncodeJob> {
        let mut output_keys = Vec::with_capacity(request.renditions.len());
        for rendition in &request.renditions {
            output_keys.push(format!("{}/{}.mp4", request.output_prefix, rendition.label()));
            on_progress(*rendition, 1.0);
        }
        tracing::info!(source = %request.source_key, "encode request accepted (no-op)");
        Ok(EncodeJob {
            id: uuid::Uuid::new_v4().to_string(),
            output_keys,
        })
    }
}
