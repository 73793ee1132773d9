// loader.rs — background texture loading

use crate::error::LoadError;
use crate::material::Texture;
use crate::projection::ProjectionId;
use image::codecs::gif::GifDecoder;
use image::io::Reader as ImageReader;
use image::{AnimationDecoder, GenericImageView};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Animation,
    Video,
}

impl MediaKind {
    /// By extension; unknown extensions are tried as still images.
    pub fn from_url(url: &str) -> Self {
        let ext = Path::new(url)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gif" => MediaKind::Animation,
            "mp4" | "webm" | "ogg" | "mov" => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Shown when a source is rejected.
pub const SUPPORTED_MEDIA: &str = "still images (png, jpeg, webp, bmp, ...) and gif animations";

/// Decodes `path` synchronously. Still images yield one frame, GIFs every
/// frame with its delay.
pub fn load_texture(path: &Path) -> Result<Texture, LoadError> {
    let source = path.to_string_lossy().into_owned();
    match MediaKind::from_url(&source) {
        MediaKind::Video => {
            log::warn!("{} is video, which is not played; supported: {}", source, SUPPORTED_MEDIA);
            Err(LoadError::UnsupportedMedia(source))
        }
        MediaKind::Animation => {
            let decoder = GifDecoder::new(open(path)?)?;
            let frames = decoder.into_frames().collect_frames()?;
            if frames.is_empty() {
                return Err(LoadError::Empty(source));
            }
            let frames = frames
                .into_iter()
                .map(|frame| {
                    let (numer, denom) = frame.delay().numer_denom_ms();
                    let seconds = numer as f32 / denom.max(1) as f32 / 1000.0;
                    (frame.into_buffer(), seconds)
                })
                .collect();
            Ok(Texture::from_frames(source, frames))
        }
        MediaKind::Image => {
            let mut reader = ImageReader::new(open(path)?)
                .with_guessed_format()
                .map_err(|source| LoadError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            reader.no_limits();
            let img = reader.decode()?;
            let (w, h) = img.dimensions();
            log::debug!("decoded {} ({}x{})", source, w, h);
            Ok(Texture::from_image(source, img.to_rgba8()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadTicket(u64);

#[derive(Debug)]
pub struct LoadedTexture {
    pub ticket: LoadTicket,
    pub target: ProjectionId,
    pub url: String,
    pub texture: Result<Arc<Texture>, LoadError>,
}

/// Decodes on worker threads and hands results back over a channel, to be
/// drained on the frame thread.
pub struct AssetLoader {
    base_dir: Option<PathBuf>,
    tx: Sender<LoadedTexture>,
    rx: Receiver<LoadedTexture>,
    next_ticket: u64,
    pending: usize,
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AssetLoader {
    /// Relative URLs resolve against `base_dir`.
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        let (tx, rx) = channel();
        Self {
            base_dir,
            tx,
            rx,
            next_ticket: 0,
            pending: 0,
        }
    }

    pub fn set_base_dir(&mut self, base_dir: Option<PathBuf>) {
        self.base_dir = base_dir;
    }

    pub fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Requests still in flight.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn request(&mut self, target: ProjectionId, url: &str) -> LoadTicket {
        let ticket = LoadTicket(self.next_ticket);
        self.next_ticket += 1;
        self.pending += 1;

        let path = self.resolve(url);
        let url = url.to_string();
        let tx = self.tx.clone();
        thread::spawn(move || {
            log::info!("loading {} in background", path.display());
            let texture = load_texture(&path).map(|t| Arc::new(t.with_source(url.as_str())));
            if let Err(e) = &texture {
                log::error!("failed to load {}: {}", url, e);
            }
            let done = LoadedTexture {
                ticket,
                target,
                url,
                texture,
            };
            if tx.send(done).is_err() {
                log::warn!("loader dropped before {} finished", path.display());
            }
        });
        ticket
    }

    /// Everything finished since the last poll. Never blocks.
    pub fn poll(&mut self) -> Vec<LoadedTexture> {
        let done: Vec<LoadedTexture> = self.rx.try_iter().collect();
        self.pending -= done.len().min(self.pending);
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255])).save(&path).unwrap();
        path
    }

    #[test]
    fn classifies_media_by_extension() {
        assert_eq!(MediaKind::from_url("a/b.PNG"), MediaKind::Image);
        assert_eq!(MediaKind::from_url("clip.gif"), MediaKind::Animation);
        assert_eq!(MediaKind::from_url("movie.webm"), MediaKind::Video);
        assert_eq!(MediaKind::from_url("noext"), MediaKind::Image);
    }

    #[test]
    fn loads_still_images_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "wall.png", 8, 4);
        let tex = load_texture(&path).unwrap();
        assert_eq!((tex.width(), tex.height()), (8, 4));
        assert!(!tex.is_animated());
    }

    #[test]
    fn video_is_rejected() {
        let err = load_texture(Path::new("does/not/matter.mp4")).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedMedia(_)));
        assert!(err.to_string().contains("gif animations"));
    }

    #[test]
    fn missing_files_report_io_errors() {
        let err = load_texture(Path::new("/nonexistent/x.png")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn background_requests_come_back_through_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 2, 2);
        let mut loader = AssetLoader::new(Some(dir.path().to_path_buf()));
        let target = ProjectionId::from_raw(7);
        let ticket = loader.request(target, "a.png");
        assert_eq!(loader.pending(), 1);

        let mut done = Vec::new();
        for _ in 0..1000 {
            done = loader.poll();
            if !done.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let done = done.pop().unwrap();
        assert_eq!(done.ticket, ticket);
        assert_eq!(done.target, target);
        assert!(done.texture.is_ok());
        assert_eq!(loader.pending(), 0);
        assert!(loader.poll().is_empty());
    }
}
