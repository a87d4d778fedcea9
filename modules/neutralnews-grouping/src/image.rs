//! Representative-image selection for aggregate records.

use url::Url;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "svg", "ico", "heic", "heif",
    "raw", "cr2", "nef", "orf", "sr2",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "wmv", "avi", "flv", "webm", "mkv", "3gp", "mpeg", "mpg", "mpe", "mpv",
    "m2v", "mts", "m2ts", "ts",
];

/// Hosting paths that serve players rather than stills.
const VIDEO_MARKERS: &[&str] = &["video", "player"];

/// A source item competing to supply the aggregate's image.
#[derive(Debug, Clone)]
pub struct ImageCandidate<'a> {
    pub outlet: &'a str,
    pub image_url: Option<&'a str>,
    pub score: Option<u8>,
}

/// True when the URL's decoded path ends in an image extension and nothing
/// about it points at video.
pub fn is_image_url(raw: &str) -> bool {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return false;
    };
    let lowered = raw.to_lowercase();
    if VIDEO_MARKERS.iter().any(|m| lowered.contains(m)) {
        return false;
    }

    let path = match urlencoding::decode(parsed.path()) {
        Ok(decoded) => decoded.to_lowercase(),
        Err(_) => parsed.path().to_lowercase(),
    };
    let Some(file_name) = path.rsplit('/').next() else {
        return false;
    };
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    !VIDEO_EXTENSIONS.contains(&ext) && IMAGE_EXTENSIONS.contains(&ext)
}

/// Highest-scored qualifying candidate; missing scores count as zero and ties
/// go to the earlier candidate. Returns `(image_url, outlet)`.
pub fn select_representative_image(candidates: &[ImageCandidate<'_>]) -> Option<(String, String)> {
    let mut best: Option<(u8, &ImageCandidate<'_>)> = None;
    for candidate in candidates {
        let Some(url) = candidate.image_url else {
            continue;
        };
        if !is_image_url(url) {
            continue;
        }
        let score = candidate.score.unwrap_or(0);
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, candidate));
        }
    }
    best.and_then(|(_, c)| c.image_url.map(|url| (url.trim().to_string(), c.outlet.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_image_extensions() {
        assert!(is_image_url("https://cdn.example.com/a/b/photo.JPG"));
        assert!(is_image_url("https://cdn.example.com/photo.webp?w=800"));
        assert!(is_image_url("https://cdn.example.com/fotos/Espa%C3%B1a%20hoy.png"));
    }

    #[test]
    fn rejects_video_and_players() {
        assert!(!is_image_url("https://cdn.example.com/clip.mp4"));
        assert!(!is_image_url("https://cdn.example.com/segment.ts"));
        assert!(!is_image_url("https://cdn.example.com/video/thumb.jpg"));
        assert!(!is_image_url("https://player.example.com/still.png"));
    }

    #[test]
    fn rejects_missing_extension_and_garbage() {
        assert!(!is_image_url("https://cdn.example.com/image"));
        assert!(!is_image_url("not a url"));
        assert!(!is_image_url(""));
    }

    #[test]
    fn picks_highest_scored_qualifying_image() {
        let candidates = [
            ImageCandidate {
                outlet: "a",
                image_url: Some("https://a.example.com/1.jpg"),
                score: Some(60),
            },
            ImageCandidate {
                outlet: "b",
                image_url: Some("https://b.example.com/video/2.jpg"),
                score: Some(95),
            },
            ImageCandidate {
                outlet: "c",
                image_url: Some("https://c.example.com/3.png"),
                score: Some(80),
            },
            ImageCandidate {
                outlet: "d",
                image_url: None,
                score: Some(100),
            },
        ];
        assert_eq!(
            select_representative_image(&candidates),
            Some(("https://c.example.com/3.png".to_string(), "c".to_string()))
        );
    }

    #[test]
    fn ties_go_to_earlier_candidate() {
        let candidates = [
            ImageCandidate {
                outlet: "a",
                image_url: Some("https://a.example.com/1.jpg"),
                score: None,
            },
            ImageCandidate {
                outlet: "b",
                image_url: Some("https://b.example.com/2.jpg"),
                score: Some(0),
            },
        ];
        assert_eq!(
            select_representative_image(&candidates).map(|(_, outlet)| outlet),
            Some("a".to_string())
        );
        assert_eq!(select_representative_image(&[]), None);
    }
}
