//! Output file naming.
//!
//! Names have the shape `{prefix}-{token}-{basename}`. The token combines
//! the wall clock, a process-wide sequence and a random suffix, so two calls
//! never collide inside one process and collisions across processes need a
//! 32-bit random clash within the same millisecond and sequence value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix for uploaded source files.
pub const UPLOAD_PREFIX: &str = "upload";
/// Prefix for derived artifacts.
pub const PROCESSED_PREFIX: &str = "processed";

const MAX_BASENAME_LEN: usize = 100;
const FALLBACK_BASENAME: &str = "clip";

/// Generates unique artifact file names.
#[derive(Debug, Default)]
pub struct OutputNamer {
    sequence: AtomicU64,
}

impl OutputNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unique file name for an artifact derived from `source_name`.
    ///
    /// `extension` replaces the source extension (format conversion).
    pub fn next_name(&self, prefix: &str, source_name: &str, extension: Option<&str>) -> String {
        let basename = sanitize_basename(source_name);
        let basename = match extension {
            Some(ext) => with_extension(&basename, ext),
            None => basename,
        };
        format!("{}-{}-{}", prefix, self.next_token(), basename)
    }

    fn next_token(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", millis, seq, &random[..8])
    }
}

/// Reduce a client-supplied file name to a safe basename.
///
/// Directory components are dropped, characters outside `[A-Za-z0-9._-]`
/// become `_`, and leading dots or dashes are stripped.
pub fn sanitize_basename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '-']);

    let truncated: String = if cleaned.len() > MAX_BASENAME_LEN {
        // Keep the extension when cutting long names.
        match cleaned.rsplit_once('.') {
            Some((stem, ext)) if ext.len() < 16 && !stem.is_empty() => {
                let keep = MAX_BASENAME_LEN.saturating_sub(ext.len() + 1);
                format!("{}.{}", &stem[..keep.min(stem.len())], ext)
            }
            _ => cleaned[..MAX_BASENAME_LEN].to_string(),
        }
    } else {
        cleaned.to_string()
    };

    if truncated.is_empty() || truncated.chars().all(|c| c == '_' || c == '.') {
        FALLBACK_BASENAME.to_string()
    } else {
        truncated
    }
}

fn with_extension(basename: &str, ext: &str) -> String {
    match basename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.{}", stem, ext),
        _ => format!("{}.{}", basename, ext),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_name_shape() {
        let namer = OutputNamer::new();
        let name = namer.next_name(PROCESSED_PREFIX, "cat video.mp4", None);

        assert!(name.starts_with("processed-"));
        assert!(name.ends_with("-cat_video.mp4"));
        assert_eq!(name.split('-').count(), 3);
    }

    #[test]
    fn test_extension_override() {
        let namer = OutputNamer::new();
        assert!(namer.next_name("processed", "cat.mp4", Some("webm")).ends_with("-cat.webm"));
        assert!(namer.next_name("processed", "cat", Some("mkv")).ends_with("-cat.mkv"));
    }

    #[test]
    fn test_sanitize_basename() {
        assert_eq!(sanitize_basename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_basename("C:\\videos\\clip.mov"), "clip.mov");
        assert_eq!(sanitize_basename("-rf.mp4"), "rf.mp4");
        assert_eq!(sanitize_basename(".hidden.mp4"), "hidden.mp4");
        assert_eq!(sanitize_basename("$(rm -rf).mp4"), "__rm_-rf_.mp4");
        assert_eq!(sanitize_basename(""), "clip");
        assert_eq!(sanitize_basename("///"), "clip");

        let long = format!("{}.mp4", "a".repeat(300));
        let sanitized = sanitize_basename(&long);
        assert!(sanitized.len() <= MAX_BASENAME_LEN);
        assert!(sanitized.ends_with(".mp4"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_names_are_unique() {
        let namer = Arc::new(OutputNamer::new());

        let handles: Vec<_> = (0..10_000)
            .map(|_| {
                let namer = namer.clone();
                tokio::spawn(async move { namer.next_name(PROCESSED_PREFIX, "same-source.mp4", None) })
            })
            .collect();

        let mut names = HashSet::new();
        for handle in handles {
            assert!(names.insert(handle.await.unwrap()), "duplicate output name");
        }
        assert_eq!(names.len(), 10_000);
    }

    #[test]
    fn test_independent_namers_do_not_collide() {
        let a = OutputNamer::new();
        let b = OutputNamer::new();
        let names: HashSet<_> = (0..1000)
            .flat_map(|_| [a.next_name("processed", "x.mp4", None), b.next_name("processed", "x.mp4", None)])
            .collect();
        assert_eq!(names.len(), 2000);
    }
}
