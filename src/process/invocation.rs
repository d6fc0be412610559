//! Fetch-tool command line

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// One decryption key as `kid:key` hex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    /// Key id (hex)
    pub kid: String,
    /// Key (hex)
    pub key: String,
}

impl ContentKey {
    /// Parse `kid:key`
    pub fn parse(pair: &str) -> Option<Self> {
        let (kid, key) = pair.trim().split_once(':')?;
        if kid.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self {
            kid: kid.to_string(),
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kid, self.key)
    }
}

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// MPEG-4, muxed by the tool itself
    Mp4,
    /// Matroska, muxed by mkvmerge
    Mkv,
}

impl Container {
    /// Container for a filename suffix such as `.mkv`
    pub fn from_suffix(suffix: &str) -> Self {
        if suffix.eq_ignore_ascii_case(".mkv") {
            Self::Mkv
        } else {
            Self::Mp4
        }
    }
}

/// Split a filename into the tool's save name and its container suffix
///
/// The tool treats commas in `--save-name` as list separators, so they are removed.
///
/// ```
/// use vod_dl::process::sanitize_name;
/// assert_eq!(sanitize_name("우리, 집.mkv"), ("우리 집".to_string(), ".mkv".to_string()));
/// ```
pub fn sanitize_name(filename: &str) -> (String, String) {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem.replace(',', ""), suffix)
}

/// A complete fetch-tool invocation
///
/// Built with [`FetchInvocation::new`] and the `with_*` methods; [`args`](Self::args)
/// renders the command line.
#[derive(Debug, Clone)]
pub struct FetchInvocation {
    /// Fetch-tool binary
    pub program: PathBuf,
    /// Manifest path or URL
    pub input: String,
    /// Working directory for segments
    pub temp_dir: PathBuf,
    /// Output directory
    pub save_dir: PathBuf,
    /// Output base name without suffix, commas removed
    pub save_name: String,
    /// Output suffix (`.mp4`, `.mkv`)
    pub suffix: String,
    /// Decryption keys
    pub keys: Vec<ContentKey>,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Decryption helper binary
    pub decryption_binary: Option<PathBuf>,
    /// ffmpeg binary
    pub ffmpeg_binary: Option<PathBuf>,
    /// mkvmerge binary
    pub mkvmerge_binary: Option<PathBuf>,
    /// Per-segment retry count
    pub retry_count: u32,
    /// Tool log level
    pub log_level: String,
    /// Download video, audio and subtitles concurrently
    pub concurrent_download: bool,
}

impl FetchInvocation {
    /// Invocation writing `filename` into `save_dir`
    pub fn new(
        program: impl Into<PathBuf>,
        input: impl Into<String>,
        save_dir: impl Into<PathBuf>,
        filename: &str,
    ) -> Self {
        let (save_name, suffix) = sanitize_name(filename);
        let save_dir = save_dir.into();
        Self {
            program: program.into(),
            input: input.into(),
            temp_dir: save_dir.clone(),
            save_dir,
            save_name,
            suffix,
            keys: Vec::new(),
            headers: BTreeMap::new(),
            decryption_binary: None,
            ffmpeg_binary: None,
            mkvmerge_binary: None,
            retry_count: 3,
            log_level: "INFO".to_string(),
            concurrent_download: true,
        }
    }

    /// Set the working directory
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Add decryption keys
    pub fn with_keys(mut self, keys: Vec<ContentKey>) -> Self {
        self.keys.extend(keys);
        self
    }

    /// Add request headers
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set helper binaries
    pub fn with_binaries(
        mut self,
        decryption: Option<PathBuf>,
        ffmpeg: Option<PathBuf>,
        mkvmerge: Option<PathBuf>,
    ) -> Self {
        self.decryption_binary = decryption;
        self.ffmpeg_binary = ffmpeg;
        self.mkvmerge_binary = mkvmerge;
        self
    }

    /// Set the per-segment retry count and log level
    pub fn with_tool_options(mut self, retry_count: u32, log_level: impl Into<String>) -> Self {
        self.retry_count = retry_count;
        self.log_level = log_level.into();
        self
    }

    /// Output container
    pub fn container(&self) -> Container {
        Container::from_suffix(&self.suffix)
    }

    /// Path the tool will write
    pub fn output_path(&self) -> PathBuf {
        self.save_dir
            .join(format!("{}{}", self.save_name, self.suffix))
    }

    /// Command-line arguments, in the order the tool documents them
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.input.clone().into(),
            "--tmp-dir".into(),
            self.temp_dir.clone().into(),
            "--save-dir".into(),
            self.save_dir.clone().into(),
            "--save-name".into(),
            self.save_name.clone().into(),
            "-M".into(),
        ];

        match self.container() {
            Container::Mp4 => args.push("format=mp4".into()),
            Container::Mkv => {
                args.push("format=mkv:muxer=mkvmerge".into());
                if let Some(mkvmerge) = &self.mkvmerge_binary {
                    args.push("--mkvmerge-binary-path".into());
                    args.push(mkvmerge.clone().into());
                }
            }
        }

        args.push("--write-meta-json".into());
        args.push("False".into());

        if let Some(decryption) = &self.decryption_binary {
            args.push("--decryption-binary-path".into());
            args.push(decryption.clone().into());
            args.push("--use-shaka-packager".into());
        }
        if let Some(ffmpeg) = &self.ffmpeg_binary {
            args.push("--ffmpeg-binary-path".into());
            args.push(ffmpeg.clone().into());
        }
        if !self.keys.is_empty() {
            args.push("--mp4-real-time-decryption".into());
        }

        for (flag, value) in [
            ("--select-video", "best"),
            ("--select-audio", "best"),
            ("--select-subtitle", "all"),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        if self.concurrent_download {
            args.push("--concurrent-download".into());
        }
        args.push("--download-retry-count".into());
        args.push(self.retry_count.to_string().into());
        args.push("--log-level".into());
        args.push(self.log_level.clone().into());
        args.push("--no-log".into());

        for (name, value) in &self.headers {
            args.push("-H".into());
            args.push(format!("{}: {}", name, value).into());
        }
        for key in &self.keys {
            args.push("--key".into());
            args.push(key.to_string().into());
        }

        args
    }
}
